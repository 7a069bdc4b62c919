//! Edge provider driven by the test itself

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use super::edge::Edge;
use super::source::{EdgeLine, EdgeProvider};
use crate::error::{GpioError, GpioResult};
use crate::timer;

type Message = Result<Edge, String>;

#[derive(Default)]
struct Lines {
    channels: HashMap<u8, (Sender<Message>, Option<Receiver<Message>>)>,
    opens: HashMap<u8, usize>,
}

impl Lines {
    fn sender(&mut self, pin: u8) -> Sender<Message> {
        self.channels
            .entry(pin)
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel();
                (tx, Some(rx))
            })
            .0
            .clone()
    }
}

/// Cloneable handle: keep one clone to inject edges after handing the other
/// to an `InterruptSource`
#[derive(Clone, Default)]
pub struct SimulatedProvider {
    lines: Arc<Mutex<Lines>>,
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an edge now; buffered until the line is opened
    pub fn inject(&self, pin: u8, edge: Edge) {
        let _ = self.lines.lock().unwrap().sender(pin).send(Ok(edge));
    }

    /// Deliver an edge after `delay_ms` from a helper thread
    pub fn inject_after(&self, pin: u8, edge: Edge, delay_ms: f64) -> JoinHandle<()> {
        let provider = self.clone();
        timer::once(delay_ms, move || provider.inject(pin, edge))
    }

    /// Make the line report a backend failure
    pub fn inject_error(&self, pin: u8, reason: &str) {
        let _ = self
            .lines
            .lock()
            .unwrap()
            .sender(pin)
            .send(Err(reason.to_string()));
    }

    /// How many times the line for `pin` was opened
    pub fn open_count(&self, pin: u8) -> usize {
        self.lines
            .lock()
            .unwrap()
            .opens
            .get(&pin)
            .copied()
            .unwrap_or(0)
    }
}

impl EdgeProvider for SimulatedProvider {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn open_line(&self, pin: u8) -> GpioResult<Box<dyn EdgeLine>> {
        let mut lines = self.lines.lock().unwrap();
        *lines.opens.entry(pin).or_insert(0) += 1;

        let slot = lines.channels.entry(pin).or_insert_with(|| {
            let (tx, rx) = mpsc::channel();
            (tx, Some(rx))
        });
        let rx = match slot.1.take() {
            Some(rx) => rx,
            None => {
                // Reopened after close: start a fresh channel
                let (tx, rx) = mpsc::channel();
                slot.0 = tx;
                rx
            }
        };
        Ok(Box::new(SimulatedLine { rx }))
    }
}

struct SimulatedLine {
    rx: Receiver<Message>,
}

impl EdgeLine for SimulatedLine {
    fn next_edge(&mut self, timeout: Duration) -> GpioResult<Option<Edge>> {
        match self.rx.recv_timeout(timeout) {
            Ok(Ok(edge)) => Ok(Some(edge)),
            Ok(Err(reason)) => Err(GpioError::EventBackend(reason)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(GpioError::EventBackend("simulated line closed".to_string()))
            }
        }
    }
}
