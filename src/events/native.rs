//! Native edge events through the GPIO character device

use gpio_cdev::{Chip, EventRequestFlags, EventType, LineEventHandle, LineRequestFlags};
use log::info;
use std::os::unix::io::AsRawFd;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::edge::Edge;
use super::poll_fd;
use super::source::{EdgeLine, EdgeProvider};
use crate::config::GpioConfig;
use crate::error::{GpioError, GpioResult};

fn cdev_error(pin: u8, e: gpio_cdev::Error) -> GpioError {
    GpioError::EventBackend(format!("GPIO {}: {}", pin, e))
}

/// Edge provider over `/dev/gpiochipN`
pub struct NativeProvider {
    chip: Mutex<Chip>,
    consumer: String,
}

impl NativeProvider {
    /// Open the chip device
    ///
    /// A missing device node means the kernel lacks the character device
    /// interface and is reported as unavailable so selection can fall back.
    pub fn open(config: &GpioConfig) -> GpioResult<Self> {
        if !config.chip_path.exists() {
            return Err(GpioError::EventBackendUnavailable(format!(
                "{} not present",
                config.chip_path.display()
            )));
        }
        let chip = Chip::new(&config.chip_path).map_err(|e| {
            GpioError::EventBackend(format!(
                "cannot open {}: {}",
                config.chip_path.display(),
                e
            ))
        })?;
        info!(
            "Opened {} ({}, {} lines)",
            chip.name(),
            chip.label(),
            chip.num_lines()
        );
        Ok(Self {
            chip: Mutex::new(chip),
            consumer: config.consumer.clone(),
        })
    }
}

impl EdgeProvider for NativeProvider {
    fn name(&self) -> &'static str {
        "cdev"
    }

    fn open_line(&self, pin: u8) -> GpioResult<Box<dyn EdgeLine>> {
        let mut chip = self.chip.lock().unwrap_or_else(PoisonError::into_inner);
        let line = chip
            .get_line(u32::from(pin))
            .map_err(|e| cdev_error(pin, e))?;
        let events = line
            .events(
                LineRequestFlags::INPUT,
                EventRequestFlags::BOTH_EDGES,
                &self.consumer,
            )
            .map_err(|e| cdev_error(pin, e))?;
        Ok(Box::new(NativeLine { pin, events }))
    }
}

struct NativeLine {
    pin: u8,
    events: LineEventHandle,
}

impl EdgeLine for NativeLine {
    fn next_edge(&mut self, timeout: Duration) -> GpioResult<Option<Edge>> {
        if !poll_fd(self.events.as_raw_fd(), libc::POLLIN, timeout)? {
            return Ok(None);
        }
        let event = self
            .events
            .get_event()
            .map_err(|e| cdev_error(self.pin, e))?;
        Ok(Some(match event.event_type() {
            EventType::RisingEdge => Edge::Rising,
            EventType::FallingEdge => Edge::Falling,
        }))
    }
}
