//! Edge handlers shared by several pins
//!
//! A group attaches one dispatcher to each member pin when its first handler
//! is added and detaches them when the last one goes. All members share one
//! bounce window: an edge that is clean on its own pin is still marked
//! bounced if any member produced a clean edge less than the group's
//! `bounce_delay_ms` earlier. Edges already bounced on their pin stay
//! bounced and do not move the window.
//!
//! ```no_run
//! use rpi_gpio::{Gpio, PinGroup, PinMode};
//!
//! # fn main() -> rpi_gpio::GpioResult<()> {
//! let gpio = Gpio::open()?;
//! let mut buttons = Vec::new();
//! for pin in [5, 6, 13] {
//!     let button = gpio.pin(pin)?;
//!     button.set_mode(PinMode::InputPullUp)?;
//!     buttons.push(button);
//! }
//! let group = PinGroup::new(buttons);
//! group.on_falling_edge(|event| {
//!     if !event.bounced {
//!         println!("button on GPIO {} pressed", event.pin);
//!     }
//! })?;
//! # Ok(())
//! # }
//! ```

use log::debug;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::GpioResult;
use crate::events::{CallbackId, EdgeCallback, EdgeEvent, EdgeMask};
use crate::gpio::GpioPin;

/// Bounce window a new group starts with
pub const DEFAULT_BOUNCE_DELAY_MS: f64 = 30.0;

struct GroupState {
    bounce_delay_ms: f64,
    last_clean_ms: Option<f64>,
    next_id: u64,
    handlers: Vec<(CallbackId, EdgeMask, EdgeCallback)>,
    /// Dispatcher registered on each member, by pin
    attached: Vec<(u8, CallbackId)>,
}

struct Dispatch {
    state: Mutex<GroupState>,
}

impl Dispatch {
    fn lock(&self) -> MutexGuard<'_, GroupState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs on the watcher thread of whichever member saw the edge
    fn deliver(&self, event: &EdgeEvent) {
        let mut event = *event;
        let handlers: Vec<EdgeCallback> = {
            let mut state = self.lock();
            if !event.bounced {
                match state.last_clean_ms {
                    Some(last) if event.timestamp_ms - last < state.bounce_delay_ms => {
                        event.bounced = true;
                    }
                    _ => state.last_clean_ms = Some(event.timestamp_ms),
                }
            }
            state
                .handlers
                .iter()
                .filter(|(_, mask, _)| mask.contains(event.edge))
                .map(|(_, _, handler)| Arc::clone(handler))
                .collect()
        };
        for handler in handlers {
            handler(&event);
        }
    }
}

/// Several pins sharing edge handlers and a bounce window
pub struct PinGroup {
    pins: Vec<GpioPin>,
    dispatch: Arc<Dispatch>,
}

impl PinGroup {
    pub fn new(pins: Vec<GpioPin>) -> Self {
        Self {
            pins,
            dispatch: Arc::new(Dispatch {
                state: Mutex::new(GroupState {
                    bounce_delay_ms: DEFAULT_BOUNCE_DELAY_MS,
                    last_clean_ms: None,
                    next_id: 1,
                    handlers: Vec::new(),
                    attached: Vec::new(),
                }),
            }),
        }
    }

    pub fn pins(&self) -> &[GpioPin] {
        &self.pins
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    pub fn bounce_delay_ms(&self) -> f64 {
        self.dispatch.lock().bounce_delay_ms
    }

    pub fn set_bounce_delay_ms(&self, delay: f64) {
        self.dispatch.lock().bounce_delay_ms = delay;
    }

    pub fn on_rising_edge<F>(&self, handler: F) -> GpioResult<CallbackId>
    where
        F: Fn(&EdgeEvent) + Send + Sync + 'static,
    {
        self.on_edge(EdgeMask::RISING, handler)
    }

    pub fn on_falling_edge<F>(&self, handler: F) -> GpioResult<CallbackId>
    where
        F: Fn(&EdgeEvent) + Send + Sync + 'static,
    {
        self.on_edge(EdgeMask::FALLING, handler)
    }

    /// Add a handler for edges in `mask` on any member
    ///
    /// Fails without attaching anything if a member cannot deliver edges,
    /// for example because it is not an input.
    pub fn on_edge<F>(&self, mask: EdgeMask, handler: F) -> GpioResult<CallbackId>
    where
        F: Fn(&EdgeEvent) + Send + Sync + 'static,
    {
        let mut state = self.dispatch.lock();
        if state.attached.is_empty() {
            state.attached = self.attach()?;
        }
        let id = CallbackId(state.next_id);
        state.next_id += 1;
        state.handlers.push((id, mask, Arc::new(handler)));
        Ok(id)
    }

    /// Remove one handler; the last one detaches the group from its pins
    pub fn remove_edge_callback(&self, id: CallbackId) -> GpioResult<bool> {
        let mut state = self.dispatch.lock();
        let before = state.handlers.len();
        state.handlers.retain(|(existing, _, _)| *existing != id);
        let removed = state.handlers.len() != before;
        if state.handlers.is_empty() {
            let attached = std::mem::take(&mut state.attached);
            self.detach(&attached)?;
        }
        Ok(removed)
    }

    /// Remove every handler and detach from all pins
    pub fn remove_events(&self) -> GpioResult<()> {
        let mut state = self.dispatch.lock();
        state.handlers.clear();
        let attached = std::mem::take(&mut state.attached);
        self.detach(&attached)
    }

    /// Dissolve the group, handing back its pins without handlers
    pub fn into_pins(self) -> GpioResult<Vec<GpioPin>> {
        self.remove_events()?;
        Ok(self.pins)
    }

    fn attach(&self) -> GpioResult<Vec<(u8, CallbackId)>> {
        let mut attached = Vec::with_capacity(self.pins.len());
        for pin in &self.pins {
            let dispatch = Arc::clone(&self.dispatch);
            match pin.on_edge(EdgeMask::BOTH, move |event| dispatch.deliver(event)) {
                Ok(id) => attached.push((pin.number(), id)),
                Err(e) => {
                    self.detach(&attached)?;
                    return Err(e);
                }
            }
        }
        debug!("Edge group attached to {} pins", attached.len());
        Ok(attached)
    }

    fn detach(&self, attached: &[(u8, CallbackId)]) -> GpioResult<()> {
        for (number, id) in attached {
            if let Some(pin) = self.pins.iter().find(|p| p.number() == *number) {
                pin.remove_edge_callback(*id)?;
            }
        }
        Ok(())
    }
}
