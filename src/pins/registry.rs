//! Open-pin bookkeeping

use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{PinMode, PIN_COUNT};
use crate::error::{GpioError, GpioResult};

/// Cached state of an open pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinState {
    pub mode: PinMode,
    /// An edge event session exists for this pin
    pub claimed_by_events: bool,
    /// A `GpioPin` handle owns this pin
    pub held: bool,
}

impl PinState {
    fn opened() -> Self {
        Self {
            mode: PinMode::Unset,
            claimed_by_events: false,
            held: false,
        }
    }
}

/// One slot per pin; a slot is `Some` while the pin is open
#[derive(Debug)]
pub struct PinRegistry {
    slots: Mutex<[Option<PinState>; PIN_COUNT]>,
}

impl Default for PinRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PinRegistry {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new([None; PIN_COUNT]),
        }
    }

    fn slots(&self) -> MutexGuard<'_, [Option<PinState>; PIN_COUNT]> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_open<T>(&self, pin: u8, f: impl FnOnce(&mut PinState) -> T) -> GpioResult<T> {
        let mut slots = self.slots();
        slots
            .get_mut(pin as usize)
            .ok_or(GpioError::PinOutOfRange(pin))?
            .as_mut()
            .map(f)
            .ok_or(GpioError::PinNotOpen(pin))
    }

    /// Mark a pin open; returns false if it already was
    pub fn open(&self, pin: u8) -> GpioResult<bool> {
        let mut slots = self.slots();
        let slot = slots
            .get_mut(pin as usize)
            .ok_or(GpioError::PinOutOfRange(pin))?;
        if slot.is_some() {
            return Ok(false);
        }
        *slot = Some(PinState::opened());
        Ok(true)
    }

    /// Open a pin for exclusive use by a handle
    ///
    /// Fails with `PinBusy` if the pin is already open in any way.
    pub fn acquire(&self, pin: u8) -> GpioResult<()> {
        let mut slots = self.slots();
        let slot = slots
            .get_mut(pin as usize)
            .ok_or(GpioError::PinOutOfRange(pin))?;
        if slot.is_some() {
            return Err(GpioError::PinBusy(pin));
        }
        *slot = Some(PinState {
            held: true,
            ..PinState::opened()
        });
        Ok(())
    }

    pub fn get(&self, pin: u8) -> GpioResult<PinState> {
        self.with_open(pin, |state| *state)
    }

    pub fn is_open(&self, pin: u8) -> bool {
        self.get(pin).is_ok()
    }

    pub fn set_mode(&self, pin: u8, mode: PinMode) -> GpioResult<()> {
        self.with_open(pin, |state| state.mode = mode)
    }

    pub fn set_claimed(&self, pin: u8, claimed: bool) -> GpioResult<()> {
        self.with_open(pin, |state| state.claimed_by_events = claimed)
    }

    /// Clear the slot, returning the last state
    pub fn close(&self, pin: u8) -> GpioResult<PinState> {
        let mut slots = self.slots();
        slots
            .get_mut(pin as usize)
            .ok_or(GpioError::PinOutOfRange(pin))?
            .take()
            .ok_or(GpioError::PinNotOpen(pin))
    }

    /// Open pins in ascending order
    pub fn open_pins(&self) -> Vec<(u8, PinState)> {
        self.slots()
            .iter()
            .enumerate()
            .filter_map(|(pin, slot)| slot.map(|state| (pin as u8, state)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_get_close() {
        let registry = PinRegistry::new();
        assert!(matches!(registry.get(4), Err(GpioError::PinNotOpen(4))));

        assert!(registry.open(4).unwrap());
        assert!(!registry.open(4).unwrap());
        assert_eq!(registry.get(4).unwrap().mode, PinMode::Unset);

        registry.set_mode(4, PinMode::Output).unwrap();
        registry.set_claimed(4, true).unwrap();
        let state = registry.close(4).unwrap();
        assert_eq!(state.mode, PinMode::Output);
        assert!(state.claimed_by_events);
        assert!(!registry.is_open(4));
        assert!(registry.close(4).is_err());
    }

    #[test]
    fn test_out_of_range() {
        let registry = PinRegistry::new();
        assert!(matches!(registry.open(28), Err(GpioError::PinOutOfRange(28))));
        assert!(matches!(registry.get(200), Err(GpioError::PinOutOfRange(200))));
    }

    #[test]
    fn test_acquire_is_exclusive() {
        let registry = PinRegistry::new();
        registry.acquire(17).unwrap();
        assert!(registry.get(17).unwrap().held);
        assert!(matches!(registry.acquire(17), Err(GpioError::PinBusy(17))));

        registry.open(18).unwrap();
        assert!(matches!(registry.acquire(18), Err(GpioError::PinBusy(18))));
    }

    #[test]
    fn test_open_pins_sorted() {
        let registry = PinRegistry::new();
        registry.open(20).unwrap();
        registry.open(3).unwrap();
        let pins: Vec<u8> = registry.open_pins().into_iter().map(|(p, _)| p).collect();
        assert_eq!(pins, vec![3, 20]);
    }
}
