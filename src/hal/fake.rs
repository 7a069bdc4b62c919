//! In-memory register bank for tests
//!
//! Records every write in order and mirrors GPSET/GPCLR into GPLEV so that
//! a written output reads back the way it does on hardware.

use std::sync::Mutex;

use super::registers::{Register, RegisterAccess, REGISTER_SPAN};

#[derive(Debug)]
struct FakeState {
    words: [u32; REGISTER_SPAN / 4],
    writes: Vec<(Register, u32)>,
}

/// Recording register bank
#[derive(Debug)]
pub struct FakeRegisters {
    state: Mutex<FakeState>,
}

impl Default for FakeRegisters {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRegisters {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                words: [0; REGISTER_SPAN / 4],
                writes: Vec::new(),
            }),
        }
    }

    /// Every write so far, oldest first
    pub fn writes(&self) -> Vec<(Register, u32)> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.lock().unwrap().writes.clear();
    }

    /// Raw word without logging
    pub fn peek(&self, reg: Register) -> u32 {
        self.state.lock().unwrap().words[reg.offset() / 4]
    }

    /// Drive an input level from outside, as external hardware would
    pub fn set_level(&self, pin: u8, high: bool) {
        let mut state = self.state.lock().unwrap();
        let index = Register::Level(pin as usize / 32).offset() / 4;
        let bit = 1u32 << (pin % 32);
        if high {
            state.words[index] |= bit;
        } else {
            state.words[index] &= !bit;
        }
    }
}

impl RegisterAccess for FakeRegisters {
    fn read(&self, reg: Register) -> u32 {
        match reg {
            // Write-only on hardware
            Register::Set(_) | Register::Clear(_) => 0,
            _ => self.peek(reg),
        }
    }

    fn write(&self, reg: Register, value: u32) {
        let mut state = self.state.lock().unwrap();
        state.writes.push((reg, value));
        match reg {
            Register::Set(n) => state.words[Register::Level(n).offset() / 4] |= value,
            Register::Clear(n) => state.words[Register::Level(n).offset() / 4] &= !value,
            Register::Level(_) => {}
            _ => state.words[reg.offset() / 4] = value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_clear_mirror_into_level() {
        let regs = FakeRegisters::new();
        regs.write(Register::Set(0), 1 << 17);
        assert_eq!(regs.read(Register::Level(0)), 1 << 17);
        regs.write(Register::Clear(0), 1 << 17);
        assert_eq!(regs.read(Register::Level(0)), 0);
        assert_eq!(regs.read(Register::Set(0)), 0);
        assert_eq!(regs.writes().len(), 2);
    }

    #[test]
    fn test_external_level() {
        let regs = FakeRegisters::new();
        regs.set_level(4, true);
        assert_eq!(regs.read(Register::Level(0)), 1 << 4);
        assert!(regs.writes().is_empty());
    }
}
