//! Function select, pull resistors and level I/O
//!
//! Stateless over the register bank: which pins are open and in which mode
//! is tracked by the registry, not here.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::PIN_COUNT;
use crate::error::{GpioError, GpioResult};
use crate::hal::{ChipRevision, Register, RegisterAccess};
use crate::timer;

/// Function select value for an input
const FSEL_INPUT: u32 = 0b000;
/// Function select value for an output
const FSEL_OUTPUT: u32 = 0b001;
const FSEL_MASK: u32 = 0b111;

/// Logical pin configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinMode {
    Input,
    Output,
    InputPullUp,
    InputPullDown,
    /// Opened but never configured; not a valid target mode
    Unset,
}

impl PinMode {
    pub fn is_input(self) -> bool {
        matches!(
            self,
            PinMode::Input | PinMode::InputPullUp | PinMode::InputPullDown
        )
    }

    /// Pull resistor an input mode asks for
    pub fn pull(self) -> Option<Pull> {
        match self {
            PinMode::Input => Some(Pull::None),
            PinMode::InputPullUp => Some(Pull::Up),
            PinMode::InputPullDown => Some(Pull::Down),
            PinMode::Output | PinMode::Unset => None,
        }
    }
}

impl fmt::Display for PinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinMode::Input => write!(f, "input"),
            PinMode::Output => write!(f, "output"),
            PinMode::InputPullUp => write!(f, "input-pull-up"),
            PinMode::InputPullDown => write!(f, "input-pull-down"),
            PinMode::Unset => write!(f, "unset"),
        }
    }
}

impl FromStr for PinMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "input" | "in" => Ok(PinMode::Input),
            "output" | "out" => Ok(PinMode::Output),
            "input-pull-up" | "pull-up" | "up" => Ok(PinMode::InputPullUp),
            "input-pull-down" | "pull-down" | "down" => Ok(PinMode::InputPullDown),
            other => Err(format!("unknown pin mode: {}", other)),
        }
    }
}

/// Pull resistor setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    None,
    Down,
    Up,
}

// ============================================================================
// Pull protocols
// ============================================================================

/// Chip-specific sequence for programming a pull resistor
pub trait PullProtocol: Send + Sync {
    fn apply(&self, regs: &dyn RegisterAccess, pin: u8, pull: Pull);
}

/// GPPUD/GPPUDCLK clocking used up to BCM2837
///
/// The control value is latched into the pins whose clock bit is pulsed;
/// both halves need a settle time on either side of the pulse.
#[derive(Debug, Clone, Copy)]
pub struct LegacyPull {
    settle: Duration,
}

impl LegacyPull {
    pub fn new(settle: Duration) -> Self {
        Self { settle }
    }

    fn code(pull: Pull) -> u32 {
        match pull {
            Pull::None => 0,
            Pull::Down => 1,
            Pull::Up => 2,
        }
    }
}

impl PullProtocol for LegacyPull {
    fn apply(&self, regs: &dyn RegisterAccess, pin: u8, pull: Pull) {
        let clock = Register::PullClock(pin as usize / 32);
        let bit = 1u32 << (pin % 32);

        regs.update(Register::PullControl, 0b11, Self::code(pull));
        timer::spin_for(self.settle);
        regs.update(clock, 0, bit);
        timer::spin_for(self.settle);
        regs.update(clock, bit, 0);
        regs.update(Register::PullControl, 0b11, 0);
        timer::spin_for(self.settle);
    }
}

/// GPIO_PUP_PDN_CNTRL fields on BCM2711, 2 bits per pin
///
/// Note the encoding differs from the legacy control register.
#[derive(Debug, Clone, Copy)]
pub struct DirectPull {
    settle: Duration,
}

impl DirectPull {
    pub fn new(settle: Duration) -> Self {
        Self { settle }
    }

    fn code(pull: Pull) -> u32 {
        match pull {
            Pull::None => 0,
            Pull::Up => 1,
            Pull::Down => 2,
        }
    }
}

impl PullProtocol for DirectPull {
    fn apply(&self, regs: &dyn RegisterAccess, pin: u8, pull: Pull) {
        let reg = Register::PullConfig(pin as usize >> 4);
        let shift = (pin as u32 & 0xF) << 1;
        regs.update(reg, 0b11 << shift, Self::code(pull) << shift);
        timer::spin_for(self.settle);
    }
}

/// Pull protocol for a chip revision
pub fn pull_protocol(revision: ChipRevision, settle: Duration) -> Box<dyn PullProtocol> {
    match revision {
        ChipRevision::Legacy => Box::new(LegacyPull::new(settle)),
        ChipRevision::Direct => Box::new(DirectPull::new(settle)),
    }
}

// ============================================================================
// Controller
// ============================================================================

/// Pin configuration and level access over a register bank
pub struct PinController {
    regs: Arc<dyn RegisterAccess>,
    pull: Box<dyn PullProtocol>,
    revision: ChipRevision,
}

impl PinController {
    pub fn new(regs: Arc<dyn RegisterAccess>, revision: ChipRevision, settle: Duration) -> Self {
        Self {
            regs,
            pull: pull_protocol(revision, settle),
            revision,
        }
    }

    pub fn revision(&self) -> ChipRevision {
        self.revision
    }

    pub fn registers(&self) -> &dyn RegisterAccess {
        self.regs.as_ref()
    }

    /// Reject pin numbers outside the header GPIO range
    pub fn validate(pin: u8) -> GpioResult<()> {
        if (pin as usize) < PIN_COUNT {
            Ok(())
        } else {
            Err(GpioError::PinOutOfRange(pin))
        }
    }

    /// Program function select and, for inputs, the pull resistor
    pub fn set_mode(&self, pin: u8, mode: PinMode) -> GpioResult<()> {
        Self::validate(pin)?;
        let fsel = match mode {
            PinMode::Output => FSEL_OUTPUT,
            PinMode::Unset => return Err(GpioError::UnsupportedMode { pin, mode }),
            _ => FSEL_INPUT,
        };

        let shift = (pin as u32 % 10) * 3;
        self.regs.update(
            Register::FunctionSelect(pin as usize / 10),
            FSEL_MASK << shift,
            fsel << shift,
        );

        if let Some(pull) = mode.pull() {
            self.pull.apply(self.regs.as_ref(), pin, pull);
        }
        Ok(())
    }

    /// Raw 3-bit function select of a pin, as the hardware reports it
    pub fn function(&self, pin: u8) -> GpioResult<u32> {
        Self::validate(pin)?;
        let shift = (pin as u32 % 10) * 3;
        Ok((self.regs.read(Register::FunctionSelect(pin as usize / 10)) >> shift) & FSEL_MASK)
    }

    /// Current level from GPLEV
    pub fn read(&self, pin: u8) -> GpioResult<bool> {
        Self::validate(pin)?;
        let level = self.regs.read(Register::Level(pin as usize / 32));
        Ok((level >> (pin % 32)) & 1 != 0)
    }

    /// Drive a level through GPSET/GPCLR
    ///
    /// These registers only act on 1 bits, so no read is needed and other
    /// pins are never disturbed.
    pub fn write(&self, pin: u8, high: bool) -> GpioResult<()> {
        Self::validate(pin)?;
        let bank = pin as usize / 32;
        let reg = if high {
            Register::Set(bank)
        } else {
            Register::Clear(bank)
        };
        self.regs.write(reg, 1 << (pin % 32));
        Ok(())
    }

    /// Drive several pins high in one write per bank
    pub fn set_mask(&self, mask: u64) {
        self.write_mask(mask, Register::Set);
    }

    /// Drive several pins low in one write per bank
    pub fn clear_mask(&self, mask: u64) {
        self.write_mask(mask, Register::Clear);
    }

    fn write_mask(&self, mask: u64, reg: fn(usize) -> Register) {
        let low = mask as u32;
        let high = (mask >> 32) as u32;
        if low != 0 {
            self.regs.write(reg(0), low);
        }
        if high != 0 {
            self.regs.write(reg(1), high);
        }
    }

    /// Levels of all pins as a bitmask
    pub fn read_all(&self) -> u64 {
        let low = u64::from(self.regs.read(Register::Level(0)));
        let high = u64::from(self.regs.read(Register::Level(1)));
        low | (high << 32)
    }
}
