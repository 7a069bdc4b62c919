//! Error types for register-mapped GPIO access
//!
//! One-time initialization failures (address resolution, device access,
//! mapping) are structural and never retried. Per-pin errors are caller
//! misuse and leave pin state untouched.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::pins::PinMode;

/// Errors produced by the GPIO core
#[derive(Error, Debug)]
pub enum GpioError {
    /// Firmware table unreadable or values outside the known chip families
    #[error("unable to determine peripheral base address: {0}")]
    AddressResolution(String),

    /// A memory device exists but could not be opened
    #[error("permission denied opening {}", path.display())]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Neither memory device could be opened
    #[error("GPIO memory device unavailable: {}", path.display())]
    DeviceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// mmap of the register page failed after the device was opened
    #[error("failed to map GPIO registers at offset {offset:#x}")]
    Mapping {
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("GPIO pin {0} is out of range")]
    PinOutOfRange(u8),

    #[error("GPIO pin {0} is not open")]
    PinNotOpen(u8),

    #[error("GPIO pin {0} is already held by another handle")]
    PinBusy(u8),

    #[error("GPIO pin {pin} does not support mode {mode}")]
    UnsupportedMode { pin: u8, mode: PinMode },

    /// Edge events and level waits need an input mode
    #[error("GPIO pin {pin} is in mode {mode}, an input mode is required")]
    NotAnInput { pin: u8, mode: PinMode },

    /// Level writes need the output mode
    #[error("GPIO pin {pin} is in mode {mode}, output is required")]
    NotAnOutput { pin: u8, mode: PinMode },

    #[error("header pin {0} is not a GPIO pin")]
    InvalidHeaderPin(u8),

    /// Event backend failed after it was selected
    #[error("edge event backend error: {0}")]
    EventBackend(String),

    /// Raised only during backend selection; triggers the polling fallback
    #[error("edge event backend not supported: {0}")]
    EventBackendUnavailable(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("invalid configuration value: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias used throughout the crate
pub type GpioResult<T> = Result<T, GpioError>;

impl GpioError {
    /// True for errors caused by misuse of a single pin
    pub fn is_pin_error(&self) -> bool {
        matches!(
            self,
            GpioError::PinOutOfRange(_)
                | GpioError::PinNotOpen(_)
                | GpioError::PinBusy(_)
                | GpioError::UnsupportedMode { .. }
                | GpioError::NotAnInput { .. }
                | GpioError::NotAnOutput { .. }
                | GpioError::InvalidHeaderPin(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_error_classification() {
        assert!(GpioError::PinNotOpen(4).is_pin_error());
        assert!(GpioError::InvalidHeaderPin(1).is_pin_error());
        assert!(GpioError::NotAnOutput {
            pin: 4,
            mode: PinMode::Input
        }
        .is_pin_error());
        assert!(!GpioError::AddressResolution("bad".into()).is_pin_error());
    }

    #[test]
    fn test_error_messages() {
        let err = GpioError::UnsupportedMode {
            pin: 3,
            mode: PinMode::Unset,
        };
        assert_eq!(err.to_string(), "GPIO pin 3 does not support mode unset");

        let err = GpioError::Mapping {
            offset: 0x3F20_0000,
            source: io::Error::from_raw_os_error(libc::EINVAL),
        };
        assert!(err.to_string().contains("0x3f200000"));
    }
}
