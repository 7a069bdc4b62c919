//! Userspace GPIO for Raspberry Pi
//!
//! Maps the SoC GPIO register block into the process and drives pins
//! directly: function select, pull resistors, level reads and writes. Edge
//! notification comes from the kernel GPIO character device when present and
//! from sysfs polling otherwise.
//!
//! # Layout
//!
//! - [`hal`]: peripheral address resolution, register mapping, chip revision
//! - [`pins`]: mode and pull control, header numbering, open-pin registry
//! - [`events`]: edge sources, waits and callbacks
//! - [`timer`]: millisecond waits with sub-millisecond precision
//! - [`gpio`]: the [`Gpio`] handle and [`GpioPin`] facade
//! - [`group`]: edge handlers and a bounce window shared by several pins

pub mod config;
pub mod error;
pub mod events;
pub mod gpio;
pub mod group;
pub mod hal;
pub mod pins;
pub mod timer;

pub use config::{BackendPreference, GpioConfig};
pub use error::{GpioError, GpioResult};
pub use events::{
    CallbackId, CancelToken, Edge, EdgeEvent, EdgeMask, InterruptSource, WaitResult,
};
pub use gpio::{Gpio, GpioPin};
pub use group::PinGroup;
pub use hal::{ChipRevision, MemoryDevice, PeripheralAddress};
pub use pins::{
    header_diagram, header_to_logical, logical_to_header, pin_name, PinMode, Pull, PIN_COUNT,
};
