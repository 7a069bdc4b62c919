//! Pin configuration, level I/O and open-pin tracking

pub mod controller;
pub mod header;
pub mod registry;

pub use controller::{PinController, PinMode, Pull, PullProtocol};
pub use header::{header_diagram, header_to_logical, logical_to_header, pin_name};
pub use registry::{PinRegistry, PinState};

/// GPIO pins broken out on the 40-pin header (BCM 0..=27)
pub const PIN_COUNT: usize = 28;
