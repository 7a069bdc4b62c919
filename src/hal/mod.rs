//! Hardware access: address resolution, register mapping, revision detection

pub mod address;
pub mod mapping;
pub mod registers;
pub mod revision;

#[cfg(test)]
pub mod fake;

pub use address::{ChipFamily, PeripheralAddress};
pub use mapping::{MemoryDevice, RegisterMap};
pub use registers::{MappedRegisters, Register, RegisterAccess};
pub use revision::ChipRevision;
