//! Board revision detection
//!
//! BCM2711 replaced the clocked GPPUD/GPPUDCLK pull sequence with directly
//! written 2-bit fields, so the pull protocol depends on the chip.

use log::{debug, warn};
use std::fmt;
use std::fs;
use std::path::Path;

use super::address::{ChipFamily, PeripheralAddress};

/// Model strings of BCM2711 boards
const DIRECT_PULL_MODELS: [&str; 3] = ["Raspberry Pi 4", "Raspberry Pi 400", "Compute Module 4"];

/// Pull-resistor register protocol family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipRevision {
    /// BCM2835/6/7: GPPUD plus GPPUDCLK clocking
    Legacy,
    /// BCM2711: GPIO_PUP_PDN_CNTRL fields
    Direct,
}

impl fmt::Display for ChipRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChipRevision::Legacy => write!(f, "legacy (GPPUD clocked)"),
            ChipRevision::Direct => write!(f, "direct (BCM2711)"),
        }
    }
}

impl ChipRevision {
    /// Classify a device-tree model string
    pub fn from_model(model: &str) -> Self {
        let model = model.trim_end_matches('\0');
        if DIRECT_PULL_MODELS.iter().any(|m| model.contains(m)) {
            ChipRevision::Direct
        } else {
            ChipRevision::Legacy
        }
    }

    /// Detect from the model file, then from a known peripheral base
    ///
    /// An unreadable model file is not fatal: the board is assumed to be
    /// a legacy chip unless the address says otherwise.
    pub fn detect(model_path: &Path, address: Option<&PeripheralAddress>) -> Self {
        let from_address = match address.map(PeripheralAddress::family) {
            Some(ChipFamily::Bcm2711) => Some(ChipRevision::Direct),
            _ => None,
        };

        match fs::read(model_path) {
            Ok(bytes) => {
                let model = String::from_utf8_lossy(&bytes);
                let revision = Self::from_model(&model);
                debug!("Board model {:?}: {}", model.trim_end_matches('\0'), revision);
                from_address.unwrap_or(revision)
            }
            Err(e) => {
                let revision = from_address.unwrap_or(ChipRevision::Legacy);
                warn!(
                    "Cannot read {} ({}), assuming {} pull protocol",
                    model_path.display(),
                    e,
                    revision
                );
                revision
            }
        }
    }
}
