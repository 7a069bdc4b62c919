//! Peripheral base address resolution
//!
//! The GPIO block sits at a fixed offset from the SoC peripheral base, and
//! that base moved with every chip generation. The firmware helper library
//! knows the answer; when it is missing (or returns 0, as older userland on
//! a Pi 4 does) the device-tree `ranges` table is decoded directly.

use byteorder::{BigEndian, ReadBytesExt};
use log::{debug, warn};
use std::ffi::CString;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};

use crate::config::GpioConfig;
use crate::error::{GpioError, GpioResult};

// ============================================================================
// Known addresses
// ============================================================================

/// BCM2835 (Pi 1, Zero)
pub const PERIPHERAL_BASE_BCM2835: u32 = 0x2000_0000;
/// BCM2836/BCM2837 (Pi 2, Pi 3)
pub const PERIPHERAL_BASE_BCM2836: u32 = 0x3F00_0000;
/// BCM2711 (Pi 4, Pi 400, CM4)
pub const PERIPHERAL_BASE_BCM2711: u32 = 0xFE00_0000;
/// Peripheral base as seen from the VideoCore bus, identical on every chip
pub const VIDEOCORE_BUS_BASE: u32 = 0x7E00_0000;
/// GPIO block offset from the peripheral base
pub const GPIO_OFFSET: u32 = 0x0020_0000;

/// SoC family identified by its peripheral base
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipFamily {
    Bcm2835,
    Bcm2836,
    Bcm2711,
}

impl ChipFamily {
    pub fn from_base(base: u32) -> Option<Self> {
        match base {
            PERIPHERAL_BASE_BCM2835 => Some(ChipFamily::Bcm2835),
            PERIPHERAL_BASE_BCM2836 => Some(ChipFamily::Bcm2836),
            PERIPHERAL_BASE_BCM2711 => Some(ChipFamily::Bcm2711),
            _ => None,
        }
    }

    pub fn peripheral_base(self) -> u32 {
        match self {
            ChipFamily::Bcm2835 => PERIPHERAL_BASE_BCM2835,
            ChipFamily::Bcm2836 => PERIPHERAL_BASE_BCM2836,
            ChipFamily::Bcm2711 => PERIPHERAL_BASE_BCM2711,
        }
    }
}

impl fmt::Display for ChipFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChipFamily::Bcm2835 => write!(f, "BCM2835"),
            ChipFamily::Bcm2836 => write!(f, "BCM2836/7"),
            ChipFamily::Bcm2711 => write!(f, "BCM2711"),
        }
    }
}

/// Validated peripheral base address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeripheralAddress {
    family: ChipFamily,
}

impl PeripheralAddress {
    /// Accept only the peripheral bases of known chip families
    pub fn new(base: u32) -> GpioResult<Self> {
        ChipFamily::from_base(base)
            .map(|family| Self { family })
            .ok_or_else(|| {
                GpioError::AddressResolution(format!(
                    "{:#010x} is not a known peripheral base",
                    base
                ))
            })
    }

    pub fn family(&self) -> ChipFamily {
        self.family
    }

    pub fn base(&self) -> u32 {
        self.family.peripheral_base()
    }

    /// Physical address of the GPIO register block, for mapping /dev/mem
    pub fn gpio_address(&self) -> u64 {
        u64::from(self.base()) + u64::from(GPIO_OFFSET)
    }
}

impl fmt::Display for PeripheralAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x} ({})", self.base(), self.family)
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Resolve the peripheral base, firmware helper first
pub fn resolve(config: &GpioConfig) -> GpioResult<PeripheralAddress> {
    match bcm_host_peripheral_address(&config.bcm_host_library) {
        Some(0) => debug!("{} returned 0, reading device tree", config.bcm_host_library),
        Some(base) => match PeripheralAddress::new(base) {
            Ok(address) => {
                debug!("Peripheral base from {}: {}", config.bcm_host_library, address);
                return Ok(address);
            }
            Err(e) => warn!("Ignoring firmware helper result: {}", e),
        },
        None => debug!("{} not available, reading device tree", config.bcm_host_library),
    }

    let file = File::open(&config.ranges_path).map_err(|e| {
        GpioError::AddressResolution(format!(
            "cannot read {}: {}",
            config.ranges_path.display(),
            e
        ))
    })?;
    let address = parse_ranges(BufReader::new(file))?;
    debug!("Peripheral base from {}: {}", config.ranges_path.display(), address);
    Ok(address)
}

/// Decode the first entry of a device-tree `soc/ranges` table
///
/// Layout is big-endian: bus address, then cpu address. A cpu word of 0 is
/// the high half of a 64-bit cpu address and the real value follows.
pub fn parse_ranges<R: Read>(mut reader: R) -> GpioResult<PeripheralAddress> {
    let truncated =
        |e: std::io::Error| GpioError::AddressResolution(format!("ranges table truncated: {}", e));

    let bus = reader.read_u32::<BigEndian>().map_err(truncated)?;
    let mut cpu = reader.read_u32::<BigEndian>().map_err(truncated)?;
    if cpu == 0 {
        cpu = reader.read_u32::<BigEndian>().map_err(truncated)?;
    }

    if bus != VIDEOCORE_BUS_BASE {
        return Err(GpioError::AddressResolution(format!(
            "unexpected bus address {:#010x} in ranges table",
            bus
        )));
    }
    PeripheralAddress::new(cpu)
}

/// Ask the firmware helper library, if it can be loaded
fn bcm_host_peripheral_address(library: &str) -> Option<u32> {
    let name = CString::new(library).ok()?;
    let symbol = b"bcm_host_get_peripheral_address\0";

    // SAFETY: both strings are NUL terminated; the handle is closed before
    // returning and the symbol is only called while the library is loaded.
    unsafe {
        let handle = libc::dlopen(name.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL);
        if handle.is_null() {
            return None;
        }
        let function = libc::dlsym(handle, symbol.as_ptr().cast());
        let result = if function.is_null() {
            None
        } else {
            let get_address: extern "C" fn() -> libc::c_uint = std::mem::transmute(function);
            Some(get_address())
        };
        libc::dlclose(handle);
        result
    }
}
