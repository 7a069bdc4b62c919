//! Register page mapping
//!
//! `/dev/gpiomem` exposes just the GPIO page to members of the `gpio` group
//! and is always preferred. Only when it does not exist at all is
//! `/dev/mem` tried, which needs root and the physical address of the
//! block. Any other failure on `/dev/gpiomem` (usually permissions) is
//! reported as is rather than escalating to `/dev/mem`.
//!
//! The mapping is created once per process and shared. It is unmapped when
//! the last handle drops.

use log::{debug, info};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr::{self, NonNull};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use super::address::{self, PeripheralAddress};
use super::registers::{MappedRegisters, Register, RegisterAccess, REGISTER_SPAN};
use super::revision::ChipRevision;
use crate::config::GpioConfig;
use crate::error::{GpioError, GpioResult};

static MAPPING: Mutex<Weak<RegisterMap>> = Mutex::new(Weak::new());

/// Device the register page was mapped from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryDevice {
    GpioMem,
    Mem,
}

impl fmt::Display for MemoryDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryDevice::GpioMem => write!(f, "gpiomem"),
            MemoryDevice::Mem => write!(f, "mem"),
        }
    }
}

/// The mapped GPIO register page plus what was learned while mapping it
#[derive(Debug)]
pub struct RegisterMap {
    registers: MappedRegisters,
    device: MemoryDevice,
    address: Option<PeripheralAddress>,
    revision: ChipRevision,
}

impl RegisterMap {
    /// Shared process-wide mapping, created on first use
    ///
    /// Later calls reuse the live mapping and ignore their configuration.
    pub fn shared(config: &GpioConfig) -> GpioResult<Arc<RegisterMap>> {
        let mut cached = MAPPING.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(map) = cached.upgrade() {
            return Ok(map);
        }
        let map = Arc::new(Self::map(config)?);
        *cached = Arc::downgrade(&map);
        Ok(map)
    }

    /// Open the memory device and map the register page
    pub fn map(config: &GpioConfig) -> GpioResult<Self> {
        let (file, device, offset, address) = match open_device(&config.gpiomem_path)? {
            Some(file) => (file, MemoryDevice::GpioMem, 0u64, None),
            None => {
                debug!(
                    "{} not present, falling back to {}",
                    config.gpiomem_path.display(),
                    config.mem_path.display()
                );
                let file = open_device(&config.mem_path)?.ok_or_else(|| {
                    GpioError::DeviceUnavailable {
                        path: config.mem_path.clone(),
                        source: io::Error::from(io::ErrorKind::NotFound),
                    }
                })?;
                let address = address::resolve(config)?;
                (file, MemoryDevice::Mem, address.gpio_address(), Some(address))
            }
        };

        let registers = map_page(&file, offset)?;
        // The mapping outlives the descriptor.
        drop(file);

        let revision = ChipRevision::detect(&config.model_path, address.as_ref());
        info!(
            "Mapped GPIO registers from {} at offset {:#x} ({} bytes, {} pull protocol)",
            device,
            offset,
            registers.len(),
            revision
        );

        Ok(Self {
            registers,
            device,
            address,
            revision,
        })
    }

    pub fn device(&self) -> MemoryDevice {
        self.device
    }

    /// Peripheral base, known only when mapped through /dev/mem
    pub fn address(&self) -> Option<PeripheralAddress> {
        self.address
    }

    pub fn revision(&self) -> ChipRevision {
        self.revision
    }
}

impl RegisterAccess for RegisterMap {
    fn read(&self, reg: Register) -> u32 {
        self.registers.read(reg)
    }

    fn write(&self, reg: Register, value: u32) {
        self.registers.write(reg, value)
    }
}

/// Open a memory device read/write and synchronous
///
/// `Ok(None)` means the device node does not exist.
fn open_device(path: &Path) -> GpioResult<Option<File>> {
    let result = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_SYNC)
        .open(path);

    match result {
        Ok(file) => Ok(Some(file)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            Err(GpioError::PermissionDenied {
                path: path.to_path_buf(),
                source: e,
            })
        }
        Err(e) => Err(GpioError::DeviceUnavailable {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

fn page_size() -> usize {
    // SAFETY: sysconf has no memory-safety preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as usize
    }
}

fn map_page(file: &File, offset: u64) -> GpioResult<MappedRegisters> {
    let len = page_size().max(REGISTER_SPAN);
    let file_offset = libc::off_t::try_from(offset).map_err(|_| GpioError::Mapping {
        offset,
        source: io::Error::from(io::ErrorKind::InvalidInput),
    })?;

    // SAFETY: fresh shared mapping of an open descriptor; no existing memory
    // is affected.
    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            file.as_raw_fd(),
            file_offset,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(GpioError::Mapping {
            offset,
            source: io::Error::last_os_error(),
        });
    }
    let base = NonNull::new(ptr.cast::<u32>()).ok_or_else(|| GpioError::Mapping {
        offset,
        source: io::Error::from(io::ErrorKind::InvalidData),
    })?;

    // SAFETY: base/len describe the mapping just created, owned from here on.
    Ok(unsafe { MappedRegisters::from_raw(base, len) })
}
