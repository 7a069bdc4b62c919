//! GPIO register layout and volatile access
//!
//! One 4 KiB page holds the whole GPIO block on BCM2835 through BCM2711:
//!
//! | Offset | Register                    | Notes                    |
//! |--------|-----------------------------|--------------------------|
//! | 0x00   | GPFSEL0..5                  | 3 bits/pin, 10 pins/reg  |
//! | 0x1C   | GPSET0..1                   | write-1-to-set           |
//! | 0x28   | GPCLR0..1                   | write-1-to-clear         |
//! | 0x34   | GPLEV0..1                   | read-only level          |
//! | 0x94   | GPPUD                       | BCM2835/6/7 pull control |
//! | 0x98   | GPPUDCLK0..1                | BCM2835/6/7 pull clock   |
//! | 0xE4   | GPIO_PUP_PDN_CNTRL_REG0..3  | BCM2711 direct pull      |

use std::fmt;
use std::ptr::NonNull;

const GPFSEL: [usize; 6] = [0x00, 0x04, 0x08, 0x0C, 0x10, 0x14];
const GPSET: [usize; 2] = [0x1C, 0x20];
const GPCLR: [usize; 2] = [0x28, 0x2C];
const GPLEV: [usize; 2] = [0x34, 0x38];
const GPPUD: usize = 0x94;
const GPPUDCLK: [usize; 2] = [0x98, 0x9C];
const GPPUPPDN: [usize; 4] = [0xE4, 0xE8, 0xEC, 0xF0];

/// Bytes of the page actually used by the register block
pub const REGISTER_SPAN: usize = 0xF4;

/// A 32-bit register in the GPIO block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    FunctionSelect(usize),
    Set(usize),
    Clear(usize),
    Level(usize),
    PullControl,
    PullClock(usize),
    PullConfig(usize),
}

impl Register {
    /// Byte offset from the start of the GPIO block
    ///
    /// Panics on an index past the end of its register group, the same way
    /// slice indexing does.
    pub fn offset(self) -> usize {
        match self {
            Register::FunctionSelect(n) => GPFSEL[n],
            Register::Set(n) => GPSET[n],
            Register::Clear(n) => GPCLR[n],
            Register::Level(n) => GPLEV[n],
            Register::PullControl => GPPUD,
            Register::PullClock(n) => GPPUDCLK[n],
            Register::PullConfig(n) => GPPUPPDN[n],
        }
    }

    /// Registers that hold readable state, in address order
    pub fn readable() -> Vec<Register> {
        let mut regs: Vec<Register> = (0..GPFSEL.len()).map(Register::FunctionSelect).collect();
        regs.extend((0..GPLEV.len()).map(Register::Level));
        regs.push(Register::PullControl);
        regs.extend((0..GPPUDCLK.len()).map(Register::PullClock));
        regs.extend((0..GPPUPPDN.len()).map(Register::PullConfig));
        regs
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::FunctionSelect(n) => write!(f, "GPFSEL{}", n),
            Register::Set(n) => write!(f, "GPSET{}", n),
            Register::Clear(n) => write!(f, "GPCLR{}", n),
            Register::Level(n) => write!(f, "GPLEV{}", n),
            Register::PullControl => write!(f, "GPPUD"),
            Register::PullClock(n) => write!(f, "GPPUDCLK{}", n),
            Register::PullConfig(n) => write!(f, "GPIO_PUP_PDN_CNTRL_REG{}", n),
        }
    }
}

/// Word-level access to the GPIO register block
///
/// Every call must reach the device: implementations never cache values.
pub trait RegisterAccess: Send + Sync {
    fn read(&self, reg: Register) -> u32;

    fn write(&self, reg: Register, value: u32);

    /// Read-modify-write: clear `clear` bits, then set `set` bits
    fn update(&self, reg: Register, clear: u32, set: u32) {
        let value = self.read(reg);
        self.write(reg, (value & !clear) | set);
    }
}

/// Volatile view over a mapped register page
///
/// Owns the mapping and unmaps it on drop.
pub struct MappedRegisters {
    base: NonNull<u32>,
    len: usize,
}

// The page is device memory shared with hardware; the hardware defines
// atomicity per aligned 32-bit word.
unsafe impl Send for MappedRegisters {}
unsafe impl Sync for MappedRegisters {}

impl MappedRegisters {
    /// Wrap an existing mapping
    ///
    /// # Safety
    /// `base` must be the page-aligned start of a live `mmap` of `len` bytes
    /// that nothing else will unmap. Ownership of the mapping moves here.
    pub unsafe fn from_raw(base: NonNull<u32>, len: usize) -> Self {
        Self { base, len }
    }

    /// Size of the mapping in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn word(&self, reg: Register) -> *mut u32 {
        let offset = reg.offset();
        assert!(
            offset + 4 <= self.len,
            "{} at {:#x} lies outside the {}-byte mapping",
            reg,
            offset,
            self.len
        );
        // SAFETY: offset is word aligned and bounds checked above.
        unsafe { self.base.as_ptr().add(offset / 4) }
    }
}

impl RegisterAccess for MappedRegisters {
    fn read(&self, reg: Register) -> u32 {
        // SAFETY: word() returns an aligned in-bounds pointer into our mapping.
        unsafe { core::ptr::read_volatile(self.word(reg)) }
    }

    fn write(&self, reg: Register, value: u32) {
        // SAFETY: as above.
        unsafe { core::ptr::write_volatile(self.word(reg), value) }
    }
}

impl Drop for MappedRegisters {
    fn drop(&mut self) {
        // SAFETY: we own the mapping created with exactly this base and len.
        let rc = unsafe { libc::munmap(self.base.as_ptr().cast(), self.len) };
        if rc != 0 {
            log::warn!(
                "munmap of GPIO registers failed: {}",
                std::io::Error::last_os_error()
            );
        }
    }
}

impl fmt::Debug for MappedRegisters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedRegisters")
            .field("base", &self.base)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_offsets() {
        assert_eq!(Register::FunctionSelect(0).offset(), 0x00);
        assert_eq!(Register::FunctionSelect(5).offset(), 0x14);
        assert_eq!(Register::Set(1).offset(), 0x20);
        assert_eq!(Register::Clear(0).offset(), 0x28);
        assert_eq!(Register::Level(1).offset(), 0x38);
        assert_eq!(Register::PullControl.offset(), 0x94);
        assert_eq!(Register::PullClock(1).offset(), 0x9C);
        assert_eq!(Register::PullConfig(3).offset(), 0xF0);
        assert!(Register::PullConfig(3).offset() + 4 <= REGISTER_SPAN);
    }

    #[test]
    #[should_panic]
    fn test_register_index_out_of_group() {
        Register::FunctionSelect(6).offset();
    }

    #[test]
    fn test_register_names() {
        assert_eq!(Register::FunctionSelect(2).to_string(), "GPFSEL2");
        assert_eq!(Register::PullClock(0).to_string(), "GPPUDCLK0");
        assert_eq!(Register::PullConfig(1).to_string(), "GPIO_PUP_PDN_CNTRL_REG1");
    }

    #[test]
    fn test_mapped_registers_over_anonymous_page() {
        let len = 4096;
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        assert_ne!(ptr, libc::MAP_FAILED);
        let regs = unsafe { MappedRegisters::from_raw(NonNull::new(ptr.cast()).unwrap(), len) };

        regs.write(Register::FunctionSelect(1), 0b001 << 21);
        regs.update(Register::FunctionSelect(1), 0b111 << 21, 0b100 << 21);
        assert_eq!(regs.read(Register::FunctionSelect(1)), 0b100 << 21);
        assert_eq!(regs.read(Register::FunctionSelect(0)), 0);
        assert_eq!(regs.len(), 4096);
    }

    #[test]
    #[should_panic]
    fn test_mapped_registers_bounds_checked() {
        let len = 4096;
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        // Pretend the mapping is shorter than the register block.
        let regs = unsafe { MappedRegisters::from_raw(NonNull::new(ptr.cast()).unwrap(), 0x40) };
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            regs.read(Register::PullControl)
        }));
        // Unmap the real length before re-raising so the page is not leaked.
        std::mem::forget(regs);
        unsafe { libc::munmap(ptr, len) };
        if let Err(panic) = result {
            std::panic::resume_unwind(panic);
        }
    }
}
