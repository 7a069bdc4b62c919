//! GPIO core configuration
//!
//! Every filesystem path the core touches lives here so that tests and
//! unusual distributions can redirect them. Loaded from TOML; missing keys
//! fall back to the standard Raspberry Pi OS locations.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{GpioError, GpioResult};

/// Unprivileged GPIO-only register window
pub const GPIOMEM_PATH: &str = "/dev/gpiomem";
/// Whole physical memory (requires root)
pub const MEM_PATH: &str = "/dev/mem";
/// Device-tree bus/cpu address translation table
pub const RANGES_PATH: &str = "/proc/device-tree/soc/ranges";
/// Board model string
pub const MODEL_PATH: &str = "/proc/device-tree/model";
/// Firmware helper library exporting bcm_host_get_peripheral_address
pub const BCM_HOST_LIBRARY: &str = "libbcm_host.so";
/// GPIO character device for native edge events
pub const CHIP_PATH: &str = "/dev/gpiochip0";
/// Legacy sysfs GPIO interface used by the polling backend
pub const SYSFS_ROOT: &str = "/sys/class/gpio";

/// Which edge event backend to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Native character device, falling back to sysfs polling
    #[default]
    Auto,
    /// Native character device only
    Native,
    /// sysfs polling only
    Polling,
}

/// Configuration for the GPIO core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpioConfig {
    pub gpiomem_path: PathBuf,
    pub mem_path: PathBuf,
    pub ranges_path: PathBuf,
    pub model_path: PathBuf,
    pub bcm_host_library: String,
    pub chip_path: PathBuf,
    pub sysfs_root: PathBuf,
    pub event_backend: BackendPreference,
    /// Edges closer than this to the previous clean edge are marked bounced
    pub bounce_delay_ms: f64,
    /// Setup/hold time for the legacy pull-resistor clocking sequence
    pub pull_settle_us: u64,
    /// Consumer label reported to the kernel for requested lines
    pub consumer: String,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            gpiomem_path: PathBuf::from(GPIOMEM_PATH),
            mem_path: PathBuf::from(MEM_PATH),
            ranges_path: PathBuf::from(RANGES_PATH),
            model_path: PathBuf::from(MODEL_PATH),
            bcm_host_library: BCM_HOST_LIBRARY.to_string(),
            chip_path: PathBuf::from(CHIP_PATH),
            sysfs_root: PathBuf::from(SYSFS_ROOT),
            event_backend: BackendPreference::Auto,
            bounce_delay_ms: 30.0,
            pull_settle_us: 5,
            consumer: String::from("rpi-gpio"),
        }
    }
}

impl GpioConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> GpioResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> GpioResult<Self> {
        let config: GpioConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> GpioResult<()> {
        if !self.bounce_delay_ms.is_finite() || self.bounce_delay_ms < 0.0 {
            return Err(GpioError::InvalidConfig(format!(
                "bounce_delay_ms must be a non-negative number, got {}",
                self.bounce_delay_ms
            )));
        }
        Ok(())
    }

    /// Set the edge event backend preference
    pub fn with_event_backend(mut self, backend: BackendPreference) -> Self {
        self.event_backend = backend;
        self
    }

    /// Set the debounce window
    pub fn with_bounce_delay_ms(mut self, delay: f64) -> Self {
        self.bounce_delay_ms = delay;
        self
    }

    /// Redirect all device-tree lookups under a root directory
    pub fn with_device_tree_root(mut self, root: &Path) -> Self {
        self.ranges_path = root.join("soc/ranges");
        self.model_path = root.join("model");
        self
    }

    /// Set the sysfs GPIO root
    pub fn with_sysfs_root(mut self, root: &Path) -> Self {
        self.sysfs_root = root.to_path_buf();
        self
    }

    /// Set the GPIO character device path
    pub fn with_chip_path(mut self, path: &Path) -> Self {
        self.chip_path = path.to_path_buf();
        self
    }
}
