//! Polling fallback over the legacy sysfs GPIO interface
//!
//! Each pin is exported, set to input with edge triggering on both edges,
//! and its `value` file polled for `POLLPRI`. The kernel reports only the
//! new level, so the edge is inferred from it.

use log::{debug, warn};
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

use super::edge::Edge;
use super::poll_fd;
use super::source::{EdgeLine, EdgeProvider};
use crate::config::GpioConfig;
use crate::error::{GpioError, GpioResult};
use crate::timer;

/// Labels of the SoC GPIO controller across kernel versions
const SOC_CHIP_LABELS: [&str; 3] = ["pinctrl-bcm2835", "pinctrl-bcm2711", "bcm2835_gpio"];

/// udev needs a moment to fix permissions on freshly exported pins
const EXPORT_RETRIES: usize = 50;
const EXPORT_RETRY_MS: f64 = 10.0;

fn sysfs_error(path: &Path, e: io::Error) -> GpioError {
    GpioError::EventBackend(format!("{}: {}", path.display(), e))
}

/// Edge provider over `/sys/class/gpio`
#[derive(Debug)]
pub struct SysfsProvider {
    root: PathBuf,
    base: u32,
}

impl SysfsProvider {
    pub fn open(config: &GpioConfig) -> GpioResult<Self> {
        let root = config.sysfs_root.clone();
        if !root.join("export").exists() {
            return Err(GpioError::EventBackendUnavailable(format!(
                "{} has no export file",
                root.display()
            )));
        }
        let base = find_chip_base(&root);
        debug!("sysfs GPIO at {} with SoC base {}", root.display(), base);
        Ok(Self { root, base })
    }

    /// sysfs number of a BCM pin
    pub fn line_number(&self, pin: u8) -> u32 {
        self.base + u32::from(pin)
    }
}

/// Base number of the SoC controller among the exported gpiochips
///
/// Newer kernels number chips dynamically (often from 512), so the base is
/// read rather than assumed to be 0.
pub fn find_chip_base(root: &Path) -> u32 {
    let mut chips: Vec<(u32, String)> = WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("gpiochip"))
        .filter_map(|entry| {
            let base = fs::read_to_string(entry.path().join("base")).ok()?;
            let base = base.trim().parse::<u32>().ok()?;
            let label = fs::read_to_string(entry.path().join("label")).unwrap_or_default();
            Some((base, label.trim().to_string()))
        })
        .collect();
    chips.sort();

    chips
        .iter()
        .find(|(_, label)| SOC_CHIP_LABELS.contains(&label.as_str()))
        .or_else(|| chips.first())
        .map(|(base, _)| *base)
        .unwrap_or(0)
}

fn write_attribute(path: &Path, value: &str) -> GpioResult<()> {
    let mut last = None;
    for _ in 0..EXPORT_RETRIES {
        match fs::write(path, value) {
            Ok(()) => return Ok(()),
            Err(e) if matches!(e.kind(), io::ErrorKind::PermissionDenied | io::ErrorKind::NotFound) => {
                last = Some(e);
                timer::wait(EXPORT_RETRY_MS);
            }
            Err(e) => return Err(sysfs_error(path, e)),
        }
    }
    let e = last.unwrap_or_else(|| io::Error::from(io::ErrorKind::TimedOut));
    Err(sysfs_error(path, e))
}

impl EdgeProvider for SysfsProvider {
    fn name(&self) -> &'static str {
        "sysfs"
    }

    fn open_line(&self, pin: u8) -> GpioResult<Box<dyn EdgeLine>> {
        let number = self.line_number(pin);
        let dir = self.root.join(format!("gpio{}", number));

        if !dir.exists() {
            let export = self.root.join("export");
            fs::write(&export, number.to_string()).map_err(|e| sysfs_error(&export, e))?;
        }
        write_attribute(&dir.join("direction"), "in")?;
        write_attribute(&dir.join("edge"), "both")?;

        let value_path = dir.join("value");
        let value = File::open(&value_path).map_err(|e| sysfs_error(&value_path, e))?;
        let mut line = SysfsLine {
            root: self.root.clone(),
            number,
            value,
            value_path,
        };
        // Reading clears the notification pending from the configuration.
        line.read_level()?;
        Ok(Box::new(line))
    }
}

struct SysfsLine {
    root: PathBuf,
    number: u32,
    value: File,
    value_path: PathBuf,
}

impl SysfsLine {
    fn read_level(&mut self) -> GpioResult<bool> {
        let mut buf = [0u8; 2];
        self.value
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.value.read(&mut buf))
            .map_err(|e| sysfs_error(&self.value_path, e))?;
        Ok(buf[0] == b'1')
    }
}

impl EdgeLine for SysfsLine {
    fn next_edge(&mut self, timeout: Duration) -> GpioResult<Option<Edge>> {
        let events = libc::POLLPRI | libc::POLLERR;
        if !poll_fd(self.value.as_raw_fd(), events, timeout)? {
            return Ok(None);
        }
        let high = self.read_level()?;
        Ok(Some(Edge::from_level(high)))
    }
}

impl Drop for SysfsLine {
    fn drop(&mut self) {
        let unexport = self.root.join("unexport");
        if let Err(e) = fs::write(&unexport, self.number.to_string()) {
            warn!("Failed to unexport GPIO {}: {}", self.number, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_sysfs(chips: &[(&str, u32, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("export"), "").unwrap();
        fs::write(dir.path().join("unexport"), "").unwrap();
        for (name, base, label) in chips {
            let chip = dir.path().join(name);
            fs::create_dir(&chip).unwrap();
            fs::write(chip.join("base"), format!("{}\n", base)).unwrap();
            fs::write(chip.join("label"), format!("{}\n", label)).unwrap();
        }
        dir
    }

    #[test]
    fn test_find_chip_base_prefers_soc_label() {
        let dir = fake_sysfs(&[
            ("gpiochip504", 504, "raspberrypi-exp-gpio"),
            ("gpiochip512", 512, "pinctrl-bcm2711"),
        ]);
        assert_eq!(find_chip_base(dir.path()), 512);
    }

    #[test]
    fn test_find_chip_base_defaults() {
        let dir = fake_sysfs(&[("gpiochip100", 100, "other"), ("gpiochip0", 0, "x")]);
        assert_eq!(find_chip_base(dir.path()), 0);

        let empty = fake_sysfs(&[]);
        assert_eq!(find_chip_base(empty.path()), 0);
    }

    #[test]
    fn test_open_requires_export() {
        let dir = tempfile::tempdir().unwrap();
        let config = GpioConfig::default().with_sysfs_root(dir.path());
        assert!(matches!(
            SysfsProvider::open(&config),
            Err(GpioError::EventBackendUnavailable(_))
        ));
    }

    #[test]
    fn test_line_configuration_and_unexport() {
        let dir = fake_sysfs(&[("gpiochip512", 512, "pinctrl-bcm2835")]);
        // sysfs would create this on export
        let pin_dir = dir.path().join("gpio529");
        fs::create_dir(&pin_dir).unwrap();
        fs::write(pin_dir.join("direction"), "out").unwrap();
        fs::write(pin_dir.join("edge"), "none").unwrap();
        fs::write(pin_dir.join("value"), "1\n").unwrap();

        let config = GpioConfig::default().with_sysfs_root(dir.path());
        let provider = SysfsProvider::open(&config).unwrap();
        assert_eq!(provider.line_number(17), 529);

        let mut line = provider.open_line(17).unwrap();
        assert_eq!(fs::read_to_string(pin_dir.join("direction")).unwrap(), "in");
        assert_eq!(fs::read_to_string(pin_dir.join("edge")).unwrap(), "both");

        // Regular files never raise POLLPRI
        assert_eq!(line.next_edge(Duration::from_millis(10)).unwrap(), None);

        drop(line);
        assert_eq!(
            fs::read_to_string(dir.path().join("unexport")).unwrap(),
            "529"
        );
    }
}
