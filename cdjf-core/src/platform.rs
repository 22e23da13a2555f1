//! Provides platform-specific functionality.
//!
//! Everything that has to talk to the operating system (probing a drive,
//! erasing it with the native tool, ejecting it) goes through the
//! [`DeviceDriver`] trait. The benchmark, verifier and format orchestrator
//! only ever see `&dyn DeviceDriver`, so they carry no platform checks of their
//! own and can be driven by a mock in tests.
//!
//! All drivers build on every target; [`native`] picks the one that matches
//! the running system.

pub mod command;
pub mod linux;
pub mod macos;
pub mod windows;

use crate::device::{ClusterSize, Device};
use crate::error::DeviceError;
use crate::translate::ProgressTable;
use std::collections::HashSet;
use std::path::PathBuf;

pub use self::linux::LinuxDriver;
pub use self::macos::MacDriver;
pub use self::windows::WindowsDriver;

/// Device capabilities the rest of the library depends on.
pub trait DeviceDriver: Send + Sync {
    /// Checks the shape of an identifier (`diskN`, `X:`, `/dev/sdX`).
    fn validate_identifier(&self, device: &str) -> Result<(), DeviceError>;

    fn is_removable(&self, device: &str) -> bool;

    fn is_system_drive(&self, device: &str) -> bool;

    /// The directory the device's volume is mounted at.
    fn mount_point(&self, device: &str) -> Result<PathBuf, DeviceError>;

    /// Size in GB, or zero when it cannot be determined.
    fn size_gb(&self, device: &str) -> f64;

    /// Upper-cased labels of currently visible volumes, ignoring `exclude`.
    fn existing_labels(&self, exclude: &str) -> HashSet<String>;

    /// Erases `device` to a single FAT32 volume named `label`, handing each
    /// line of tool output to `on_line`. Blocks until the tool exits.
    fn erase(
        &self,
        device: &str,
        label: &str,
        cluster: Option<ClusterSize>,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<(), DeviceError>;

    fn eject(&self, device: &str) -> Result<(), DeviceError>;

    /// Removable devices currently attached.
    fn list_devices(&self) -> Result<Vec<Device>, DeviceError>;

    /// Phrase table for this platform's erase tool output.
    fn progress_table(&self) -> ProgressTable;

    /// Human-readable `(field, value)` pairs about `device`.
    fn describe(&self, device: &str) -> Result<Vec<(String, String)>, DeviceError>;

    /// An identifier in this platform's format, for usage hints.
    fn example_identifier(&self) -> &'static str;

    /// Refuses system drives and anything not removable.
    fn ensure_removable(&self, device: &str) -> Result<(), DeviceError> {
        if self.is_system_drive(device) {
            return Err(DeviceError::SystemDrive(device.to_string()));
        }
        if !self.is_removable(device) {
            return Err(DeviceError::NotRemovable(device.to_string()));
        }
        Ok(())
    }
}

/// The driver for the operating system this binary was built for.
pub fn native() -> Result<Box<dyn DeviceDriver>, DeviceError> {
    #[cfg(target_os = "macos")]
    return Ok(Box::new(MacDriver::new()));

    #[cfg(target_os = "windows")]
    return Ok(Box::new(WindowsDriver::new()));

    #[cfg(target_os = "linux")]
    return Ok(Box::new(LinuxDriver::new()));

    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    return Err(DeviceError::Unsupported(std::env::consts::OS));
}

/// Parses `"NN.N GB"`-style sizes into GB. Unknown text is zero.
pub(crate) fn parse_size_gb(text: &str) -> f64 {
    let mut parts = text.split_whitespace();
    while let Some(token) = parts.next() {
        let Ok(value) = token.parse::<f64>() else {
            continue;
        };
        let unit = parts.next().unwrap_or("");
        return match unit {
            "TB" => value * 1024.0,
            "GB" => value,
            "MB" => value / 1024.0,
            "KB" => value / (1024.0 * 1024.0),
            "Bytes" => value / (1024.0 * 1024.0 * 1024.0),
            _ => continue,
        };
    }
    0.0
}

/// Bytes as GB (GiB).
pub(crate) fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0 * 1024.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Fake {
        system: bool,
        removable: bool,
        probes: Mutex<Vec<&'static str>>,
    }

    impl DeviceDriver for Fake {
        fn validate_identifier(&self, _: &str) -> Result<(), DeviceError> {
            Ok(())
        }
        fn is_removable(&self, _: &str) -> bool {
            self.probes.lock().unwrap().push("removable");
            self.removable
        }
        fn is_system_drive(&self, _: &str) -> bool {
            self.probes.lock().unwrap().push("system");
            self.system
        }
        fn mount_point(&self, device: &str) -> Result<PathBuf, DeviceError> {
            Err(DeviceError::NotMounted(device.to_string()))
        }
        fn size_gb(&self, _: &str) -> f64 {
            0.0
        }
        fn existing_labels(&self, _: &str) -> HashSet<String> {
            HashSet::new()
        }
        fn erase(
            &self,
            _: &str,
            _: &str,
            _: Option<ClusterSize>,
            _: &mut dyn FnMut(&str),
        ) -> Result<(), DeviceError> {
            Ok(())
        }
        fn eject(&self, _: &str) -> Result<(), DeviceError> {
            Ok(())
        }
        fn list_devices(&self) -> Result<Vec<Device>, DeviceError> {
            Ok(Vec::new())
        }
        fn progress_table(&self) -> ProgressTable {
            ProgressTable::new(Vec::<(String, u64)>::new())
        }
        fn describe(&self, _: &str) -> Result<Vec<(String, String)>, DeviceError> {
            Ok(Vec::new())
        }
        fn example_identifier(&self) -> &'static str {
            "fake0"
        }
    }

    fn fake(system: bool, removable: bool) -> Fake {
        Fake {
            system,
            removable,
            probes: Mutex::new(Vec::new()),
        }
    }

    #[test]
    fn system_drive_check_comes_first() {
        let driver = fake(true, true);
        assert!(matches!(
            driver.ensure_removable("x"),
            Err(DeviceError::SystemDrive(_))
        ));
        assert_eq!(*driver.probes.lock().unwrap(), vec!["system"]);
    }

    #[test]
    fn fixed_drives_are_refused() {
        assert!(matches!(
            fake(false, false).ensure_removable("x"),
            Err(DeviceError::NotRemovable(_))
        ));
        assert!(fake(false, true).ensure_removable("x").is_ok());
    }

    #[test]
    fn sizes_parse_with_units() {
        assert_eq!(parse_size_gb("15.5 GB (15518924800 Bytes) (exactly 30310400 512-Byte-Units)"), 15.5);
        assert_eq!(parse_size_gb("2.0 TB"), 2048.0);
        assert_eq!(parse_size_gb("512.0 MB"), 0.5);
        assert_eq!(parse_size_gb("unknown"), 0.0);
        assert_eq!(parse_size_gb(""), 0.0);
    }
}
