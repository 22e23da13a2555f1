use super::command::{args, run_captured, run_streaming};
use super::{DeviceDriver, parse_size_gb};
use crate::device::{ClusterSize, Device};
use crate::error::DeviceError;
use crate::translate::ProgressTable;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

const VOLUMES_DIR: &str = "/Volumes";

/// Fields shown by `describe`, in `diskutil info` order.
const DESCRIBE_FIELDS: [&str; 8] = [
    "Device / Media Name",
    "Volume Name",
    "File System Personality",
    "Disk Size",
    "Volume Free Space",
    "Volume Used Space",
    "Internal",
    "Removable Media",
];

/// Drives disks through `diskutil`.
#[derive(Debug)]
pub struct MacDriver {
    disk_id: Regex,
}

impl Default for MacDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MacDriver {
    pub fn new() -> Self {
        Self {
            disk_id: Regex::new(r"/dev/(disk\d+)").expect("disk id pattern is a valid regex"),
        }
    }

    fn info(&self, device: &str) -> Result<DiskInfo, DeviceError> {
        run_captured("diskutil", &args(["info", device])).map(|out| DiskInfo::parse(&out))
    }

    fn external_disks(&self) -> Result<Vec<String>, DeviceError> {
        let out = run_captured("diskutil", &args(["list", "external", "physical"]))?;
        let mut ids: Vec<String> = self
            .disk_id
            .captures_iter(&out)
            .map(|c| c[1].to_string())
            .collect();
        ids.dedup();
        Ok(ids)
    }

    /// The volume of `device` itself, or of its first slice.
    fn volume_info(&self, device: &str) -> Option<DiskInfo> {
        [device.to_string(), format!("{}s1", device)]
            .iter()
            .filter_map(|id| self.info(id).ok())
            .find(|info| info.mount_point().is_some())
    }
}

impl DeviceDriver for MacDriver {
    fn validate_identifier(&self, device: &str) -> Result<(), DeviceError> {
        match device.strip_prefix("disk") {
            Some(rest) if !rest.is_empty() => Ok(()),
            _ => Err(DeviceError::InvalidIdentifier {
                device: device.to_string(),
                expected: "diskN (e.g., disk2)",
            }),
        }
    }

    fn is_removable(&self, device: &str) -> bool {
        self.info(device).map(|i| i.is_removable()).unwrap_or(false)
    }

    fn is_system_drive(&self, device: &str) -> bool {
        self.info(device).map(|i| i.is_system()).unwrap_or(false)
    }

    fn mount_point(&self, device: &str) -> Result<PathBuf, DeviceError> {
        let mount = self
            .volume_info(device)
            .and_then(|info| info.mount_point())
            .ok_or_else(|| DeviceError::NotMounted(device.to_string()))?;
        fs::metadata(&mount).map_err(|source| DeviceError::MountPointUnavailable {
            path: mount.clone(),
            source,
        })?;
        Ok(mount)
    }

    fn size_gb(&self, device: &str) -> f64 {
        self.info(device)
            .ok()
            .and_then(|i| i.get("Disk Size").map(parse_size_gb))
            .unwrap_or(0.0)
    }

    fn existing_labels(&self, exclude: &str) -> HashSet<String> {
        let own = if exclude.is_empty() {
            None
        } else {
            self.volume_info(exclude).and_then(|i| i.mount_point())
        };
        let Ok(entries) = fs::read_dir(VOLUMES_DIR) else {
            return HashSet::new();
        };
        entries
            .filter_map(Result::ok)
            .filter(|e| own.as_deref() != Some(e.path().as_path()))
            .map(|e| e.file_name().to_string_lossy().to_uppercase())
            .collect()
    }

    fn erase(
        &self,
        device: &str,
        label: &str,
        cluster: Option<ClusterSize>,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<(), DeviceError> {
        if cluster.is_some() {
            on_line("Note: custom cluster size is not currently supported on macOS; using default size.");
        }
        on_line("Unmounting device...");
        run_captured("diskutil", &args(["unmountDisk", device]))?;

        on_line("Creating FAT32 filesystem...");
        run_streaming(
            "diskutil",
            &args(["eraseDisk", "FAT32", label, "MBR", device]),
            on_line,
        )
    }

    fn eject(&self, device: &str) -> Result<(), DeviceError> {
        run_captured("diskutil", &args(["eject", device])).map(|_| ())
    }

    fn list_devices(&self) -> Result<Vec<Device>, DeviceError> {
        let mut devices = Vec::new();
        for id in self.external_disks()? {
            let Ok(info) = self.info(&id) else {
                continue;
            };
            if info.is_system() {
                continue;
            }
            let volume = self.volume_info(&id);
            devices.push(Device {
                size_gb: info.get("Disk Size").map(parse_size_gb).unwrap_or(0.0),
                mount_point: volume.as_ref().and_then(|v| v.mount_point()),
                label: volume
                    .as_ref()
                    .and_then(|v| v.get("Volume Name"))
                    .filter(|name| !name.is_empty())
                    .map(str::to_string),
                model: info.get("Device / Media Name").unwrap_or("").to_string(),
                id,
            });
        }
        Ok(devices)
    }

    fn progress_table(&self) -> ProgressTable {
        ProgressTable::diskutil()
    }

    fn describe(&self, device: &str) -> Result<Vec<(String, String)>, DeviceError> {
        let info = self.info(device)?;
        Ok(DESCRIBE_FIELDS
            .iter()
            .filter_map(|field| info.get(field).map(|v| (field.to_string(), v.to_string())))
            .collect())
    }

    fn example_identifier(&self) -> &'static str {
        "disk2"
    }
}

/// `Key: Value` pairs from `diskutil info`.
#[derive(Debug, Default, Clone)]
struct DiskInfo {
    fields: Vec<(String, String)>,
}

impl DiskInfo {
    fn parse(output: &str) -> Self {
        let fields = output
            .lines()
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .filter(|(k, _)| !k.is_empty())
            .collect();
        Self { fields }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn yes(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| v.starts_with("Yes"))
    }

    fn internal(&self) -> bool {
        self.yes("Internal") || self.get("Device Location") == Some("Internal")
    }

    fn is_system(&self) -> bool {
        self.internal() || self.yes("System Image")
    }

    fn is_removable(&self) -> bool {
        !self.internal()
            && (self.yes("Removable Media")
                || self.get("Removable Media") == Some("Removable")
                || self.yes("Ejectable")
                || self.yes("External")
                || self.get("Device Location") == Some("External"))
    }

    fn mount_point(&self) -> Option<PathBuf> {
        self.get("Mount Point")
            .filter(|mp| !mp.is_empty() && !mp.to_ascii_lowercase().starts_with("not "))
            .map(|mp| Path::new(mp).to_path_buf())
    }
}
