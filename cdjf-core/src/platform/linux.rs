use super::command::{args, run_captured, run_streaming};
use super::{DeviceDriver, bytes_to_gb};
use crate::device::{ClusterSize, Device};
use crate::error::DeviceError;
use crate::translate::ProgressTable;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const BY_LABEL_DIR: &str = "/dev/disk/by-label";

/// Drives whole block devices (`/dev/sdX`, `/dev/mmcblkN`) with `parted` and
/// `mkfs.fat`.
#[derive(Debug, Default)]
pub struct LinuxDriver;

impl LinuxDriver {
    pub fn new() -> Self {
        Self
    }

    fn kernel_name(device: &str) -> &str {
        device.strip_prefix("/dev/").unwrap_or(device)
    }

    /// Mount points of every mounted partition of `device`.
    fn mounted_partitions(device: &str) -> Vec<(String, PathBuf)> {
        let name = Self::kernel_name(device);
        let disks = sysinfo::Disks::new_with_refreshed_list();
        disks
            .iter()
            .filter_map(|disk| {
                let disk_name = disk.name().to_string_lossy();
                let part = disk_name.strip_prefix("/dev/").unwrap_or(&disk_name);
                (part.starts_with(name) && !disk.mount_point().as_os_str().is_empty())
                    .then(|| (part.to_string(), disk.mount_point().to_path_buf()))
            })
            .collect()
    }

    fn system_disk_parent() -> Option<PathBuf> {
        let disks = sysinfo::Disks::new_with_refreshed_list();
        disks
            .iter()
            .find(|disk| disk.mount_point() == Path::new("/"))
            .map(|disk| get_parent_device_path(&PathBuf::from("/dev/").join(disk.name())))
    }

    fn sectors(name: &str) -> u64 {
        read_sys_file(name, "size")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0)
    }

    fn labels_with_targets() -> Vec<(String, PathBuf)> {
        let Ok(entries) = fs::read_dir(BY_LABEL_DIR) else {
            return Vec::new();
        };
        entries
            .filter_map(Result::ok)
            .map(|entry| {
                let label = decode_label(&entry.file_name().to_string_lossy());
                let target = fs::canonicalize(entry.path()).unwrap_or_else(|_| entry.path());
                (label, target)
            })
            .collect()
    }
}

impl DeviceDriver for LinuxDriver {
    fn validate_identifier(&self, device: &str) -> Result<(), DeviceError> {
        let ok = device
            .strip_prefix("/dev/")
            .is_some_and(|name| !name.is_empty() && !name.contains('/'));
        if ok {
            Ok(())
        } else {
            Err(DeviceError::InvalidIdentifier {
                device: device.to_string(),
                expected: "/dev/NAME (e.g., /dev/sdb)",
            })
        }
    }

    fn is_removable(&self, device: &str) -> bool {
        let name = Self::kernel_name(device);
        read_sys_file(name, "removable")
            .map(|s| s == "1")
            .unwrap_or(false)
    }

    fn is_system_drive(&self, device: &str) -> bool {
        match Self::system_disk_parent() {
            Some(parent) => get_parent_device_path(Path::new(device)) == parent,
            None => {
                log::warn!("could not determine the system drive");
                false
            }
        }
    }

    fn mount_point(&self, device: &str) -> Result<PathBuf, DeviceError> {
        let (_, mount) = Self::mounted_partitions(device)
            .into_iter()
            .next()
            .ok_or_else(|| DeviceError::NotMounted(device.to_string()))?;
        fs::metadata(&mount).map_err(|source| DeviceError::MountPointUnavailable {
            path: mount.clone(),
            source,
        })?;
        Ok(mount)
    }

    fn size_gb(&self, device: &str) -> f64 {
        bytes_to_gb(Self::sectors(Self::kernel_name(device)) * 512)
    }

    fn existing_labels(&self, exclude: &str) -> HashSet<String> {
        Self::labels_with_targets()
            .into_iter()
            .filter(|(_, target)| exclude.is_empty() || !belongs_to(target, exclude))
            .map(|(label, _)| label.to_uppercase())
            .collect()
    }

    fn erase(
        &self,
        device: &str,
        label: &str,
        cluster: Option<ClusterSize>,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<(), DeviceError> {
        for (part, mount) in Self::mounted_partitions(device) {
            on_line(&format!("Unmounting /dev/{}", part));
            run_streaming("umount", &args([mount.to_string_lossy()]), on_line)?;
        }

        on_line(&format!("Creating the partition map on {}", device));
        run_streaming(
            "parted",
            &args([device, "-s", "mklabel", "msdos", "mkpart", "primary", "fat32", "1MiB", "100%"]),
            on_line,
        )?;
        if let Err(e) = run_captured("udevadm", &args(["settle"])) {
            log::debug!("udevadm settle: {}", e);
        }

        let partition = partition_path(device);
        on_line(&format!("Formatting {} as FAT32", partition));
        let mut mkfs = args(["-F", "32", "-v", "-n", label]);
        if let Some(cluster) = cluster {
            mkfs.push("-s".to_string());
            mkfs.push(cluster.sectors().to_string());
        }
        mkfs.push(partition);
        run_streaming("mkfs.fat", &mkfs, on_line)?;

        on_line(&format!("Finished erase on {}", device));
        Ok(())
    }

    fn eject(&self, device: &str) -> Result<(), DeviceError> {
        run_captured("eject", &args([device])).map(|_| ())
    }

    /// Scans `/sys/block` for removable block devices, skipping loop devices,
    /// empty card readers and the drive the root filesystem lives on.
    fn list_devices(&self) -> Result<Vec<Device>, DeviceError> {
        let system_disk_parent = Self::system_disk_parent();
        let labels = Self::labels_with_targets();
        let mut devices = Vec::new();

        for entry in fs::read_dir("/sys/block")?.filter_map(Result::ok) {
            let device_name = entry.file_name().to_string_lossy().to_string();
            let device_path = PathBuf::from("/dev/").join(&device_name);

            if device_name.starts_with("loop")
                || system_disk_parent.as_deref() == Some(device_path.as_path())
            {
                continue;
            }
            let id = device_path.to_string_lossy().to_string();
            if !self.is_removable(&id) {
                continue;
            }
            let sectors = Self::sectors(&device_name);
            if sectors == 0 {
                continue;
            }

            let model = ["device/vendor", "device/model"]
                .iter()
                .filter_map(|f| read_sys_file(&device_name, f).ok())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" ");

            devices.push(Device {
                mount_point: Self::mounted_partitions(&id).into_iter().next().map(|(_, mp)| mp),
                label: labels
                    .iter()
                    .find(|(_, target)| belongs_to(target, &id))
                    .map(|(label, _)| label.clone()),
                id,
                size_gb: bytes_to_gb(sectors * 512),
                model,
            });
        }

        devices.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(devices)
    }

    fn progress_table(&self) -> ProgressTable {
        ProgressTable::mkfs_fat()
    }

    fn describe(&self, device: &str) -> Result<Vec<(String, String)>, DeviceError> {
        let name = Self::kernel_name(device);
        let sectors = read_sys_file(name, "size")?;
        let mut info = vec![("Device".to_string(), device.to_string())];

        for (field, file) in [("Vendor", "device/vendor"), ("Model", "device/model")] {
            if let Ok(value) = read_sys_file(name, file) {
                info.push((field.to_string(), value));
            }
        }
        let size = sectors.parse::<u64>().map(|s| bytes_to_gb(s * 512)).unwrap_or(0.0);
        info.push(("Size".to_string(), format!("{:.2} GB", size)));
        info.push((
            "Removable".to_string(),
            if self.is_removable(device) { "Yes" } else { "No" }.to_string(),
        ));
        for (part, mount) in Self::mounted_partitions(device) {
            info.push((format!("Mount point ({})", part), mount.display().to_string()));
        }
        for (label, target) in Self::labels_with_targets() {
            if belongs_to(&target, device) {
                info.push(("Volume label".to_string(), label));
            }
        }
        Ok(info)
    }

    fn example_identifier(&self) -> &'static str {
        "/dev/sdb"
    }
}

/// Helper to read a specific file from the /sys/block filesystem.
fn read_sys_file(device_name: &str, file: &str) -> io::Result<String> {
    let path = PathBuf::from("/sys/block").join(device_name).join(file);
    fs::read_to_string(path).map(|s| s.trim().to_string())
}

/// Helper to find the parent device of a partition (e.g., /dev/sda1 -> /dev/sda).
fn get_parent_device_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if path_str.starts_with("/dev/sd") {
        if let Some(index) = path_str.rfind(|c: char| c.is_alphabetic()) {
            return PathBuf::from(&path_str[..=index]);
        }
    } else if path_str.starts_with("/dev/mmcblk") || path_str.starts_with("/dev/nvme") {
        if let Some(index) = path_str.rfind('p') {
            if index > "/dev/".len() && path_str[index + 1..].chars().all(|c| c.is_ascii_digit()) {
                return PathBuf::from(&path_str[..index]);
            }
        }
    }

    path.to_path_buf()
}

/// First partition of a whole-disk path: `/dev/sdb` -> `/dev/sdb1`,
/// `/dev/mmcblk0` -> `/dev/mmcblk0p1`.
fn partition_path(device: &str) -> String {
    if device.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{}p1", device)
    } else {
        format!("{}1", device)
    }
}

/// Undoes the `\xHH` escaping udev applies to `/dev/disk/by-label` names.
fn decode_label(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && bytes[i + 1] == b'x' {
            let hex = std::str::from_utf8(&bytes[i + 2..i + 4]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Whether a resolved `/dev` node belongs to `device` (itself or a partition).
fn belongs_to(node: &Path, device: &str) -> bool {
    node.to_string_lossy().starts_with(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_must_be_dev_paths() {
        let driver = LinuxDriver::new();
        assert!(driver.validate_identifier("/dev/sdb").is_ok());
        assert!(driver.validate_identifier("/dev/mmcblk0").is_ok());
        for bad in ["sdb", "/dev/", "/dev/disk/by-label/X", "E:"] {
            assert!(matches!(
                driver.validate_identifier(bad),
                Err(DeviceError::InvalidIdentifier { .. })
            ));
        }
    }

    #[test]
    fn parent_device_of_partitions() {
        assert_eq!(get_parent_device_path(Path::new("/dev/sda1")), PathBuf::from("/dev/sda"));
        assert_eq!(get_parent_device_path(Path::new("/dev/sdb")), PathBuf::from("/dev/sdb"));
        assert_eq!(
            get_parent_device_path(Path::new("/dev/nvme0n1p2")),
            PathBuf::from("/dev/nvme0n1")
        );
        assert_eq!(
            get_parent_device_path(Path::new("/dev/mmcblk0p1")),
            PathBuf::from("/dev/mmcblk0")
        );
        assert_eq!(
            get_parent_device_path(Path::new("/dev/mmcblk0")),
            PathBuf::from("/dev/mmcblk0")
        );
    }

    #[test]
    fn first_partition_naming() {
        assert_eq!(partition_path("/dev/sdb"), "/dev/sdb1");
        assert_eq!(partition_path("/dev/mmcblk0"), "/dev/mmcblk0p1");
    }

    #[test]
    fn udev_label_escapes_are_decoded() {
        assert_eq!(decode_label("REKORDBOX"), "REKORDBOX");
        assert_eq!(decode_label("MY\\x20USB"), "MY USB");
        assert_eq!(decode_label("A\\x2fB"), "A/B");
        assert_eq!(decode_label("trailing\\x2"), "trailing\\x2");
    }
}
