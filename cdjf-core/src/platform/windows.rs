use super::command::{args, run_captured, run_streaming};
use super::{DeviceDriver, bytes_to_gb};
use crate::device::{ClusterSize, Device};
use crate::error::DeviceError;
use crate::translate::ProgressTable;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;

/// `Win32_LogicalDisk.DriveType` values.
const DRIVE_REMOVABLE: &str = "2";
const DRIVE_FIXED: &str = "3";

/// Drives lettered volumes through `wmic`, `format.com` and the shell's eject
/// verb.
#[derive(Debug, Default)]
pub struct WindowsDriver;

impl WindowsDriver {
    pub fn new() -> Self {
        Self
    }

    fn letter(device: &str) -> String {
        device.trim().trim_end_matches(':').to_uppercase()
    }

    /// `wmic logicaldisk` rows as header -> value maps.
    fn logical_disks(filter: Option<&str>, fields: &str) -> Result<Vec<HashMap<String, String>>, DeviceError> {
        let mut argv = args(["logicaldisk"]);
        if let Some(letter) = filter {
            argv.push("where".to_string());
            argv.push(format!("name='{}:'", letter));
        }
        argv.extend(args(["get", fields, "/format:csv"]));
        run_captured("wmic", &argv).map(|out| parse_csv(&out))
    }

    fn disk(device: &str, fields: &str) -> Option<HashMap<String, String>> {
        let letter = Self::letter(device);
        if letter.is_empty() {
            return None;
        }
        Self::logical_disks(Some(&letter), fields)
            .ok()
            .and_then(|rows| rows.into_iter().next())
    }

    fn drive_type(device: &str) -> Option<String> {
        Self::disk(device, "DriveType").and_then(|mut row| row.remove("DriveType"))
    }
}

impl DeviceDriver for WindowsDriver {
    fn validate_identifier(&self, device: &str) -> Result<(), DeviceError> {
        let mut chars = device.chars();
        match (chars.next(), chars.next(), chars.next()) {
            (Some(letter), Some(':'), None) if letter.is_ascii_alphabetic() => Ok(()),
            _ => Err(DeviceError::InvalidIdentifier {
                device: device.to_string(),
                expected: "X: (e.g., E:)",
            }),
        }
    }

    fn is_removable(&self, device: &str) -> bool {
        Self::drive_type(device).as_deref() == Some(DRIVE_REMOVABLE)
    }

    fn is_system_drive(&self, device: &str) -> bool {
        Self::letter(device) == "C" || Self::drive_type(device).as_deref() == Some(DRIVE_FIXED)
    }

    fn mount_point(&self, device: &str) -> Result<PathBuf, DeviceError> {
        let letter = Self::letter(device);
        if letter.is_empty() {
            return Err(DeviceError::InvalidIdentifier {
                device: device.to_string(),
                expected: "X: (e.g., E:)",
            });
        }
        let path = PathBuf::from(format!("{}:\\", letter));
        fs::metadata(&path).map_err(|source| DeviceError::MountPointUnavailable {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    fn size_gb(&self, device: &str) -> f64 {
        Self::disk(device, "Size")
            .and_then(|row| row.get("Size").and_then(|s| s.parse::<u64>().ok()))
            .map(bytes_to_gb)
            .unwrap_or(0.0)
    }

    fn existing_labels(&self, exclude: &str) -> HashSet<String> {
        let excluded = Self::letter(exclude);
        let Ok(rows) = Self::logical_disks(None, "DeviceID,VolumeName") else {
            return HashSet::new();
        };
        rows.into_iter()
            .filter(|row| {
                let id = row.get("DeviceID").map(|d| Self::letter(d)).unwrap_or_default();
                excluded.is_empty() || id != excluded
            })
            .filter_map(|mut row| row.remove("VolumeName"))
            .filter(|name| !name.is_empty())
            .map(|name| name.to_uppercase())
            .collect()
    }

    fn erase(
        &self,
        device: &str,
        label: &str,
        cluster: Option<ClusterSize>,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<(), DeviceError> {
        on_line("Creating FAT32 filesystem...");
        let mut argv = args([
            format!("{}:", Self::letter(device)),
            "/FS:FAT32".to_string(),
            format!("/V:{}", label),
            "/Q".to_string(),
            "/Y".to_string(),
        ]);
        if let Some(cluster) = cluster {
            argv.push(format!("/A:{}", cluster.as_str()));
        }
        run_streaming("format.com", &argv, on_line)
    }

    fn eject(&self, device: &str) -> Result<(), DeviceError> {
        let script = format!(
            "(New-Object -comObject Shell.Application).NameSpace(17).ParseName('{}:').InvokeVerb('Eject')",
            Self::letter(device)
        );
        run_captured("powershell", &args(["-NoProfile", "-Command", script.as_str()])).map(|_| ())
    }

    fn list_devices(&self) -> Result<Vec<Device>, DeviceError> {
        let rows = Self::logical_disks(None, "DeviceID,DriveType,FileSystem,FreeSpace,Size,VolumeName")?;
        Ok(rows
            .into_iter()
            .filter(|row| row.get("DriveType").map(String::as_str) == Some(DRIVE_REMOVABLE))
            .filter_map(|row| {
                let size = row.get("Size").and_then(|s| s.parse::<u64>().ok()).map(bytes_to_gb)?;
                if size <= 0.0 {
                    return None;
                }
                let id = row.get("DeviceID")?.clone();
                Some(Device {
                    mount_point: Some(PathBuf::from(format!("{}\\", id))),
                    label: row.get("VolumeName").filter(|v| !v.is_empty()).cloned(),
                    model: row.get("FileSystem").cloned().unwrap_or_default(),
                    size_gb: size,
                    id,
                })
            })
            .collect())
    }

    fn progress_table(&self) -> ProgressTable {
        ProgressTable::format_com()
    }

    fn describe(&self, device: &str) -> Result<Vec<(String, String)>, DeviceError> {
        let rows = Self::logical_disks(
            Some(&Self::letter(device)),
            "Description,DriveType,FileSystem,FreeSpace,Size,VolumeName",
        )?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(Vec::new());
        };
        Ok(describe_row(&row))
    }

    fn example_identifier(&self) -> &'static str {
        "E:"
    }
}

/// Parses `wmic ... /format:csv` output into one map per data row, keyed by
/// the header line.
fn parse_csv(output: &str) -> Vec<HashMap<String, String>> {
    let mut lines = output.lines().map(str::trim).filter(|l| !l.is_empty());
    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let headers: Vec<&str> = header.split(',').map(str::trim).collect();
    lines
        .map(|line| {
            headers
                .iter()
                .zip(line.split(',').map(str::trim))
                .map(|(h, v)| (h.to_string(), v.to_string()))
                .collect()
        })
        .collect()
}

fn drive_type_label(code: &str) -> &'static str {
    match code {
        "1" => "NoRoot",
        "2" => "Removable",
        "3" => "Fixed/Local",
        "4" => "Network",
        "5" => "CD-ROM",
        "6" => "RAMDisk",
        _ => "Unknown",
    }
}

fn describe_row(row: &HashMap<String, String>) -> Vec<(String, String)> {
    ["Description", "DriveType", "FileSystem", "FreeSpace", "Size", "VolumeName"]
        .iter()
        .filter_map(|field| {
            let value = row.get(*field)?;
            let shown = match *field {
                "Size" | "FreeSpace" => value
                    .parse::<u64>()
                    .map(|b| format!("{:.2} GB", bytes_to_gb(b)))
                    .unwrap_or_else(|_| value.clone()),
                "DriveType" => drive_type_label(value).to_string(),
                _ => value.clone(),
            };
            Some((field.to_string(), shown))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\r\r\nNode,DeviceID,DriveType,FileSystem,FreeSpace,Size,VolumeName\r\r\n\
DESKTOP,C:,3,NTFS,100000000000,500000000000,Windows\r\r\n\
DESKTOP,E:,2,FAT32,15000000000,16008609792,REKORDBOX\r\r\n\
DESKTOP,F:,2,,,,\r\r\n";

    #[test]
    fn identifiers_are_drive_letters() {
        let driver = WindowsDriver::new();
        assert!(driver.validate_identifier("E:").is_ok());
        assert!(driver.validate_identifier("e:").is_ok());
        for bad in ["E", "E:\\", "disk2", "1:", ""] {
            assert!(driver.validate_identifier(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn csv_rows_are_keyed_by_header() {
        let rows = parse_csv(LISTING);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1]["DeviceID"], "E:");
        assert_eq!(rows[1]["VolumeName"], "REKORDBOX");
        assert_eq!(rows[2]["Size"], "");
    }

    #[test]
    fn describe_formats_sizes_and_types() {
        let rows = parse_csv(LISTING);
        let described = describe_row(&rows[1]);
        assert!(described.contains(&("DriveType".to_string(), "Removable".to_string())));
        assert!(described.contains(&("Size".to_string(), "14.91 GB".to_string())));
        assert!(described.contains(&("VolumeName".to_string(), "REKORDBOX".to_string())));
    }

    #[test]
    fn letters_are_normalized() {
        assert_eq!(WindowsDriver::letter("e:"), "E");
        assert_eq!(WindowsDriver::letter(" F "), "F");
    }
}
