use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// A removable drive as reported by a [`crate::platform::DeviceDriver`].
///
/// `id` is the identifier the operator types and the driver accepts
/// (`disk2` on macOS, `E:` on Windows, `/dev/sdb` on Linux).
#[derive(Clone, Debug, PartialEq)]
pub struct Device {
    pub id: String,
    /// Total size in gigabytes (GiB).
    pub size_gb: f64,
    /// Where the device's volume is mounted, if anywhere.
    pub mount_point: Option<PathBuf>,
    /// Current volume label, if any.
    pub label: Option<String>,
    /// Vendor/model or media name.
    pub model: String,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mount_info = match &self.mount_point {
            Some(mp) => format!("[Mounted at {}]", mp.display()),
            None => "[Not mounted]".to_string(),
        };

        write!(f, "{:<12} {:>8.1} GB", self.id, self.size_gb)?;
        if let Some(label) = &self.label {
            write!(f, " {:<12}", label)?;
        }
        if !self.model.is_empty() {
            write!(f, " {}", self.model)?;
        }
        write!(f, " {}", mount_info)
    }
}

/// A FAT32 allocation unit size accepted by the erase tools.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ClusterSize {
    B512,
    K1,
    K2,
    K4,
    K8,
    K16,
    K32,
    K64,
}

impl ClusterSize {
    pub const ALL: [ClusterSize; 8] = [
        ClusterSize::B512,
        ClusterSize::K1,
        ClusterSize::K2,
        ClusterSize::K4,
        ClusterSize::K8,
        ClusterSize::K16,
        ClusterSize::K32,
        ClusterSize::K64,
    ];

    /// Canonical spelling, as passed to `format.com /A:`.
    pub fn as_str(self) -> &'static str {
        match self {
            ClusterSize::B512 => "512",
            ClusterSize::K1 => "1K",
            ClusterSize::K2 => "2K",
            ClusterSize::K4 => "4K",
            ClusterSize::K8 => "8K",
            ClusterSize::K16 => "16K",
            ClusterSize::K32 => "32K",
            ClusterSize::K64 => "64K",
        }
    }

    pub fn bytes(self) -> u32 {
        match self {
            ClusterSize::B512 => 512,
            ClusterSize::K1 => 1024,
            ClusterSize::K2 => 2048,
            ClusterSize::K4 => 4096,
            ClusterSize::K8 => 8192,
            ClusterSize::K16 => 16384,
            ClusterSize::K32 => 32768,
            ClusterSize::K64 => 65536,
        }
    }

    /// Sectors per cluster for 512-byte sectors (`mkfs.fat -s`).
    pub fn sectors(self) -> u32 {
        self.bytes() / 512
    }
}

impl fmt::Display for ClusterSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusterSize {
    type Err = ConfigError;

    /// Accepts `512`, `1K`/`1024` ... `64K`/`65536`, case-insensitively and
    /// with an optional trailing `B`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let upper = value.trim().to_uppercase();
        let stripped = upper.strip_suffix('B').unwrap_or(&upper);
        ClusterSize::ALL
            .into_iter()
            .find(|c| stripped == c.as_str() || stripped == c.bytes().to_string())
            .ok_or_else(|| ConfigError::InvalidClusterSize(value.to_string()))
    }
}

impl TryFrom<String> for ClusterSize {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ClusterSize> for String {
    fn from(value: ClusterSize) -> Self {
        value.as_str().to_string()
    }
}
