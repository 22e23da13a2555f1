//! Error types shared across the library.
//!
//! Device-facing failures and configuration failures are kept apart so the
//! front-end can tell "this drive was refused" from "the request itself was
//! malformed" and reject the latter before any device is touched.
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures raised while probing, erasing or ejecting a device.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("invalid device identifier {device:?}: expected {expected}")]
    InvalidIdentifier {
        device: String,
        expected: &'static str,
    },

    #[error(
        "{0} appears to be a system/internal drive. Operation blocked for safety"
    )]
    SystemDrive(String),

    #[error(
        "{0} is not detected as a removable USB drive. Only removable drives are supported"
    )]
    NotRemovable(String),

    #[error("device {0} is not mounted; please mount it before continuing")]
    NotMounted(String),

    #[error("unable to access mount point {path}: {source}")]
    MountPointUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{program} failed ({status})\nOutput: {output}")]
    CommandFailed {
        program: String,
        status: String,
        output: String,
    },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("unsupported operating system: {0}")]
    Unsupported(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Failures in user-supplied configuration: flags, profiles and thresholds.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "invalid cluster size {0:?}; supported values: 512, 1K, 2K, 4K, 8K, 16K, 32K, 64K"
    )]
    InvalidClusterSize(String),

    #[error("benchmark thresholds must be greater than zero")]
    NonPositiveThreshold,

    #[error("extremely slow threshold must be less than or equal to very slow threshold")]
    ExtremelySlowAboveVerySlow,

    #[error("very slow threshold must be less than or equal to slightly slow threshold")]
    VerySlowAboveSlightlySlow,

    #[error("integrity test size must be greater than zero (got {0} MB)")]
    NonPositiveTestSize(i64),

    #[error("integrity test size of {0} MB is too large")]
    TestSizeTooLarge(i64),

    #[error("--{0} must be greater than zero")]
    NonPositiveFlag(&'static str),

    #[error("cannot adjust benchmark thresholds while --reset-benchmarks is provided")]
    ResetConflictsWithThresholds,

    #[error(
        "specify at least one option to save (e.g. --label, --cluster-size, or a threshold flag)"
    )]
    NothingToSave,

    #[error("profile name cannot be empty")]
    EmptyProfileName,

    #[error("profile {0:?} not found")]
    ProfileNotFound(String),

    #[error("unable to resolve a configuration directory for profiles")]
    NoConfigDir,

    #[error("profile store {path}: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("profile store {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
