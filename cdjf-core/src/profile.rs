//! Named, reusable format settings persisted as JSON.
//!
//! The store is a single file, `{"profiles": {"<lower-cased name>": {...}}}`,
//! under the user's configuration directory. Lookups are case-insensitive on
//! the trimmed name; a missing file is an empty store.
use crate::benchmark::Thresholds;
use crate::device::ClusterSize;
use crate::error::ConfigError;
use crate::format::DEFAULT_LABEL;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const STORE_FILE: &str = "profiles.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_size: Option<ClusterSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub benchmark_thresholds: Option<Thresholds>,
}

impl Profile {
    pub fn display_name<'a>(&'a self, fallback: &'a str) -> &'a str {
        let name = self.name.trim();
        if name.is_empty() { fallback.trim() } else { name }
    }

    /// The defaults with this profile's overrides applied.
    pub fn thresholds(&self) -> Thresholds {
        Thresholds::merged(self.benchmark_thresholds.as_ref())
    }

    fn label(&self) -> Option<&str> {
        self.label.as_deref().map(str::trim).filter(|l| !l.is_empty())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    profiles: BTreeMap<String, Profile>,
}

/// Changes requested by `profile save`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    pub label: Option<String>,
    pub cluster_size: Option<ClusterSize>,
    pub extremely_slow: Option<f64>,
    pub very_slow: Option<f64>,
    pub slightly_slow: Option<f64>,
    pub prompt: Option<f64>,
    pub reset_benchmarks: bool,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.label.is_none()
            && self.cluster_size.is_none()
            && !self.reset_benchmarks
            && !self.touches_thresholds()
    }

    fn touches_thresholds(&self) -> bool {
        self.extremely_slow.is_some()
            || self.very_slow.is_some()
            || self.slightly_slow.is_some()
            || self.prompt.is_some()
    }

    /// Applies the update, returning whether anything changed.
    pub fn apply(&self, profile: &mut Profile) -> Result<bool, ConfigError> {
        if self.is_empty() {
            return Err(ConfigError::NothingToSave);
        }
        let mut changed = false;

        if let Some(label) = &self.label {
            changed |= profile.label.as_ref() != Some(label);
            profile.label = Some(label.clone());
        }
        if let Some(cluster) = self.cluster_size {
            changed |= profile.cluster_size != Some(cluster);
            profile.cluster_size = Some(cluster);
        }

        if self.reset_benchmarks {
            if self.touches_thresholds() {
                return Err(ConfigError::ResetConflictsWithThresholds);
            }
            changed |= profile.benchmark_thresholds.take().is_some();
            return Ok(changed);
        }

        if self.touches_thresholds() {
            let mut thresholds = profile.thresholds();
            let flags = [
                ("extremely-slow", self.extremely_slow, &mut thresholds.extremely_slow),
                ("very-slow", self.very_slow, &mut thresholds.very_slow),
                ("slightly-slow", self.slightly_slow, &mut thresholds.slightly_slow),
                ("prompt", self.prompt, &mut thresholds.prompt),
            ];
            for (flag, value, slot) in flags {
                if let Some(value) = value {
                    if !(value > 0.0) {
                        return Err(ConfigError::NonPositiveFlag(flag));
                    }
                    *slot = value;
                }
            }
            thresholds.validate()?;
            changed |= profile.benchmark_thresholds != Some(thresholds);
            profile.benchmark_thresholds = Some(thresholds);
        }
        Ok(changed)
    }
}

/// Whether `save` wrote anything.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Saved(Profile),
    Unchanged(Profile),
}

/// Settings a format run ends up with after combining flags and a profile.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatSettings {
    pub label: String,
    pub cluster: Option<ClusterSize>,
    pub thresholds: Thresholds,
}

impl FormatSettings {
    /// Flags win over the profile; the profile wins over the defaults.
    pub fn resolve(
        profile: Option<&Profile>,
        label: Option<&str>,
        cluster: Option<ClusterSize>,
    ) -> Self {
        let label = label
            .map(str::to_string)
            .or_else(|| profile.and_then(Profile::label).map(str::to_string))
            .unwrap_or_else(|| DEFAULT_LABEL.to_string());
        Self {
            label,
            cluster: cluster.or_else(|| profile.and_then(|p| p.cluster_size)),
            thresholds: profile.map(Profile::thresholds).unwrap_or_default(),
        }
    }
}

/// The map key for a profile name.
pub fn profile_key(name: &str) -> Result<String, ConfigError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::EmptyProfileName);
    }
    Ok(trimmed.to_lowercase())
}

#[derive(Debug, Clone)]
pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    /// The store in the platform configuration directory.
    pub fn open_default() -> Result<Self, ConfigError> {
        let dirs = ProjectDirs::from("", "", "cdjf").ok_or(ConfigError::NoConfigDir)?;
        Ok(Self::at(dirs.config_dir().join(STORE_FILE)))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<StoreFile, ConfigError> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(StoreFile::default()),
            Err(source) => return Err(self.io_error(source)),
        };
        serde_json::from_str(&data).map_err(|source| ConfigError::Json {
            path: self.path.clone(),
            source,
        })
    }

    fn store(&self, file: &StoreFile) -> Result<(), ConfigError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| self.io_error(e))?;
        }
        let data = serde_json::to_string_pretty(file).map_err(|source| ConfigError::Json {
            path: self.path.clone(),
            source,
        })?;

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut out = options.open(&self.path).map_err(|e| self.io_error(e))?;
        out.write_all(data.as_bytes())
            .and_then(|_| out.write_all(b"\n"))
            .map_err(|e| self.io_error(e))?;
        log::debug!("saved profiles to {}", self.path.display());
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> ConfigError {
        ConfigError::Store {
            path: self.path.clone(),
            source,
        }
    }

    pub fn load_by_name(&self, name: &str) -> Result<Profile, ConfigError> {
        let key = profile_key(name)?;
        let mut profile = self
            .load()?
            .profiles
            .remove(&key)
            .ok_or_else(|| ConfigError::ProfileNotFound(name.trim().to_string()))?;
        if profile.name.trim().is_empty() {
            profile.name = name.trim().to_string();
        }
        Ok(profile)
    }

    /// Creates or updates `name`. Nothing is written when the update does not
    /// change the stored profile.
    pub fn save(&self, name: &str, update: &ProfileUpdate) -> Result<SaveOutcome, ConfigError> {
        let key = profile_key(name)?;
        let mut file = self.load()?;
        let mut profile = file.profiles.get(&key).cloned().unwrap_or_default();
        profile.name = name.trim().to_string();

        if !update.apply(&mut profile)? {
            return Ok(SaveOutcome::Unchanged(profile));
        }
        file.profiles.insert(key, profile.clone());
        self.store(&file)?;
        Ok(SaveOutcome::Saved(profile))
    }

    pub fn delete(&self, name: &str) -> Result<Profile, ConfigError> {
        let key = profile_key(name)?;
        let mut file = self.load()?;
        let mut profile = file
            .profiles
            .remove(&key)
            .ok_or_else(|| ConfigError::ProfileNotFound(name.trim().to_string()))?;
        self.store(&file)?;
        if profile.name.trim().is_empty() {
            profile.name = name.trim().to_string();
        }
        Ok(profile)
    }

    /// Display names of all saved profiles, sorted.
    pub fn names(&self) -> Result<Vec<String>, ConfigError> {
        let file = self.load()?;
        let mut names: Vec<String> = file
            .profiles
            .iter()
            .map(|(key, profile)| profile.display_name(key).to_string())
            .collect();
        names.sort();
        Ok(names)
    }
}
