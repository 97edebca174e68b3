use super::types::LogLevel;
use crate::error_handling::types::ConfigError;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Runtime configuration of the sorter.
///
/// Loaded from a TOML file. Every field except the three directories has a
/// default, so a minimal file only needs `watch_dir`, `organized_dir` and
/// `archive_dir`.
///
/// # Fields Overview
///
/// - `watch_dir`: inbox where capture files are dropped
/// - `organized_dir`: root of the `hostname/timestamp` hierarchy
/// - `archive_dir`: long-term storage mirroring `organized_dir`
/// - `compression_enabled`: gzip captures before archiving them
/// - `archive_days`: age after which a capture is moved to the archive tree
/// - `max_retention_days`: age after which an archived capture is deleted
/// - `log_level`: verbosity of the process logger
/// - `database_path`: SQLite file holding captures and statistics
/// - `quiet_period_secs`: debounce interval before a file counts as complete
/// - `lifecycle_interval_secs`: period between lifecycle passes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub watch_dir: PathBuf,
    pub organized_dir: PathBuf,
    pub archive_dir: PathBuf,
    #[serde(default)]
    pub compression_enabled: bool,
    #[serde(default = "default_archive_days")]
    pub archive_days: u32,
    #[serde(default = "default_max_retention_days")]
    pub max_retention_days: u32,
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_quiet_period_secs")]
    pub quiet_period_secs: u64,
    #[serde(default = "default_lifecycle_interval_secs")]
    pub lifecycle_interval_secs: u64,
}

fn default_archive_days() -> u32 {
    30
}

fn default_max_retention_days() -> u32 {
    365
}

fn default_database_path() -> PathBuf {
    PathBuf::from("pcapStore.db")
}

fn default_quiet_period_secs() -> u64 {
    3
}

fn default_lifecycle_interval_secs() -> u64 {
    600
}

impl Config {
    /// Builds a configuration for the three directories with every other
    /// setting at its default.
    pub fn new<P: Into<PathBuf>>(watch_dir: P, organized_dir: P, archive_dir: P) -> Self {
        Self {
            watch_dir: watch_dir.into(),
            organized_dir: organized_dir.into(),
            archive_dir: archive_dir.into(),
            compression_enabled: false,
            archive_days: default_archive_days(),
            max_retention_days: default_max_retention_days(),
            log_level: LogLevel::default(),
            database_path: default_database_path(),
            quiet_period_secs: default_quiet_period_secs(),
            lifecycle_interval_secs: default_lifecycle_interval_secs(),
        }
    }

    /// Reads and validates a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Reading configuration from {}", path.display());
        let raw = fs::read_to_string(path)?;
        let config = Self::from_toml(&raw)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(raw).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Persists the configuration as TOML, replacing the file at `path`.
    pub fn write_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let raw = toml::to_string(self).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        fs::write(path, raw)?;
        debug!("Configuration written to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let dirs = [
            ("watch_dir", &self.watch_dir),
            ("organized_dir", &self.organized_dir),
            ("archive_dir", &self.archive_dir),
        ];
        for (name, dir) in dirs {
            if dir.as_os_str().is_empty() {
                return Err(ConfigError::EmptyPath(name.to_string()));
            }
        }
        if self.quiet_period_secs == 0 {
            return Err(ConfigError::NotInRange(
                "quiet_period_secs must be greater than 0".to_string(),
            ));
        }
        if self.lifecycle_interval_secs == 0 {
            return Err(ConfigError::NotInRange(
                "lifecycle_interval_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Creates the watch, organized and archive roots if they are missing.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        for dir in [&self.watch_dir, &self.organized_dir, &self.archive_dir] {
            if !dir.exists() {
                fs::create_dir_all(dir)
                    .map_err(|e| ConfigError::DirectoryCreationFailed(dir.clone(), e))?;
                info!("Created directory {}", dir.display());
            }
        }
        Ok(())
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_secs(self.quiet_period_secs)
    }

    pub fn lifecycle_interval(&self) -> Duration {
        Duration::from_secs(self.lifecycle_interval_secs)
    }
}
