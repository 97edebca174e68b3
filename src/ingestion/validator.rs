//! Capture filename validation and quarantine.
//!
//! Accepted names, after stripping an optional `.gz` and then `.pcap`:
//!
//! - `{host}_{scenario}_{YYYYMMDD_HHMMSS}` with literal braces
//! - `host_scenario_YYYYMMDD_HHMMSS`, where the hostname is the first token
//!   and the scenario may itself contain underscores
//!
//! Tokens are ASCII alphanumerics, `_` and `-`. Anything else is renamed in
//! place with a `.INCORRECT` suffix.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use log::{error, warn};
use regex::Regex;

use crate::error_handling::types::ValidationError;

pub const QUARANTINE_SUFFIX: &str = ".INCORRECT";

const BRACED_PATTERN: &str = r"^\{([a-zA-Z0-9_-]+)\}_\{([a-zA-Z0-9_-]+)\}_\{(\d{8})_(\d{6})\}$";
const PLAIN_PATTERN: &str = r"^([a-zA-Z0-9-]+)_([a-zA-Z0-9_-]+)_(\d{8})_(\d{6})$";

/// Fields recovered from a valid capture filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureName {
    pub hostname: String,
    pub scenario: String,
    pub timestamp: DateTime<Utc>,
    pub compressed: bool,
}

#[derive(Debug, Clone)]
pub struct FilenameValidator {
    patterns: [Regex; 2],
}

impl FilenameValidator {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            patterns: [Regex::new(BRACED_PATTERN)?, Regex::new(PLAIN_PATTERN)?],
        })
    }

    /// Parses a basename without touching the filesystem.
    pub fn parse(&self, file_name: &str) -> Result<CaptureName, ValidationError> {
        let (stem, compressed) = match file_name.strip_suffix(".gz") {
            Some(stem) => (stem, true),
            None => (file_name, false),
        };
        let stem = stem.strip_suffix(".pcap").unwrap_or(stem);

        let caps = self
            .patterns
            .iter()
            .find_map(|re| re.captures(stem))
            .ok_or_else(|| ValidationError::InvalidFormat(file_name.to_string()))?;

        let datetime = format!("{}{}", &caps[3], &caps[4]);
        let timestamp = NaiveDateTime::parse_from_str(&datetime, "%Y%m%d%H%M%S")
            .map_err(|e| ValidationError::InvalidDatetime(format!("{}: {}", datetime, e)))?
            .and_utc();

        Ok(CaptureName {
            hostname: caps[1].to_string(),
            scenario: caps[2].to_string(),
            timestamp,
            compressed,
        })
    }

    /// Validates the file at `path`, quarantining it on rejection.
    ///
    /// A failed quarantine rename is logged; the file is reported invalid
    /// either way.
    pub fn validate(&self, path: &Path) -> Result<CaptureName, ValidationError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match self.parse(&file_name) {
            Ok(name) => Ok(name),
            Err(reason) => {
                let target = quarantine_path(path);
                match fs::rename(path, &target) {
                    Ok(()) => warn!("{}; moved to {}", reason, target.display()),
                    Err(e) => error!(
                        "{}; failed to quarantine {}: {}",
                        reason,
                        path.display(),
                        e
                    ),
                }
                Err(reason)
            }
        }
    }
}

pub fn quarantine_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(QUARANTINE_SUFFIX);
    PathBuf::from(name)
}

pub fn is_quarantined(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().ends_with(QUARANTINE_SUFFIX))
        .unwrap_or(false)
}
