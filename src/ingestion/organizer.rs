//! Moves stabilized captures into the organized tree and indexes them.
//!
//! A file that has been relocated but then fails stat, analysis or
//! persistence stays at its destination without a store row. Nothing here
//! rolls the relocation back; such files are reported later as untracked.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::SecondsFormat;
use log::{debug, error, info, warn};
use tokio::fs;
use tokio::task;

use crate::analysis::analyzer;
use crate::configuration::SharedConfig;
use crate::error_handling::types::IngestError;
use crate::ingestion::validator::{CaptureName, FilenameValidator};
use crate::storage::{NewCapture, Storage};

const RELOCATE_ATTEMPTS: u32 = 3;

/// Creates the parent of `destination` and renames `source` onto it.
///
/// The empty-directory sweep can remove a freshly created parent before the
/// rename lands; while `source` is still in place the directory is recreated
/// and the rename retried.
async fn relocate(source: &Path, destination: &Path) -> Result<(), IngestError> {
    let mut attempt = 1;
    loop {
        if let Some(dir) = destination.parent() {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| IngestError::CreateDirFailed(dir.to_path_buf(), e))?;
        }
        match fs::rename(source, destination).await {
            Ok(()) => return Ok(()),
            Err(e)
                if e.kind() == ErrorKind::NotFound
                    && attempt < RELOCATE_ATTEMPTS
                    && fs::try_exists(source).await.unwrap_or(false) =>
            {
                debug!(
                    "Destination directory of {} vanished, retrying ({}/{})",
                    destination.display(),
                    attempt,
                    RELOCATE_ATTEMPTS
                );
                attempt += 1;
            }
            Err(e) => return Err(IngestError::RelocationFailed(destination.to_path_buf(), e)),
        }
    }
}

/// Result of one successful pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Stored { id: i64, destination: PathBuf },
    /// The path vanished or is not a regular file any more.
    Skipped,
}

#[derive(Clone)]
pub struct Organizer {
    config: SharedConfig,
    storage: Arc<dyn Storage>,
    validator: FilenameValidator,
}

impl Organizer {
    pub fn new(
        config: SharedConfig,
        storage: Arc<dyn Storage>,
        validator: FilenameValidator,
    ) -> Self {
        Self {
            config,
            storage,
            validator,
        }
    }

    /// Destination of a capture under `organized_root`:
    /// `hostname/<timestamp>/hostname-scenario-<timestamp>.pcap[.gz]`.
    pub fn destination_for(organized_root: &Path, name: &CaptureName) -> PathBuf {
        let stamp = name.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true);
        let file_name = format!(
            "{}-{}-{}.pcap{}",
            name.hostname,
            name.scenario,
            stamp,
            if name.compressed { ".gz" } else { "" }
        );
        organized_root
            .join(&name.hostname)
            .join(&stamp)
            .join(file_name)
    }

    /// Runs validate, relocate, analyze and persist for one stabilized file.
    pub async fn process_file(&self, source: &Path) -> Result<IngestOutcome, IngestError> {
        match fs::metadata(source).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Ok(IngestOutcome::Skipped),
        }
        let config = self.config.get();

        let validator = self.validator.clone();
        let owned_source = source.to_path_buf();
        let name = task::spawn_blocking(move || validator.validate(&owned_source))
            .await
            .map_err(|e| IngestError::WorkerFailed(e.to_string()))?
            .map_err(IngestError::Invalid)?;

        let destination = Self::destination_for(&config.organized_dir, &name);
        relocate(source, &destination).await?;
        debug!("Moved {} to {}", source.display(), destination.display());

        let file_size = fs::metadata(&destination)
            .await
            .map_err(|e| IngestError::StatFailed(destination.clone(), e))?
            .len();

        let analyze_path = destination.clone();
        let report = task::spawn_blocking(move || analyzer::analyze_file(&analyze_path))
            .await
            .map_err(|e| IngestError::WorkerFailed(e.to_string()))??;

        let capture = NewCapture {
            hostname: name.hostname,
            scenario: name.scenario,
            capture_datetime: name.timestamp,
            file_path: destination.clone(),
            file_size,
            compressed: name.compressed,
        };
        let id = self
            .storage
            .insert_capture_with_stats(&capture, &report)
            .await?;
        Ok(IngestOutcome::Stored { id, destination })
    }

    /// Logging wrapper used by the per-file workers.
    pub async fn handle_ready(&self, source: PathBuf) {
        match self.process_file(&source).await {
            Ok(IngestOutcome::Stored { id, destination }) => {
                info!("Ingested {} as capture {}", destination.display(), id)
            }
            Ok(IngestOutcome::Skipped) => {
                debug!("Skipping {}: no longer a regular file", source.display())
            }
            Err(IngestError::Invalid(reason)) => {
                warn!("Rejected {}: {}", source.display(), reason)
            }
            Err(e @ IngestError::CreateDirFailed(..)) | Err(e @ IngestError::RelocationFailed(..)) => {
                error!("Failed to organize {}: {}", source.display(), e)
            }
            Err(e) => error!(
                "Failed to index {}: {}; file left unindexed in the organized tree",
                source.display(),
                e
            ),
        }
    }
}
