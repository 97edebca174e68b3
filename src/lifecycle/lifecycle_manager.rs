//! Compression, archival and retention of indexed captures.
//!
//! Per capture: `new -> (compressed) -> archived -> deleted`. The two flags
//! only ever go from false to true. Every per-item failure is logged and
//! skipped; the next pass re-evaluates whatever is still eligible.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::fs;
use tokio::sync::watch;
use tokio::task::{self, JoinHandle};
use tokio::time::{self, MissedTickBehavior};

use crate::configuration::{Config, SharedConfig};
use crate::error_handling::types::LifecycleError;
use crate::lifecycle::cleanup::{self, UntrackedFile};
use crate::lifecycle::compression;
use crate::storage::{Capture, Storage};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveSummary {
    pub archived: usize,
    pub compressed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetentionSummary {
    pub deleted: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompressionSummary {
    pub processed: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// What an explicit cleanup would remove.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanupCandidates {
    pub old_archived: Vec<Capture>,
    pub empty_directories: Vec<PathBuf>,
    pub untracked_files: Vec<UntrackedFile>,
    pub total_bytes_to_free: u64,
}

impl CleanupCandidates {
    pub fn is_empty(&self) -> bool {
        self.old_archived.is_empty()
            && self.empty_directories.is_empty()
            && self.untracked_files.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub deleted_archived: usize,
    pub deleted_empty_directories: usize,
    pub deleted_untracked: usize,
    pub errors: Vec<String>,
}

/// Removes a file, treating "already gone" as success.
/// Returns whether a file was actually removed.
async fn remove_file_if_present(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

pub struct LifecycleManager {
    config: SharedConfig,
    storage: Arc<dyn Storage>,
}

impl LifecycleManager {
    pub fn new(config: SharedConfig, storage: Arc<dyn Storage>) -> Self {
        Self { config, storage }
    }

    /// Runs the periodic passes immediately and then every configured
    /// interval, until `shutdown` flips to true or its sender is dropped.
    pub fn start_periodic(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.config.get().lifecycle_interval();
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Lifecycle manager running every {:?}", period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.run_once().await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Lifecycle manager stopped");
        })
    }

    /// One full periodic round: archive, retention, empty directories.
    pub async fn run_once(&self) {
        match self.archive_pass().await {
            Ok(summary) => info!(
                "Archive pass: archived={}, compressed={}, failed={}",
                summary.archived, summary.compressed, summary.failed
            ),
            Err(e) => error!("Archive pass failed: {}", e),
        }
        match self.retention_cleanup().await {
            Ok(summary) => info!(
                "Retention cleanup: deleted={}, failed={}",
                summary.deleted, summary.failed
            ),
            Err(e) => error!("Retention cleanup failed: {}", e),
        }
        match self.cleanup_empty_directories().await {
            Ok(removed) => debug!("Removed {} empty directories", removed),
            Err(e) => error!("Empty directory cleanup failed: {}", e),
        }
    }

    pub async fn archive_pass(&self) -> Result<ArchiveSummary, LifecycleError> {
        let config = self.config.get();
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(config.archive_days));
        let candidates = self.storage.get_captures_for_archive(cutoff).await?;
        debug!("{} captures eligible for archival", candidates.len());

        let mut summary = ArchiveSummary::default();
        for capture in candidates {
            let compress = config.compression_enabled && !compression::is_gzip_path(&capture.file_path);
            match self.archive_one(&config, &capture).await {
                Ok(_) => {
                    summary.archived += 1;
                    if compress {
                        summary.compressed += 1;
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!("Skipping archival of capture {}: {}", capture.id, e);
                }
            }
        }
        Ok(summary)
    }

    /// Optionally compresses, then moves one capture into the archive tree.
    /// A compression failure prevents the move.
    async fn archive_one(&self, config: &Config, capture: &Capture) -> Result<PathBuf, LifecycleError> {
        let mut current = capture.file_path.clone();
        if config.compression_enabled && !compression::is_gzip_path(&current) {
            current = self.compress_one(capture).await?;
        }

        let relative = current
            .strip_prefix(&config.organized_dir)
            .map_err(|_| LifecycleError::OutsideOrganizedTree(current.clone()))?;
        let destination = config.archive_dir.join(relative);
        if let Some(dir) = destination.parent() {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| LifecycleError::IoError(dir.to_path_buf(), e))?;
        }
        fs::rename(&current, &destination)
            .await
            .map_err(|e| LifecycleError::IoError(current.clone(), e))?;
        self.storage
            .mark_capture_archived(capture.id, &destination)
            .await?;
        info!("Archived capture {} to {}", capture.id, destination.display());
        Ok(destination)
    }

    async fn compress_one(&self, capture: &Capture) -> Result<PathBuf, LifecycleError> {
        let source = capture.file_path.clone();
        let compressed = task::spawn_blocking(move || compression::gzip_file(&source))
            .await
            .map_err(|e| LifecycleError::WorkerFailed(e.to_string()))??;
        self.storage
            .mark_capture_compressed(capture.id, &compressed)
            .await?;
        info!("Compressed capture {} to {}", capture.id, compressed.display());
        Ok(compressed)
    }

    /// Deletes archived captures past `max_retention_days`, file first.
    /// A row is removed only once its file is gone.
    pub async fn retention_cleanup(&self) -> Result<RetentionSummary, LifecycleError> {
        let config = self.config.get();
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(config.max_retention_days));
        let expired = self.storage.get_old_archived_captures(cutoff).await?;

        let mut summary = RetentionSummary::default();
        for capture in expired {
            match self.remove_capture(&capture).await {
                Ok(()) => summary.deleted += 1,
                Err(e) => {
                    let msg = format!("Failed to delete capture {}: {}", capture.id, e);
                    warn!("{}", msg);
                    summary.failed += 1;
                    summary.errors.push(msg);
                }
            }
        }
        Ok(summary)
    }

    async fn remove_capture(&self, capture: &Capture) -> Result<(), LifecycleError> {
        match remove_file_if_present(&capture.file_path).await {
            Ok(true) => debug!("Deleted {}", capture.file_path.display()),
            Ok(false) => debug!("{} already absent", capture.file_path.display()),
            Err(e) => return Err(LifecycleError::IoError(capture.file_path.clone(), e)),
        }
        self.storage.delete_capture(capture.id).await?;
        Ok(())
    }

    /// Removes empty directories in both trees until nothing is left to remove.
    pub async fn cleanup_empty_directories(&self) -> Result<usize, LifecycleError> {
        let config = self.config.get();
        task::spawn_blocking(move || {
            cleanup::remove_empty_dirs(&config.organized_dir)
                + cleanup::remove_empty_dirs(&config.archive_dir)
        })
        .await
        .map_err(|e| LifecycleError::WorkerFailed(e.to_string()))
    }

    /// Files in either tree with no store row. Reported only.
    pub async fn find_untracked_files(&self) -> Result<Vec<UntrackedFile>, LifecycleError> {
        let config = self.config.get();
        let tracked = self.storage.get_all_file_paths().await?;
        task::spawn_blocking(move || {
            cleanup::find_untracked_files(&[&config.organized_dir, &config.archive_dir], &tracked)
        })
        .await
        .map_err(|e| LifecycleError::WorkerFailed(e.to_string()))
    }

    pub async fn compress_capture(&self, id: i64) -> Result<PathBuf, LifecycleError> {
        let capture = self.storage.get_capture(id).await?;
        if capture.compressed {
            return Err(LifecycleError::AlreadyCompressed(id));
        }
        if capture.archived {
            return Err(LifecycleError::AlreadyArchived(id));
        }
        if compression::is_gzip_path(&capture.file_path) {
            // already gzip on disk, only the flag is behind
            self.storage
                .mark_capture_compressed(id, &capture.file_path)
                .await?;
            return Ok(capture.file_path);
        }
        self.compress_one(&capture).await
    }

    pub async fn compress_pending(&self, limit: usize) -> Result<CompressionSummary, LifecycleError> {
        let pending = self.storage.get_pending_compressions(limit).await?;
        let mut summary = CompressionSummary::default();
        for capture in pending {
            match self.compress_one(&capture).await {
                Ok(_) => summary.processed += 1,
                Err(e) => {
                    let msg = format!(
                        "Failed to compress {} (id: {}): {}",
                        capture.file_path.display(),
                        capture.id,
                        e
                    );
                    error!("{}", msg);
                    summary.failed += 1;
                    summary.errors.push(msg);
                }
            }
        }
        Ok(summary)
    }

    pub async fn archive_capture(&self, id: i64) -> Result<PathBuf, LifecycleError> {
        let capture = self.storage.get_capture(id).await?;
        if capture.archived {
            return Err(LifecycleError::AlreadyArchived(id));
        }
        let config = self.config.get();
        self.archive_one(&config, &capture).await
    }

    /// Explicit deletion requested by an operator, regardless of state.
    pub async fn delete_capture(&self, id: i64) -> Result<(), LifecycleError> {
        let capture = self.storage.get_capture(id).await?;
        self.remove_capture(&capture).await?;
        info!("Deleted capture {}", id);
        Ok(())
    }

    pub async fn cleanup_candidates(&self) -> Result<CleanupCandidates, LifecycleError> {
        let config = self.config.get();
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(config.max_retention_days));
        let old_archived = self.storage.get_old_archived_captures(cutoff).await?;
        let untracked_files = self.find_untracked_files().await?;

        let roots = config.clone();
        let empty_directories = task::spawn_blocking(move || {
            let mut dirs = cleanup::find_empty_dirs(&roots.organized_dir);
            dirs.extend(cleanup::find_empty_dirs(&roots.archive_dir));
            dirs
        })
        .await
        .map_err(|e| LifecycleError::WorkerFailed(e.to_string()))?;

        let mut total_bytes_to_free: u64 = untracked_files.iter().map(|f| f.size).sum();
        for capture in &old_archived {
            if let Ok(meta) = fs::metadata(&capture.file_path).await {
                total_bytes_to_free += meta.len();
            }
        }

        Ok(CleanupCandidates {
            old_archived,
            empty_directories,
            untracked_files,
            total_bytes_to_free,
        })
    }

    /// Operator-triggered cleanup: expired archives, untracked files, then
    /// empty directories (including those the deletions just emptied).
    pub async fn execute_cleanup(&self) -> Result<CleanupReport, LifecycleError> {
        let candidates = self.cleanup_candidates().await?;
        let mut report = CleanupReport::default();
        if candidates.is_empty() {
            debug!("Nothing to clean up");
            return Ok(report);
        }

        for capture in &candidates.old_archived {
            match self.remove_capture(capture).await {
                Ok(()) => report.deleted_archived += 1,
                Err(e) => {
                    let msg = format!("Failed to delete capture {}: {}", capture.id, e);
                    error!("{}", msg);
                    report.errors.push(msg);
                }
            }
        }

        for file in &candidates.untracked_files {
            match fs::remove_file(&file.path).await {
                Ok(()) => {
                    info!("Deleted untracked file {}", file.path.display());
                    report.deleted_untracked += 1;
                }
                Err(e) => {
                    let msg = format!("Failed to delete untracked file {}: {}", file.path.display(), e);
                    error!("{}", msg);
                    report.errors.push(msg);
                }
            }
        }

        report.deleted_empty_directories = self.cleanup_empty_directories().await?;
        Ok(report)
    }
}
