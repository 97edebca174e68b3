//! Storage Trait
//!
//! This module defines the `Storage` trait, the interface between the
//! ingestion pipeline, the lifecycle manager and a capture store backend.
//!
//! Every method is a single operation: the store serializes nothing across
//! calls, so a chain such as "compress, then archive" can be interrupted
//! between two updates.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::analysis::types::AnalysisReport;
use crate::error_handling::types::StorageError;
use crate::storage::types::{
    Capture, CaptureFilter, CaptureStats, GroupStats, NewCapture, StoreSummary,
};

#[async_trait]
pub trait Storage: Send + Sync {
    /// Inserts a capture and its statistics atomically: both rows commit or
    /// neither does. Returns the new capture id.
    async fn insert_capture_with_stats(
        &self,
        capture: &NewCapture,
        report: &AnalysisReport,
    ) -> Result<i64, StorageError>;

    async fn get_capture(&self, id: i64) -> Result<Capture, StorageError>;

    async fn get_captures(&self, filter: &CaptureFilter) -> Result<Vec<Capture>, StorageError>;

    async fn get_capture_stats(&self, id: i64) -> Result<Option<CaptureStats>, StorageError>;

    /// Unarchived captures taken before `cutoff`.
    async fn get_captures_for_archive(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Capture>, StorageError>;

    /// Archived captures taken before `cutoff`.
    async fn get_old_archived_captures(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Capture>, StorageError>;

    /// Captures that are neither compressed nor archived, oldest first.
    async fn get_pending_compressions(&self, limit: usize) -> Result<Vec<Capture>, StorageError>;

    /// Records a compressed file at `path`. The flag is never cleared.
    async fn mark_capture_compressed(&self, id: i64, path: &Path) -> Result<(), StorageError>;

    /// Records an archived file at `path`. The flag is never cleared.
    async fn mark_capture_archived(&self, id: i64, path: &Path) -> Result<(), StorageError>;

    async fn update_file_path(&self, id: i64, path: &Path) -> Result<(), StorageError>;

    /// Deletes a capture row; its statistics go with it.
    async fn delete_capture(&self, id: i64) -> Result<(), StorageError>;

    /// Every file path currently recorded.
    async fn get_all_file_paths(&self) -> Result<HashSet<PathBuf>, StorageError>;

    async fn get_summary(&self) -> Result<StoreSummary, StorageError>;

    async fn get_stats_by_hostname(&self) -> Result<Vec<GroupStats>, StorageError>;

    async fn get_stats_by_scenario(&self) -> Result<Vec<GroupStats>, StorageError>;
}
