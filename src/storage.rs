//! Storage subsystem
//!
//! This module persists capture metadata and the statistics extracted from
//! each capture.
//!
//! Components:
//! - `storage_trait`: the Storage trait defining a uniform API.
//! - `types`: shared data types used by storage backends.
//! - `database_storage`: SQLite implementation on sqlx.

pub mod database_storage;
pub mod storage_trait;
pub mod types;

pub use database_storage::DatabaseStorage;
pub use storage_trait::Storage;
pub use types::{Capture, CaptureFilter, CaptureStats, GroupStats, NewCapture, StoreSummary};
