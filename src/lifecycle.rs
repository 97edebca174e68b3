pub mod cleanup;
pub mod compression;
pub mod lifecycle_manager;

pub use cleanup::UntrackedFile;
pub use lifecycle_manager::{
    ArchiveSummary, CleanupCandidates, CleanupReport, CompressionSummary, LifecycleManager,
    RetentionSummary,
};
