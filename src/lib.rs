pub mod analysis;
pub mod configuration;
pub mod controller;
pub use controller::*;

pub mod error_handling;
pub mod ingestion;
pub mod lifecycle;
pub mod storage;
pub mod watcher;
