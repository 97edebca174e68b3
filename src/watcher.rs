pub mod debouncer;
pub mod directory_watcher;

pub use debouncer::Debouncer;
pub use directory_watcher::DirectoryWatcher;
