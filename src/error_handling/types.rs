use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    EmptyPath(String),
    NotInRange(String),
    DirectoryCreationFailed(PathBuf, std::io::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::EmptyPath(e) => write!(f, "{} is empty", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
            ConfigError::DirectoryCreationFailed(p, e) => {
                write!(f, "Failed to create directory {}: {}", p.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

#[derive(Debug)]
pub enum StorageError {
    ConnectionFailed(String),
    WriteFailed(String),
    ReadFailed(String),
    NotFound(i64),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed(e) => write!(f, "Storage connection failed: {}", e),
            StorageError::WriteFailed(e) => write!(f, "Storage write failed: {}", e),
            StorageError::ReadFailed(e) => write!(f, "Storage read failed: {}", e),
            StorageError::NotFound(id) => write!(f, "Capture {} not found", id),
        }
    }
}

impl std::error::Error for StorageError {}

/// Reasons a filename is rejected and quarantined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    InvalidFormat(String),
    InvalidDatetime(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidFormat(name) => write!(f, "Invalid filename format: {}", name),
            ValidationError::InvalidDatetime(e) => write!(f, "Invalid datetime: {}", e),
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug)]
pub enum AnalysisError {
    OpenFailed(std::io::Error),
    ReadFailed(std::io::Error),
    ParseFailed(String),
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisError::OpenFailed(e) => write!(f, "Failed to open capture: {}", e),
            AnalysisError::ReadFailed(e) => write!(f, "Failed to read capture: {}", e),
            AnalysisError::ParseFailed(e) => write!(f, "Failed to parse capture: {}", e),
        }
    }
}

impl std::error::Error for AnalysisError {}

#[derive(Debug)]
pub enum WatchError {
    InitFailed(notify::Error),
    WatchFailed(PathBuf, notify::Error),
}

impl fmt::Display for WatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchError::InitFailed(e) => write!(f, "Failed to create watcher: {}", e),
            WatchError::WatchFailed(p, e) => write!(f, "Failed to watch {}: {}", p.display(), e),
        }
    }
}

impl std::error::Error for WatchError {}

#[derive(Debug)]
pub enum IngestError {
    Invalid(ValidationError),
    CreateDirFailed(PathBuf, std::io::Error),
    RelocationFailed(PathBuf, std::io::Error),
    StatFailed(PathBuf, std::io::Error),
    AnalysisFailed(AnalysisError),
    StorageFailed(StorageError),
    WorkerFailed(String),
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::Invalid(e) => write!(f, "Invalid capture file: {}", e),
            IngestError::CreateDirFailed(p, e) => {
                write!(f, "Failed to create organized dir {}: {}", p.display(), e)
            }
            IngestError::RelocationFailed(p, e) => {
                write!(f, "Failed to move file to {}: {}", p.display(), e)
            }
            IngestError::StatFailed(p, e) => {
                write!(f, "Failed to get file info for {}: {}", p.display(), e)
            }
            IngestError::AnalysisFailed(e) => write!(f, "Analysis error: {}", e),
            IngestError::StorageFailed(e) => write!(f, "Storage error: {}", e),
            IngestError::WorkerFailed(e) => write!(f, "Worker failed: {}", e),
        }
    }
}

impl std::error::Error for IngestError {}

impl From<AnalysisError> for IngestError {
    fn from(err: AnalysisError) -> Self {
        IngestError::AnalysisFailed(err)
    }
}

impl From<StorageError> for IngestError {
    fn from(err: StorageError) -> Self {
        IngestError::StorageFailed(err)
    }
}

#[derive(Debug)]
pub enum LifecycleError {
    FileMissing(PathBuf),
    AlreadyCompressed(i64),
    AlreadyArchived(i64),
    OutsideOrganizedTree(PathBuf),
    IoError(PathBuf, std::io::Error),
    StorageError(StorageError),
    WorkerFailed(String),
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleError::FileMissing(p) => write!(f, "File does not exist: {}", p.display()),
            LifecycleError::AlreadyCompressed(id) => write!(f, "Capture {} is already compressed", id),
            LifecycleError::AlreadyArchived(id) => write!(f, "Capture {} is already archived", id),
            LifecycleError::OutsideOrganizedTree(p) => {
                write!(f, "{} is not inside the organized directory", p.display())
            }
            LifecycleError::IoError(p, e) => write!(f, "IO error on {}: {}", p.display(), e),
            LifecycleError::StorageError(e) => write!(f, "Storage error: {}", e),
            LifecycleError::WorkerFailed(e) => write!(f, "Worker failed: {}", e),
        }
    }
}

impl std::error::Error for LifecycleError {}

impl From<StorageError> for LifecycleError {
    fn from(err: StorageError) -> Self {
        LifecycleError::StorageError(err)
    }
}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    StorageError(StorageError),
    WatchError(WatchError),
    InitializationFailed(String),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::StorageError(e) => write!(f, "Storage error: {}", e),
            ControllerError::WatchError(e) => write!(f, "Watcher error: {}", e),
            ControllerError::InitializationFailed(e) => write!(f, "Initialization failed: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::ConfigurationError(err)
    }
}

impl From<StorageError> for ControllerError {
    fn from(err: StorageError) -> Self {
        ControllerError::StorageError(err)
    }
}

impl From<WatchError> for ControllerError {
    fn from(err: WatchError) -> Self {
        ControllerError::WatchError(err)
    }
}
