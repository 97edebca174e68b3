pub mod config;
pub mod shared;
pub mod types;

pub use config::Config;
pub use shared::SharedConfig;
pub use types::LogLevel;
