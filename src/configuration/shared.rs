use super::config::Config;
use crate::error_handling::types::ConfigError;
use log::info;
use std::sync::{Arc, RwLock};

/// Thread-safe accessor around the live configuration.
///
/// Readers take a snapshot with [`SharedConfig::get`] at the start of an
/// operation and work from that copy, so an [`update`](SharedConfig::update)
/// running concurrently is either fully visible or not visible at all.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<Config>>,
}

impl SharedConfig {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Returns a snapshot of the current configuration.
    pub fn get(&self) -> Config {
        // writers only ever assign a whole validated Config
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Validates and installs a new configuration.
    pub fn update(&self, config: Config) -> Result<(), ConfigError> {
        config.validate()?;
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = config;
        info!("Configuration updated");
        Ok(())
    }
}
