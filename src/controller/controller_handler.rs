use std::future::Future;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use crate::configuration::{Config, SharedConfig};
use crate::error_handling::types::*;
use crate::ingestion::{FilenameValidator, Organizer};
use crate::lifecycle::LifecycleManager;
use crate::storage::{DatabaseStorage, Storage};
use crate::watcher::{Debouncer, DirectoryWatcher};

/// Wires the watcher, the ingestion workers and the lifecycle manager
/// together and owns them for the life of the process.
pub struct Controller {
    config: SharedConfig,
}

impl Controller {
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        config.validate()?;
        Ok(Self {
            config: SharedConfig::new(config),
        })
    }

    /// Handle for collaborators that read or update the live configuration.
    pub fn shared_config(&self) -> SharedConfig {
        self.config.clone()
    }

    /// Runs until Ctrl-C.
    pub async fn run(&mut self) -> Result<(), ControllerError> {
        self.run_until(async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Unable to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested");
        })
        .await
    }

    /// Runs until `shutdown` completes, then stops accepting files and waits
    /// for in-flight ingestions to finish.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<(), ControllerError>
    where
        F: Future<Output = ()>,
    {
        let config = self.config.get();
        config.ensure_directories()?;

        let storage: Arc<dyn Storage> =
            Arc::new(DatabaseStorage::new_file(&config.database_path).await?);
        let validator = FilenameValidator::new()
            .map_err(|e| ControllerError::InitializationFailed(e.to_string()))?;
        let organizer = Organizer::new(self.config.clone(), storage.clone(), validator);
        let lifecycle = Arc::new(LifecycleManager::new(self.config.clone(), storage));

        let (ready_tx, mut ready_rx) = mpsc::unbounded_channel();
        let debouncer = Debouncer::new(config.quiet_period(), ready_tx);
        let watcher = DirectoryWatcher::start(&config.watch_dir, debouncer)?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let lifecycle_task = lifecycle.start_periodic(stop_rx);

        let mut workers = JoinSet::new();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                ready = ready_rx.recv() => match ready {
                    Some(path) => {
                        debug!("Dispatching {}", path.display());
                        let organizer = organizer.clone();
                        workers.spawn(async move { organizer.handle_ready(path).await });
                    }
                    None => {
                        warn!("Watcher channel closed");
                        break;
                    }
                },
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    if let Err(e) = joined {
                        error!("Ingestion worker failed: {}", e);
                    }
                }
            }
        }

        watcher.stop().await;
        let _ = stop_tx.send(true);
        if let Err(e) = lifecycle_task.await {
            error!("Lifecycle task ended abnormally: {}", e);
        }

        if !workers.is_empty() {
            info!("Waiting for {} in-flight ingestions", workers.len());
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Ingestion worker failed: {}", e);
            }
        }
        info!("Controller stopped");
        Ok(())
    }
}
