use std::path::{Path, PathBuf};

use log::{info, trace, warn};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error_handling::types::WatchError;
use crate::ingestion::validator::is_quarantined;
use crate::watcher::debouncer::Debouncer;

/// Watches the inbox and feeds write activity into a [`Debouncer`].
///
/// notify delivers events on its own thread; they are forwarded to a single
/// tokio task which is the only caller of `Debouncer::touch`.
pub struct DirectoryWatcher {
    watcher: RecommendedWatcher,
    consumer: JoinHandle<()>,
    root: PathBuf,
}

/// Events that may mean new bytes under a path.
fn is_write_event(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => false,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    }
}

impl DirectoryWatcher {
    /// Starts watching `root` (non-recursively).
    ///
    /// Failing to create the watcher or to watch `root` is fatal for the
    /// caller; errors reported later by the backend are only logged.
    pub fn start(root: &Path, debouncer: Debouncer) -> Result<Self, WatchError> {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = event_tx.send(res);
        })
        .map_err(WatchError::InitFailed)?;
        watcher
            .watch(root, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::WatchFailed(root.to_path_buf(), e))?;

        let consumer = tokio::spawn(async move {
            while let Some(res) = event_rx.recv().await {
                match res {
                    Ok(event) if is_write_event(&event.kind) => {
                        for path in event.paths {
                            if is_quarantined(&path) {
                                trace!("Ignoring quarantined {}", path.display());
                                continue;
                            }
                            debouncer.touch(path);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Watch error: {}", e),
                }
            }
            debouncer.cancel_all();
        });

        info!("Watching {}", root.display());
        Ok(Self {
            watcher,
            consumer,
            root: root.to_path_buf(),
        })
    }

    /// Stops event delivery and drops any timers that have not fired yet.
    pub async fn stop(self) {
        let DirectoryWatcher {
            watcher,
            consumer,
            root,
        } = self;
        // dropping the watcher closes the event channel and ends the consumer
        drop(watcher);
        if let Err(e) = consumer.await {
            warn!("Watch consumer for {} ended abnormally: {}", root.display(), e);
        }
        info!("Stopped watching {}", root.display());
    }
}
