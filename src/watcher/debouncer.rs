//! Per-path quiet-period timers.
//!
//! Each touch of a path restarts its timer. A timer that runs to the end of
//! the quiet period removes its own entry and emits the path exactly once on
//! the ready channel. Entries carry a generation number so a timer that was
//! superseded while already waking up cannot fire.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, trace};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

struct PendingTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct TimerMap {
    next_generation: u64,
    timers: HashMap<PathBuf, PendingTimer>,
}

#[derive(Clone)]
pub struct Debouncer {
    quiet: Duration,
    pending: Arc<Mutex<TimerMap>>,
    ready_tx: UnboundedSender<PathBuf>,
}

fn lock(map: &Mutex<TimerMap>) -> MutexGuard<'_, TimerMap> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Debouncer {
    pub fn new(quiet: Duration, ready_tx: UnboundedSender<PathBuf>) -> Self {
        Self {
            quiet,
            pending: Arc::new(Mutex::new(TimerMap::default())),
            ready_tx,
        }
    }

    /// Records a write to `path`, (re)starting its quiet-period timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn touch(&self, path: PathBuf) {
        let mut map = lock(&self.pending);
        map.next_generation += 1;
        let generation = map.next_generation;

        if let Some(previous) = map.timers.remove(&path) {
            previous.handle.abort();
            trace!("Restarted timer for {}", path.display());
        }

        let pending = Arc::clone(&self.pending);
        let ready_tx = self.ready_tx.clone();
        let quiet = self.quiet;
        let key = path.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(quiet).await;
            let current = {
                let mut map = lock(&pending);
                match map.timers.get(&key) {
                    Some(timer) if timer.generation == generation => {
                        map.timers.remove(&key);
                        true
                    }
                    _ => false,
                }
            };
            if current {
                debug!("{} is stable", key.display());
                // receiver gone means shutdown is in progress
                let _ = ready_tx.send(key);
            }
        });
        map.timers.insert(path, PendingTimer { generation, handle });
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).timers.len()
    }

    /// Drops every pending timer without emitting anything.
    pub fn cancel_all(&self) {
        let mut map = lock(&self.pending);
        for (_, timer) in map.timers.drain() {
            timer.handle.abort();
        }
    }
}
