//! Retention Sweeper
//!
//! Periodically removes artifacts older than the retention window. Runs
//! independently of compression traffic and never takes a compression slot.

use crate::storage::StorageManager;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct RetentionSweeper {
    storage: Arc<StorageManager>,
    retention: Duration,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(storage: Arc<StorageManager>, retention: Duration, interval: Duration) -> Self {
        Self {
            storage,
            retention,
            interval,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Delete every artifact older than the retention window.
    ///
    /// Never fails: listing and deletion errors are logged and the run
    /// reports whatever it managed to remove.
    pub async fn sweep_once(&self) -> usize {
        let cutoff = SystemTime::now()
            .checked_sub(self.retention)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        self.sweep_before(cutoff).await
    }

    /// Delete every artifact last modified strictly before `cutoff`.
    pub async fn sweep_before(&self, cutoff: SystemTime) -> usize {
        let entries = match self.storage.list_with_age().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Retention sweep could not list storage");
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.iter().filter(|e| e.modified < cutoff) {
            if self.storage.delete(&entry.path).await {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, scanned = entries.len(), "Retention sweep removed artifacts");
        } else {
            debug!(scanned = entries.len(), "Retention sweep found nothing to remove");
        }
        removed
    }

    /// Run on a fixed interval until the returned handle is shut down.
    ///
    /// The first sweep happens one interval after start.
    pub fn spawn(self) -> SweeperHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let period = self.interval.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            info!(
                interval_secs = period.as_secs(),
                retention_secs = self.retention.as_secs(),
                "Retention sweeper started"
            );
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep_once().await;
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Retention sweeper stopped");
        });

        SweeperHandle {
            stop: stop_tx,
            task,
        }
    }
}

/// Owner of a running sweeper task.
pub struct SweeperHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the loop to stop and wait for it. A sweep already in progress
    /// finishes first.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Retention sweeper task ended abnormally");
        }
    }
}
