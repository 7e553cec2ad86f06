// THEORY:
// Finalized bursts leave the detection loop through the `NotificationDispatcher`.
// The loop must never wait on a disk or a network, so the hand-off is a bounded
// queue drained by one background worker:
//
// 1.  `submit` uses `try_send`. A full (or closed) queue drops the alert with a
//     warning. Losing an alert is preferable to stalling frame acquisition.
// 2.  The worker persists the selected frames on the blocking pool, then hands
//     the alert (with the saved paths) to the `NotificationSink`.
// 3.  After a successful delivery the persisted files are removed by a cleanup
//     task tracked in a `JoinSet`; a failed delivery keeps them on disk.
// 4.  `shutdown` closes the queue, lets the worker finish whatever is queued and
//     waits for every outstanding cleanup.
//
// Nothing the worker does can fail the detection loop. Errors are logged and
// counted in `DispatchStats`.

use crate::config::DispatchConfig;
use crate::core_modules::frame::Frame;
use crate::interfaces::{Alert, NotificationSink, PersistenceSink};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::{JoinError, JoinHandle, JoinSet};

/// Counters describing what happened to submitted alerts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
    /// Persisted files removed after delivery.
    pub cleaned: u64,
    pub persistence_errors: u64,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    cleaned: AtomicU64,
    persistence_errors: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            cleaned: self.cleaned.load(Ordering::Relaxed),
            persistence_errors: self.persistence_errors.load(Ordering::Relaxed),
        }
    }
}

pub struct NotificationDispatcher {
    sender: mpsc::Sender<Alert>,
    worker: JoinHandle<()>,
    counters: Arc<Counters>,
}

impl NotificationDispatcher {
    /// Starts the worker. Must be called from within a tokio runtime.
    pub fn spawn(
        config: &DispatchConfig,
        notifier: Arc<dyn NotificationSink>,
        store: Arc<dyn PersistenceSink>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let counters = Arc::new(Counters::default());
        let worker = DispatchWorker {
            notifier,
            store,
            cleanup_after_delivery: config.cleanup_after_delivery,
            counters: counters.clone(),
            cleanups: JoinSet::new(),
        };
        let worker = tokio::spawn(worker.run(receiver));

        Self {
            sender,
            worker,
            counters,
        }
    }

    /// Queues an alert without waiting. Returns `false` if it was dropped.
    pub fn submit(&self, alert: Alert) -> bool {
        match self.sender.try_send(alert) {
            Ok(()) => true,
            Err(TrySendError::Full(alert)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "notification queue full, dropping alert for burst started at {}",
                    alert.metadata.burst_started_at
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("notification worker is gone, dropping alert");
                false
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }

    /// Drains the queue and waits for the worker and its cleanup tasks.
    pub async fn shutdown(self) -> DispatchStats {
        let Self {
            sender,
            worker,
            counters,
        } = self;
        drop(sender);
        if let Err(err) = worker.await {
            log::error!("notification worker ended abnormally: {err}");
        }
        counters.snapshot()
    }
}

struct DispatchWorker {
    notifier: Arc<dyn NotificationSink>,
    store: Arc<dyn PersistenceSink>,
    cleanup_after_delivery: bool,
    counters: Arc<Counters>,
    cleanups: JoinSet<usize>,
}

impl DispatchWorker {
    async fn run(mut self, mut receiver: mpsc::Receiver<Alert>) {
        while let Some(mut alert) = receiver.recv().await {
            alert.saved_paths = persist(&self.store, &self.counters, &alert.images).await;

            match self.notifier.deliver(&alert).await {
                Ok(()) => {
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                    log::info!(
                        "delivered alert: {} images, direction {}, face {}",
                        alert.images.len(),
                        alert
                            .metadata
                            .motion_direction
                            .map_or_else(|| "unknown".to_string(), |d| d.to_string()),
                        alert.metadata.face_detected
                    );
                    if self.cleanup_after_delivery && !alert.saved_paths.is_empty() {
                        self.spawn_cleanup(alert.saved_paths);
                    }
                }
                Err(err) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    log::error!("alert delivery failed: {err}");
                }
            }

            while let Some(result) = self.cleanups.try_join_next() {
                self.record_cleanup(result);
            }
        }

        while let Some(result) = self.cleanups.join_next().await {
            self.record_cleanup(result);
        }
        log::debug!("notification worker stopped");
    }

    fn spawn_cleanup(&mut self, paths: Vec<PathBuf>) {
        let store = self.store.clone();
        let counters = self.counters.clone();
        self.cleanups.spawn_blocking(move || match store.delete_all(&paths) {
            Ok(removed) => removed,
            Err(err) => {
                counters.persistence_errors.fetch_add(1, Ordering::Relaxed);
                log::warn!("post-burst cleanup failed: {err}");
                0
            }
        });
    }

    fn record_cleanup(&self, result: Result<usize, JoinError>) {
        match result {
            Ok(removed) => {
                self.counters
                    .cleaned
                    .fetch_add(removed as u64, Ordering::Relaxed);
                log::debug!("cleanup removed {removed} files");
            }
            Err(err) => log::warn!("cleanup task failed: {err}"),
        }
    }
}

/// Saves each frame; frames that fail to save are skipped.
async fn persist(
    store: &Arc<dyn PersistenceSink>,
    counters: &Counters,
    images: &[Frame],
) -> Vec<PathBuf> {
    let store = store.clone();
    let frames = images.to_vec();
    let saved = tokio::task::spawn_blocking(move || {
        frames
            .iter()
            .map(|frame| store.save(frame))
            .collect::<Vec<_>>()
    })
    .await;

    let results = match saved {
        Ok(results) => results,
        Err(err) => {
            counters
                .persistence_errors
                .fetch_add(images.len() as u64, Ordering::Relaxed);
            log::error!("persistence task failed: {err}");
            return Vec::new();
        }
    };

    results
        .into_iter()
        .filter_map(|result| {
            result
                .inspect_err(|err| {
                    counters.persistence_errors.fetch_add(1, Ordering::Relaxed);
                    log::error!("could not persist frame: {err}");
                })
                .ok()
        })
        .collect()
}
