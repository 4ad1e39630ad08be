//! Fallback poller.
//!
//! Periodically fetches a snapshot of every running, confirmed execution and
//! folds the results into the [`TabStore`]. It keeps tabs correct when the
//! push channel is down or never connected.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::client::ExecutionBackend;
use crate::error::{Error, Result};
use crate::execution::{is_confirmed, is_placeholder, reducer, ExecutionStatus, TabStore};

/// Default time between polls (in milliseconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Outcome of one poll pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Running executions with confirmed ids.
    pub candidates: usize,
    /// Snapshots fetched and applied.
    pub updated: usize,
    /// Fetches that failed.
    pub failed: usize,
    /// Failed fetches of executions the backend does not know. Counted in
    /// `failed` too.
    pub not_found: usize,
}

/// Background task that runs [`poll_once`] on a fixed interval.
pub struct ExecutionPoller {
    store: TabStore,
    backend: Arc<dyn ExecutionBackend>,
    interval: Duration,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ExecutionPoller {
    pub fn new(store: TabStore, backend: Arc<dyn ExecutionBackend>) -> Self {
        Self {
            store,
            backend,
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            shutdown_tx: None,
            handle: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start the background polling task. The first poll runs one interval
    /// from now. Calling `start` on a running poller does nothing.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let store = self.store.clone();
        let backend = self.backend.clone();
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Execution poller received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        poll_once(&store, backend.as_ref()).await;
                    }
                }
            }
        });

        self.handle = Some(handle);
        info!(
            "Execution poller started with {}ms interval",
            self.interval.as_millis()
        );
    }

    /// Stop the background task. No poll runs after this returns.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        if let Some(handle) = self.handle.take() {
            handle.await.map_err(|e| Error::Internal(e.to_string()))?;
            info!("Execution poller stopped");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

/// Poll every running, confirmed execution once and apply the results.
///
/// Does nothing (no fetch, no log) when there are no candidates. Fetches run
/// concurrently and fail independently; a failed execution keeps its state
/// and is retried on the next pass.
pub async fn poll_once(store: &TabStore, backend: &dyn ExecutionBackend) -> PollReport {
    let tabs = store.snapshot();

    let candidates: Vec<(String, ExecutionStatus)> = tabs
        .iter()
        .flat_map(|tab| tab.executions.iter())
        .filter(|exec| exec.is_running() && is_confirmed(&exec.id))
        .map(|exec| (exec.id.clone(), exec.status))
        .collect();

    if candidates.is_empty() {
        return PollReport::default();
    }

    debug!("Polling {} running execution(s)", candidates.len());

    let results = join_all(candidates.iter().map(|(id, _)| async move {
        (id, backend.get_execution_snapshot(id).await)
    }))
    .await;

    let mut report = PollReport {
        candidates: candidates.len(),
        ..PollReport::default()
    };
    let mut updates = HashMap::new();

    for ((id, result), (_, old_status)) in results.into_iter().zip(candidates.iter()) {
        match result {
            Ok(snapshot) => {
                let update = snapshot.into_update();
                if update.status != *old_status {
                    debug!(
                        "Execution {} status: {} -> {}",
                        id, old_status, update.status
                    );
                }
                updates.insert(id.clone(), update);
                report.updated += 1;
            }
            Err(e) => {
                report.failed += 1;
                if e.is_not_found() {
                    report.not_found += 1;
                }
                if is_placeholder(id) {
                    debug!("Skipping placeholder execution {}: {}", id, e);
                } else if e.is_not_found() {
                    error!("Execution {} is unknown to the backend: {}", id, e);
                } else {
                    error!("Failed to poll execution {} [{}]: {}", id, e.code(), e);
                }
            }
        }
    }

    if !updates.is_empty() {
        store.update(|tabs| reducer::handle_execution_snapshots(tabs, &updates));
    }

    report
}
