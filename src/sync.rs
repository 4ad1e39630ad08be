//! Orchestration: the store, the reducer, the poller and the push clients
//! wired together behind one [`SyncEngine`].
//!
//! The engine itself owns no transition logic. Host intents go straight to
//! the reducer through the store. A supervisor task watches the store and
//! keeps exactly one push client per running, confirmed execution in a tab
//! that is linked to a workflow. Push events are folded back into the store
//! by a [`PushEventSink`] bound to that execution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::client::transport::TransportFactory;
use crate::client::ws_client::{self, ChannelStatus, PushClient, PushClientHandle, PushEventSink};
use crate::client::{ExecutionBackend, ReconnectPolicy};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::execution::{
    is_confirmed, reducer, ExecutionStatus, LogEntry, NodeState, Tab, TabList, TabStore,
};
use crate::poller::{self, ExecutionPoller, PollReport};

/// Notifications that have no place in the tab model.
///
/// All methods default to doing nothing.
pub trait ExecutionObserver: Send + Sync {
    fn on_completion(&self, _workflow_id: &str, _execution_id: &str, _result: &Value) {}

    fn on_error(&self, _workflow_id: &str, _execution_id: &str, _message: &str) {}

    fn on_channel_status(&self, _workflow_id: &str, _execution_id: &str, _status: ChannelStatus) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ExecutionObserver for NoopObserver {}

/// Engine settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Origin the push URL is derived from.
    pub origin: String,
    pub reconnect: ReconnectPolicy,
    pub poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SyncConfig {
    fn from(config: &Config) -> Self {
        Self {
            origin: config.push.origin.clone(),
            reconnect: config.push.reconnect_policy(),
            poll_interval: config.poller.interval(),
        }
    }
}

/// Execution lifecycle synchronization engine.
pub struct SyncEngine {
    store: TabStore,
    backend: Arc<dyn ExecutionBackend>,
    transport: Arc<dyn TransportFactory>,
    observer: Arc<dyn ExecutionObserver>,
    config: SyncConfig,
    poller: ExecutionPoller,
    shutdown_tx: Option<mpsc::Sender<()>>,
    supervisor: Option<JoinHandle<()>>,
}

impl SyncEngine {
    pub fn new(
        store: TabStore,
        backend: Arc<dyn ExecutionBackend>,
        transport: Arc<dyn TransportFactory>,
        config: SyncConfig,
    ) -> Self {
        let poller =
            ExecutionPoller::new(store.clone(), backend.clone()).with_interval(config.poll_interval);
        Self {
            store,
            backend,
            transport,
            observer: Arc::new(NoopObserver),
            config,
            poller,
            shutdown_tx: None,
            supervisor: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn store(&self) -> &TabStore {
        &self.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Start the poller and the push-client supervisor.
    pub fn start(&mut self) {
        if self.supervisor.is_some() {
            return;
        }
        self.poller.start();

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let supervisor = Supervisor {
            store: self.store.clone(),
            transport: self.transport.clone(),
            observer: self.observer.clone(),
            origin: self.config.origin.clone(),
            policy: self.config.reconnect.clone(),
            clients: HashMap::new(),
        };
        self.supervisor = Some(tokio::spawn(supervisor.run(shutdown_rx)));
        info!("Sync engine started");
    }

    /// Stop polling, close every push connection and wait for all tasks.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.poller.stop().await?;

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.supervisor.take() {
            handle.await.map_err(|e| Error::Internal(e.to_string()))?;
            info!("Sync engine stopped");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.supervisor.is_some()
    }

    /// Run one poll pass right away, outside the timer.
    pub async fn poll_now(&self) -> PollReport {
        poller::poll_once(&self.store, self.backend.as_ref()).await
    }

    /// A run was started (or confirmed) in the active tab. Without an active
    /// tab there is nothing to attach it to.
    pub fn handle_execution_start(&self, active_tab_id: Option<&str>, execution_id: &str) {
        let Some(tab_id) = active_tab_id else {
            debug!("No active tab for execution {}", execution_id);
            return;
        };
        self.store
            .update(|tabs| reducer::handle_execution_start(tabs, tab_id, execution_id));
    }

    pub fn handle_clear_executions(&self, workflow_id: &str) {
        self.store
            .update(|tabs| reducer::handle_clear_executions(tabs, workflow_id));
    }

    pub fn handle_remove_execution(&self, workflow_id: &str, execution_id: &str) {
        self.store
            .update(|tabs| reducer::handle_remove_execution(tabs, workflow_id, execution_id));
    }

    pub fn handle_execution_log_update(&self, workflow_id: &str, execution_id: &str, entry: LogEntry) {
        self.store.update(|tabs| {
            reducer::handle_execution_log_update(tabs, workflow_id, execution_id, entry)
        });
    }

    pub fn handle_execution_status_update(
        &self,
        workflow_id: &str,
        execution_id: &str,
        status: ExecutionStatus,
    ) {
        self.store.update(|tabs| {
            reducer::handle_execution_status_update(tabs, workflow_id, execution_id, status)
        });
    }

    pub fn handle_execution_node_update(
        &self,
        workflow_id: &str,
        execution_id: &str,
        node_id: &str,
        state: NodeState,
    ) {
        self.store.update(|tabs| {
            reducer::handle_execution_node_update(tabs, workflow_id, execution_id, node_id, state)
        });
    }
}

type ClientKey = (String, String);

struct TrackedClient {
    handle: PushClientHandle,
    status: ExecutionStatus,
}

struct Supervisor {
    store: TabStore,
    transport: Arc<dyn TransportFactory>,
    observer: Arc<dyn ExecutionObserver>,
    origin: String,
    policy: ReconnectPolicy,
    clients: HashMap<ClientKey, TrackedClient>,
}

impl Supervisor {
    async fn run(mut self, mut shutdown_rx: mpsc::Receiver<()>) {
        let mut changes = self.store.subscribe();
        let tabs = changes.borrow_and_update().clone();
        self.reconcile(&tabs).await;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let tabs = changes.borrow_and_update().clone();
                    self.reconcile(&tabs).await;
                }
            }
        }

        for (key, client) in self.clients.drain() {
            stop_client(&key, client.handle).await;
        }
    }

    /// Bring the set of push clients in line with `tabs`.
    async fn reconcile(&mut self, tabs: &TabList) {
        let wanted = tracked_executions(tabs);

        let existing: Vec<ClientKey> = self.clients.keys().cloned().collect();
        for key in existing {
            let status = wanted.get(&key).copied();
            match status {
                Some(status) if !status.is_terminal() => {
                    if let Some(client) = self.clients.get_mut(&key) {
                        if client.status != status {
                            client.handle.update_status(status);
                            client.status = status;
                        }
                    }
                }
                _ => {
                    if let Some(client) = self.clients.remove(&key) {
                        if let Some(status) = status {
                            client.handle.update_status(status);
                        }
                        stop_client(&key, client.handle).await;
                    }
                }
            }
        }

        for (key, status) in wanted {
            if status.is_terminal() || self.clients.contains_key(&key) {
                continue;
            }
            let handle = self.spawn_client(&key, status);
            self.clients.insert(key, TrackedClient { handle, status });
        }
    }

    fn spawn_client(&self, key: &ClientKey, status: ExecutionStatus) -> PushClientHandle {
        let (workflow_id, execution_id) = key;
        debug!(
            "Starting push client for {} (workflow {})",
            execution_id, workflow_id
        );
        let sink = Arc::new(StoreSink {
            store: self.store.clone(),
            observer: self.observer.clone(),
            workflow_id: workflow_id.clone(),
            execution_id: execution_id.clone(),
        });
        ws_client::spawn(
            PushClient::new(execution_id.clone(), status, self.policy.clone()),
            self.origin.clone(),
            self.transport.clone(),
            sink,
        )
    }
}

/// Confirmed executions in workflow-linked tabs, keyed by
/// `(workflow_id, execution_id)`.
fn tracked_executions(tabs: &[Arc<Tab>]) -> HashMap<ClientKey, ExecutionStatus> {
    let mut wanted = HashMap::new();
    for tab in tabs {
        let Some(workflow_id) = tab.workflow_id.as_ref() else {
            continue;
        };
        for exec in tab.executions.iter().filter(|e| is_confirmed(&e.id)) {
            wanted
                .entry((workflow_id.clone(), exec.id.clone()))
                .or_insert(exec.status);
        }
    }
    wanted
}

/// Close the client and wait for its task; a stuck task is aborted.
async fn stop_client(key: &ClientKey, handle: PushClientHandle) {
    debug!("Stopping push client for {}", key.1);
    handle.shutdown().await;
}

/// Folds one execution's push events into the store.
struct StoreSink {
    store: TabStore,
    observer: Arc<dyn ExecutionObserver>,
    workflow_id: String,
    execution_id: String,
}

impl PushEventSink for StoreSink {
    fn on_log(&self, entry: LogEntry) {
        self.store.update(|tabs| {
            reducer::handle_execution_log_update(tabs, &self.workflow_id, &self.execution_id, entry)
        });
    }

    fn on_status(&self, status: &str) {
        let status = ExecutionStatus::from_backend(status);
        self.store.update(|tabs| {
            reducer::handle_execution_status_update(
                tabs,
                &self.workflow_id,
                &self.execution_id,
                status,
            )
        });
    }

    fn on_node_update(&self, node_id: &str, state: NodeState) {
        self.store.update(|tabs| {
            reducer::handle_execution_node_update(
                tabs,
                &self.workflow_id,
                &self.execution_id,
                node_id,
                state,
            )
        });
    }

    fn on_completion(&self, result: Value) {
        self.observer
            .on_completion(&self.workflow_id, &self.execution_id, &result);
    }

    fn on_error(&self, message: &str) {
        self.observer
            .on_error(&self.workflow_id, &self.execution_id, message);
    }

    fn on_channel_status(&self, status: ChannelStatus) {
        self.observer
            .on_channel_status(&self.workflow_id, &self.execution_id, status);
    }
}
