//! Push-channel client for a single execution.
//!
//! [`PushClient`] holds the reconnect state machine and does no I/O, so every
//! transition can be checked directly. [`spawn`] drives one client on a tokio
//! task: it connects through a [`TransportFactory`], decodes inbound frames
//! into [`PushMessage`]s, forwards them to a [`PushEventSink`] and schedules
//! reconnects with exponential backoff.

use std::collections::VecDeque;
use std::fmt;
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Sleep};
use tracing::{debug, error, info, warn};

use super::protocol::PushMessage;
use super::transport::{
    build_ws_url, CloseInfo, Connection, TransportError, TransportEvent, TransportFactory,
    NORMAL_CLOSURE,
};
use crate::execution::{is_placeholder, ExecutionStatus, LogEntry, NodeState};

pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(10_000);

const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

/// How long [`PushClientHandle::shutdown`] waits before aborting the task.
pub const CLIENT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub const CONSTRUCTION_FAILURE_MESSAGE: &str = "Failed to create WebSocket connection";
pub const UNKNOWN_ERROR_MESSAGE: &str = "Unknown WebSocket error";
pub const EXECUTION_COMPLETED_REASON: &str = "Execution completed";
const CLIENT_CLOSED_REASON: &str = "Client closed";
const EXECUTION_CHANGED_REASON: &str = "Execution changed";
const EXECUTION_ERROR_MESSAGE: &str = "Execution reported an error";

/// Connection health reported alongside execution events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelStatus {
    Connected,
    Disconnected,
    Error,
}

impl ChannelStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exponential backoff settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect number `attempt` (1-based).
    ///
    /// `min(base * 2^attempt, max)`, clamped to `[1ms, 60s]`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
            .clamp(MIN_RECONNECT_DELAY, MAX_RECONNECT_DELAY)
    }

    pub fn exhausted_message(&self) -> String {
        format!(
            "WebSocket connection failed after {} attempts",
            self.max_attempts
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

/// Why a connection or reconnect was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The id is still a client-side placeholder.
    Placeholder,
    /// The execution already finished.
    Terminal(ExecutionStatus),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Placeholder => f.write_str("placeholder execution id"),
            Self::Terminal(status) => write!(f, "execution is {}", status),
        }
    }
}

/// What to do after a connection closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseDecision {
    /// Closed on purpose; stay closed.
    Stop,
    /// Reconnecting would be pointless.
    Skip(SkipReason),
    /// Try again after `delay`.
    Reconnect { attempt: u32, delay: Duration },
    /// Out of attempts.
    GiveUp,
}

/// Reconnect state machine for one execution.
#[derive(Debug, Clone)]
pub struct PushClient {
    execution_id: String,
    last_known_status: ExecutionStatus,
    reconnect_attempts: u32,
    state: ConnectionState,
    policy: ReconnectPolicy,
}

impl PushClient {
    pub fn new(
        execution_id: impl Into<String>,
        status: ExecutionStatus,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            last_known_status: status,
            reconnect_attempts: 0,
            state: ConnectionState::Idle,
            policy,
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn last_known_status(&self) -> ExecutionStatus {
        self.last_known_status
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Whether a connection may be opened right now.
    pub fn check_connect(&self) -> Result<(), SkipReason> {
        if is_placeholder(&self.execution_id) {
            return Err(SkipReason::Placeholder);
        }
        if self.last_known_status.is_terminal() {
            return Err(SkipReason::Terminal(self.last_known_status));
        }
        Ok(())
    }

    pub fn begin_connect(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    pub fn on_open(&mut self) {
        self.reconnect_attempts = 0;
        self.state = ConnectionState::Open;
    }

    pub fn on_close(&mut self, info: &CloseInfo) -> CloseDecision {
        if info.is_intentional() {
            self.state = ConnectionState::Closed;
            return CloseDecision::Stop;
        }
        if let Err(reason) = self.check_connect() {
            self.state = ConnectionState::Closed;
            return CloseDecision::Skip(reason);
        }
        if self.reconnect_attempts < self.policy.max_attempts {
            self.reconnect_attempts += 1;
            self.state = ConnectionState::Reconnecting;
            return CloseDecision::Reconnect {
                attempt: self.reconnect_attempts,
                delay: self.policy.delay_for(self.reconnect_attempts),
            };
        }
        self.state = ConnectionState::Closed;
        CloseDecision::GiveUp
    }

    /// Record a new status. Returns `true` if an open or pending connection
    /// must now be torn down because the execution finished.
    pub fn update_status(&mut self, status: ExecutionStatus) -> bool {
        if status != self.last_known_status {
            self.reconnect_attempts = 0;
        }
        self.last_known_status = status;
        status.is_terminal() && self.state != ConnectionState::Closed
    }

    pub fn update_execution_id(&mut self, execution_id: impl Into<String>) {
        self.execution_id = execution_id.into();
        self.reconnect_attempts = 0;
    }

    pub fn mark_closed(&mut self) {
        self.state = ConnectionState::Closed;
    }
}

/// Receiver of everything a push client observes.
pub trait PushEventSink: Send + Sync {
    fn on_log(&self, entry: LogEntry);

    /// Raw execution status as sent by the server.
    fn on_status(&self, status: &str);

    fn on_node_update(&self, node_id: &str, state: NodeState);

    fn on_completion(&self, _result: Value) {}

    fn on_error(&self, _message: &str) {}

    fn on_channel_status(&self, _status: ChannelStatus) {}
}

#[derive(Debug)]
enum Command {
    UpdateStatus(ExecutionStatus),
    UpdateExecutionId(String),
    Close,
}

/// Whether the driver keeps running after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Handle to a running push client task.
pub struct PushClientHandle {
    tx: mpsc::UnboundedSender<Command>,
    handle: JoinHandle<()>,
}

impl PushClientHandle {
    /// Tell the client about a status change. A terminal status closes the
    /// connection with code 1000.
    pub fn update_status(&self, status: ExecutionStatus) {
        let _ = self.tx.send(Command::UpdateStatus(status));
    }

    /// Follow a different execution: any open connection is closed with
    /// 1000, the attempt count is reset and the new id is connected to
    /// right away (unless it is a placeholder).
    pub fn update_execution_id(&self, execution_id: impl Into<String>) {
        let _ = self.tx.send(Command::UpdateExecutionId(execution_id.into()));
    }

    /// Close with 1000 and cancel any pending reconnect. Does not wait.
    pub fn close(&self) {
        let _ = self.tx.send(Command::Close);
    }

    /// Stop the task at its next await point, without a close handshake.
    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Close and wait for the task to exit. A task still running after
    /// [`CLIENT_SHUTDOWN_TIMEOUT`] is aborted.
    pub async fn shutdown(mut self) {
        let _ = self.tx.send(Command::Close);
        match timeout(CLIENT_SHUTDOWN_TIMEOUT, &mut self.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Push client task ended abnormally: {}", e),
            Err(_) => {
                warn!(
                    "Push client did not stop within {}s, aborting",
                    CLIENT_SHUTDOWN_TIMEOUT.as_secs()
                );
                self.abort();
                let _ = self.handle.await;
            }
        }
    }
}

/// Start driving `client` on a new task. The first connect happens right away.
pub fn spawn(
    client: PushClient,
    origin: impl Into<String>,
    factory: Arc<dyn TransportFactory>,
    sink: Arc<dyn PushEventSink>,
) -> PushClientHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let driver = Driver {
        client,
        origin: origin.into(),
        factory,
        sink,
        connection: None,
        reconnect: None,
        commands: rx,
        deferred: VecDeque::new(),
    };
    let handle = tokio::spawn(driver.run());
    PushClientHandle { tx, handle }
}

struct Driver {
    client: PushClient,
    origin: String,
    factory: Arc<dyn TransportFactory>,
    sink: Arc<dyn PushEventSink>,
    connection: Option<Box<dyn Connection>>,
    reconnect: Option<Pin<Box<Sleep>>>,
    commands: mpsc::UnboundedReceiver<Command>,
    /// Commands that arrived while a connect was in flight.
    deferred: VecDeque<Command>,
}

impl Driver {
    async fn run(mut self) {
        let mut flow = self.connect().await;

        while flow == Flow::Continue {
            flow = match self.deferred.pop_front() {
                Some(cmd) => self.handle_command(Some(cmd)).await,
                None => tokio::select! {
                    cmd = self.commands.recv() => self.handle_command(cmd).await,
                    event = next_event(&mut self.connection) => {
                        self.handle_event(event).await;
                        Flow::Continue
                    }
                    _ = reconnect_due(&mut self.reconnect) => {
                        self.reconnect = None;
                        self.connect().await
                    }
                },
            };
        }

        debug!("Push client for {} stopped", self.client.execution_id());
    }

    async fn handle_command(&mut self, cmd: Option<Command>) -> Flow {
        match cmd {
            Some(Command::UpdateStatus(status)) => {
                if self.client.update_status(status) {
                    debug!(
                        "Closing push channel - execution {} is {}",
                        self.client.execution_id(),
                        status
                    );
                    self.close_connection(EXECUTION_COMPLETED_REASON).await;
                }
                Flow::Continue
            }
            Some(Command::UpdateExecutionId(id)) => {
                debug!(
                    "Push client switching from {} to {}",
                    self.client.execution_id(),
                    id
                );
                self.close_connection(EXECUTION_CHANGED_REASON).await;
                self.client.update_execution_id(id);
                self.connect().await
            }
            Some(Command::Close) | None => {
                self.close_connection(CLIENT_CLOSED_REASON).await;
                Flow::Stop
            }
        }
    }

    /// Open a connection for the current execution id. A `Close` received
    /// while the connect is in flight abandons it; other commands are kept
    /// for after.
    async fn connect(&mut self) -> Flow {
        if let Err(reason) = self.client.check_connect() {
            debug!(
                "Skipping push connection for {}: {}",
                self.client.execution_id(),
                reason
            );
            self.client.mark_closed();
            return Flow::Continue;
        }

        let url = build_ws_url(&self.origin, self.client.execution_id());
        debug!("Connecting push channel: {}", url);
        self.client.begin_connect();

        let result = {
            let mut connecting = self.factory.connect(&url);
            loop {
                tokio::select! {
                    result = &mut connecting => break result,
                    cmd = self.commands.recv() => match cmd {
                        Some(Command::Close) | None => {
                            debug!("Push connect to {} abandoned", url);
                            self.client.mark_closed();
                            return Flow::Stop;
                        }
                        Some(cmd) => self.deferred.push_back(cmd),
                    },
                }
            }
        };

        match result {
            Ok(connection) => {
                self.connection = Some(connection);
                self.client.on_open();
                info!("Push channel connected for {}", self.client.execution_id());
                self.sink.on_channel_status(ChannelStatus::Connected);
            }
            Err(err) if err.is_construction() => {
                let message = err.message().unwrap_or(CONSTRUCTION_FAILURE_MESSAGE);
                error!(
                    "Failed to create push connection for {}: {}",
                    self.client.execution_id(),
                    message
                );
                self.client.mark_closed();
                self.sink.on_channel_status(ChannelStatus::Error);
                self.sink.on_error(message);
            }
            Err(err) => {
                self.report_error(&err);
                self.handle_close(CloseInfo::abnormal());
            }
        }
        Flow::Continue
    }

    async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(text) => self.handle_message(&text).await,
            TransportEvent::Error(err) => self.report_error(&err),
            TransportEvent::Closed(info) => {
                self.connection = None;
                self.handle_close(info);
            }
        }
    }

    async fn handle_message(&mut self, text: &str) {
        let message = match PushMessage::parse(text) {
            Ok(m) => m,
            Err(e) => {
                error!(
                    "Failed to parse push message for {}: {}",
                    self.client.execution_id(),
                    e
                );
                return;
            }
        };

        match &message {
            PushMessage::Log { log: Some(entry) } => self.sink.on_log(entry.clone()),
            PushMessage::Log { log: None } => debug!("Ignoring log message without entry"),
            PushMessage::Status { status: Some(raw) } => {
                self.sink.on_status(raw);
                let status = ExecutionStatus::from_backend(raw);
                if self.client.update_status(status) {
                    self.close_connection(EXECUTION_COMPLETED_REASON).await;
                }
            }
            PushMessage::Status { status: None } => debug!("Ignoring status message without status"),
            PushMessage::NodeUpdate { .. } => match message.node_update() {
                Some((node_id, state)) => self.sink.on_node_update(&node_id, state),
                None => debug!("Ignoring node update without node id"),
            },
            PushMessage::Completion { result } => self.sink.on_completion(result.clone()),
            PushMessage::Error { error } => {
                self.sink
                    .on_error(error.as_deref().unwrap_or(EXECUTION_ERROR_MESSAGE));
            }
            PushMessage::Unknown => debug!("Ignoring unknown push message type"),
        }
    }

    fn report_error(&self, err: &TransportError) {
        let message = err.message().unwrap_or(UNKNOWN_ERROR_MESSAGE);
        error!(
            "Push channel error for {}: {}",
            self.client.execution_id(),
            message
        );
        self.sink.on_channel_status(ChannelStatus::Error);
        self.sink.on_error(message);
    }

    fn handle_close(&mut self, info: CloseInfo) {
        debug!(
            "Push channel for {} closed (code {}, reason: {}, clean: {}, attempts: {})",
            self.client.execution_id(),
            info.code,
            info.reason_or_default(),
            info.was_clean,
            self.client.reconnect_attempts()
        );
        self.sink.on_channel_status(ChannelStatus::Disconnected);

        match self.client.on_close(&info) {
            CloseDecision::Stop => {}
            CloseDecision::Skip(reason) => debug!(
                "Not reconnecting push channel for {}: {}",
                self.client.execution_id(),
                reason
            ),
            CloseDecision::Reconnect { attempt, delay } => {
                debug!(
                    "Reconnecting in {}ms (attempt {}/{})",
                    delay.as_millis(),
                    attempt,
                    self.client.policy().max_attempts
                );
                self.reconnect = Some(Box::pin(sleep(delay)));
            }
            CloseDecision::GiveUp => {
                warn!(
                    "Max reconnect attempts reached for {}",
                    self.client.execution_id()
                );
                self.sink.on_error(&self.client.policy().exhausted_message());
            }
        }
    }

    /// Close any open connection with 1000 and drop a pending reconnect.
    async fn close_connection(&mut self, reason: &str) {
        self.reconnect = None;
        if let Some(mut connection) = self.connection.take() {
            connection.close(NORMAL_CLOSURE, reason).await;
            self.sink.on_channel_status(ChannelStatus::Disconnected);
        }
        self.client.mark_closed();
    }
}

async fn next_event(connection: &mut Option<Box<dyn Connection>>) -> TransportEvent {
    match connection {
        Some(connection) => connection.next_event().await,
        None => pending().await,
    }
}

async fn reconnect_due(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}
