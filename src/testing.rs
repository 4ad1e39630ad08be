//! Test doubles shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::future::pending;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::client::transport::{Connection, TransportError, TransportEvent, TransportFactory};
use crate::client::ws_client::{ChannelStatus, PushEventSink};
use crate::client::{ExecutionBackend, ExecutionSnapshot};
use crate::error::{Error, Result};
use crate::execution::{LogEntry, NodeState};

#[derive(Debug, Clone)]
pub enum MockResponse {
    Snapshot(ExecutionSnapshot),
    NotFound,
    Status(u16),
}

/// `ExecutionBackend` answering from a fixed table and recording every call.
#[derive(Default)]
pub struct MockBackend {
    responses: Mutex<HashMap<String, MockResponse>>,
    calls: Mutex<Vec<String>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, execution_id: &str, response: MockResponse) -> Self {
        self.set_response(execution_id, response);
        self
    }

    pub fn set_response(&self, execution_id: &str, response: MockResponse) {
        self.responses
            .lock()
            .unwrap()
            .insert(execution_id.to_string(), response);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionBackend for MockBackend {
    async fn get_execution_snapshot(&self, execution_id: &str) -> Result<ExecutionSnapshot> {
        self.calls.lock().unwrap().push(execution_id.to_string());
        let response = self.responses.lock().unwrap().get(execution_id).cloned();
        match response {
            Some(MockResponse::Snapshot(snapshot)) => Ok(snapshot),
            Some(MockResponse::Status(status)) => Err(Error::Backend {
                status,
                message: "mock failure".into(),
            }),
            Some(MockResponse::NotFound) | None => {
                Err(Error::ExecutionNotFound(execution_id.to_string()))
            }
        }
    }
}

/// One scripted outcome of `TransportFactory::connect`.
#[derive(Debug, Clone)]
pub enum ScriptedConnect {
    Fail(TransportError),
    /// Open a connection that yields these events, then stays silent.
    Open(Vec<TransportEvent>),
}

/// `TransportFactory` that plays back a script. Once the script runs out,
/// every connect fails.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<ScriptedConnect>>,
    urls: Mutex<Vec<String>>,
    closes: Arc<Mutex<Vec<(u16, String)>>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<ScriptedConnect>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    pub fn connect_count(&self) -> usize {
        self.urls.lock().unwrap().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    /// `(code, reason)` of every client-initiated close.
    pub fn closes(&self) -> Vec<(u16, String)> {
        self.closes.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransportFactory for ScriptedTransport {
    async fn connect(
        &self,
        url: &str,
    ) -> std::result::Result<Box<dyn Connection>, TransportError> {
        self.urls.lock().unwrap().push(url.to_string());
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(ScriptedConnect::Open(events)) => Ok(Box::new(ScriptedConnection {
                events: events.into(),
                closes: self.closes.clone(),
            })),
            Some(ScriptedConnect::Fail(err)) => Err(err),
            None => Err(TransportError::Connection("script exhausted".into())),
        }
    }
}

struct ScriptedConnection {
    events: VecDeque<TransportEvent>,
    closes: Arc<Mutex<Vec<(u16, String)>>>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn next_event(&mut self) -> TransportEvent {
        match self.events.pop_front() {
            Some(event) => event,
            None => pending().await,
        }
    }

    async fn close(&mut self, code: u16, reason: &str) {
        self.closes.lock().unwrap().push((code, reason.to_string()));
    }
}

/// `TransportFactory` whose connects or closes never finish.
pub struct HangingTransport {
    hang_on_close: bool,
    connects: Mutex<usize>,
}

impl HangingTransport {
    /// Every connect stays pending.
    pub fn connecting() -> Self {
        Self {
            hang_on_close: false,
            connects: Mutex::new(0),
        }
    }

    /// Connects succeed, but closing the connection never completes.
    pub fn closing() -> Self {
        Self {
            hang_on_close: true,
            connects: Mutex::new(0),
        }
    }

    pub fn connect_count(&self) -> usize {
        *self.connects.lock().unwrap()
    }
}

#[async_trait]
impl TransportFactory for HangingTransport {
    async fn connect(
        &self,
        _url: &str,
    ) -> std::result::Result<Box<dyn Connection>, TransportError> {
        *self.connects.lock().unwrap() += 1;
        if self.hang_on_close {
            return Ok(Box::new(StuckConnection));
        }
        pending().await
    }
}

struct StuckConnection;

#[async_trait]
impl Connection for StuckConnection {
    async fn next_event(&mut self) -> TransportEvent {
        pending().await
    }

    async fn close(&mut self, _code: u16, _reason: &str) {
        pending::<()>().await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Log(Value),
    Status(String),
    Node(String, Value),
    Completion(Value),
    Error(String),
    Channel(ChannelStatus),
}

/// `PushEventSink` that records everything it is given.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Error(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: SinkEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl PushEventSink for RecordingSink {
    fn on_log(&self, entry: LogEntry) {
        self.record(SinkEvent::Log(entry));
    }

    fn on_status(&self, status: &str) {
        self.record(SinkEvent::Status(status.to_string()));
    }

    fn on_node_update(&self, node_id: &str, state: NodeState) {
        self.record(SinkEvent::Node(node_id.to_string(), state));
    }

    fn on_completion(&self, result: Value) {
        self.record(SinkEvent::Completion(result));
    }

    fn on_error(&self, message: &str) {
        self.record(SinkEvent::Error(message.to_string()));
    }

    fn on_channel_status(&self, status: ChannelStatus) {
        self.record(SinkEvent::Channel(status));
    }
}
