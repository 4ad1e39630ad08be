//! Clients for the workflow backend.
//!
//! - `rest_client`: snapshot fetches used by the fallback poller
//! - `transport`: WebSocket transport seam and URL building
//! - `protocol`: inbound push-channel messages
//! - `ws_client`: per-execution push client with reconnect backoff

pub mod protocol;
pub mod rest_client;
pub mod transport;
pub mod ws_client;

pub use protocol::PushMessage;
pub use rest_client::{ExecutionBackend, ExecutionSnapshot, HttpBackend};
pub use transport::{build_ws_url, TransportFactory, WsTransport};
pub use ws_client::{ChannelStatus, PushClient, PushClientHandle, PushEventSink, ReconnectPolicy};
