//! Real-time transport used by the push-channel client.
//!
//! [`TransportFactory`] and [`Connection`] are the seam between the reconnect
//! state machine and the socket; [`WsTransport`] is the `tokio-tungstenite`
//! implementation.

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Normal closure.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close frame carried no status code.
pub const NO_STATUS_RECEIVED: u16 = 1005;
/// Connection dropped without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

const DEFAULT_CLOSE_REASON: &str = "No reason provided";

/// How a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
    pub was_clean: bool,
}

impl CloseInfo {
    pub fn new(code: u16, reason: impl Into<String>, was_clean: bool) -> Self {
        Self {
            code,
            reason: reason.into(),
            was_clean,
        }
    }

    /// Dropped connection, no close handshake.
    pub fn abnormal() -> Self {
        Self::new(ABNORMAL_CLOSURE, "", false)
    }

    /// Clean close with the normal-closure code: the peer meant to stop.
    pub fn is_intentional(&self) -> bool {
        self.was_clean && self.code == NORMAL_CLOSURE
    }

    pub fn reason_or_default(&self) -> &str {
        if self.reason.is_empty() {
            DEFAULT_CLOSE_REASON
        } else {
            &self.reason
        }
    }
}

/// Transport failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection could not be created at all (bad URL, bad request).
    #[error("{0}")]
    Construction(String),
    /// The connection was created but failed (refused, handshake, I/O).
    #[error("{0}")]
    Connection(String),
}

impl TransportError {
    /// The failure's own message, if it carries a non-empty one.
    pub fn message(&self) -> Option<&str> {
        match self {
            TransportError::Construction(m) | TransportError::Connection(m) if !m.is_empty() => {
                Some(m.as_str())
            }
            _ => None,
        }
    }

    pub fn is_construction(&self) -> bool {
        matches!(self, TransportError::Construction(_))
    }
}

impl From<TransportError> for crate::error::Error {
    fn from(err: TransportError) -> Self {
        crate::error::Error::Transport(err.to_string())
    }
}

/// Something that happened on an open connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A text frame.
    Message(String),
    /// A transport-level error. A `Closed` event follows.
    Error(TransportError),
    /// The connection ended.
    Closed(CloseInfo),
}

/// Opens connections.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError>;
}

/// One open duplex connection.
#[async_trait]
pub trait Connection: Send {
    /// Wait for the next event. After `Closed` the connection is finished.
    async fn next_event(&mut self) -> TransportEvent;

    /// Close with the given code and reason.
    async fn close(&mut self, code: u16, reason: &str);
}

/// Build the push-channel URL for an execution.
///
/// `origin` is the origin the front end was served from. An `https` origin
/// yields `wss`, anything else `ws`.
pub fn build_ws_url(origin: &str, execution_id: &str) -> String {
    let ws_base = if let Some(rest) = origin.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = origin.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if origin.starts_with("wss://") || origin.starts_with("ws://") {
        origin.to_string()
    } else {
        format!("ws://{}", origin)
    };

    format!(
        "{}/ws/executions/{}",
        ws_base.trim_end_matches('/'),
        execution_id
    )
}

/// `TransportFactory` over `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct WsTransport;

#[async_trait]
impl TransportFactory for WsTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError> {
        match tokio_tungstenite::connect_async(url).await {
            Ok((stream, _response)) => Ok(Box::new(WsConnection {
                stream,
                finished: false,
            })),
            Err(e) => Err(classify_connect_error(e)),
        }
    }
}

fn classify_connect_error(err: WsError) -> TransportError {
    match err {
        WsError::Url(e) => TransportError::Construction(e.to_string()),
        WsError::HttpFormat(e) => TransportError::Construction(e.to_string()),
        other => TransportError::Connection(other.to_string()),
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    finished: bool,
}

#[async_trait]
impl Connection for WsConnection {
    async fn next_event(&mut self) -> TransportEvent {
        if self.finished {
            return TransportEvent::Closed(CloseInfo::abnormal());
        }
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return TransportEvent::Message(text),
                Some(Ok(Message::Close(frame))) => {
                    self.finished = true;
                    let info = match frame {
                        Some(f) => CloseInfo::new(u16::from(f.code), f.reason.to_string(), true),
                        None => CloseInfo::new(NO_STATUS_RECEIVED, "", true),
                    };
                    return TransportEvent::Closed(info);
                }
                // Ping/pong are answered by tungstenite; binary frames are not part of the protocol.
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.finished = true;
                    return TransportEvent::Error(TransportError::Connection(e.to_string()));
                }
                None => {
                    self.finished = true;
                    return TransportEvent::Closed(CloseInfo::abnormal());
                }
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        if let Err(e) = self.stream.close(Some(frame)).await {
            debug!("WebSocket close handshake failed: {}", e);
        }
        self.finished = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_ws_url_http() {
        assert_eq!(
            build_ws_url("http://localhost:5173", "exec-1"),
            "ws://localhost:5173/ws/executions/exec-1"
        );
    }

    #[test]
    fn test_build_ws_url_https() {
        assert_eq!(
            build_ws_url("https://flows.example.com", "exec-1"),
            "wss://flows.example.com/ws/executions/exec-1"
        );
    }

    #[test]
    fn test_build_ws_url_trailing_slash() {
        assert_eq!(
            build_ws_url("http://localhost:8000/", "abc"),
            "ws://localhost:8000/ws/executions/abc"
        );
    }

    #[test]
    fn test_build_ws_url_no_protocol() {
        assert_eq!(
            build_ws_url("localhost:8000", "abc"),
            "ws://localhost:8000/ws/executions/abc"
        );
    }

    #[test]
    fn test_build_ws_url_already_ws() {
        assert_eq!(
            build_ws_url("wss://host", "abc"),
            "wss://host/ws/executions/abc"
        );
    }

    #[test]
    fn test_close_info_intentional() {
        assert!(CloseInfo::new(1000, "", true).is_intentional());
        assert!(!CloseInfo::new(1000, "", false).is_intentional());
        assert!(!CloseInfo::new(1001, "", true).is_intentional());
        assert!(!CloseInfo::abnormal().is_intentional());
    }

    #[test]
    fn test_close_reason_default() {
        assert_eq!(CloseInfo::abnormal().reason_or_default(), "No reason provided");
        assert_eq!(CloseInfo::new(1000, "bye", true).reason_or_default(), "bye");
    }

    #[test]
    fn test_transport_error_message() {
        assert_eq!(
            TransportError::Connection("refused".into()).message(),
            Some("refused")
        );
        assert_eq!(TransportError::Construction(String::new()).message(), None);
        assert_eq!(TransportError::Connection(String::new()).message(), None);
        assert!(TransportError::Construction("bad url".into()).is_construction());
    }

    #[test]
    fn test_transport_error_converts() {
        let err: crate::error::Error = TransportError::Connection("refused".into()).into();
        assert_eq!(err.code(), "TRANSPORT_ERROR");
        assert_eq!(err.to_string(), "Transport error: refused");
    }

    #[tokio::test]
    async fn test_invalid_url_is_construction_failure() {
        let result = WsTransport.connect("not a url").await;
        assert!(matches!(result, Err(TransportError::Construction(_))));
    }
}
