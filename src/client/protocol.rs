//! Inbound push-channel messages.
//!
//! Every frame is a JSON object whose `type` field selects the variant.
//! Unknown types decode to [`PushMessage::Unknown`] and are ignored.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    /// A log entry to append.
    Log {
        #[serde(default)]
        log: Option<Value>,
    },
    /// Execution status change (raw backend status).
    Status {
        #[serde(default)]
        status: Option<String>,
    },
    /// One node's state changed.
    NodeUpdate {
        #[serde(default)]
        node_id: Option<String>,
        #[serde(default)]
        node_state: Option<Value>,
    },
    /// The run finished; `result` is forwarded untouched.
    Completion {
        #[serde(default)]
        result: Value,
    },
    /// The engine reported an error.
    Error {
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl PushMessage {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Resolve the node id of a `node_update`.
    ///
    /// The envelope's `node_id` wins; otherwise `node_state.node_id` is used.
    /// Returns `None` when neither is present or there is no state.
    pub fn node_update(&self) -> Option<(String, Value)> {
        let PushMessage::NodeUpdate {
            node_id,
            node_state,
        } = self
        else {
            return None;
        };
        let state = node_state.as_ref()?;
        let id = node_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .or_else(|| {
                state
                    .get("node_id")
                    .and_then(Value::as_str)
                    .filter(|id| !id.is_empty())
            })?;
        Some((id.to_string(), state.clone()))
    }
}
