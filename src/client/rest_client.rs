//! REST client for fetching execution snapshots from the workflow backend.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::execution::{ExecutionStatus, ExecutionUpdate};

/// Latest known state of an execution as reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExecutionSnapshot {
    /// Raw backend status (`running`, `paused`, `completed`, ...).
    pub status: String,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub node_states: HashMap<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub logs: Vec<Value>,
}

impl ExecutionSnapshot {
    /// Decode a response body. A malformed body is an [`Error::Json`].
    pub fn from_body(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }

    /// The status as the local model sees it.
    pub fn local_status(&self) -> ExecutionStatus {
        ExecutionStatus::from_backend(&self.status)
    }

    pub fn into_update(self) -> ExecutionUpdate {
        ExecutionUpdate {
            status: self.local_status(),
            completed_at: self.completed_at,
            nodes: self.node_states,
            logs: self.logs,
        }
    }
}

/// Source of execution snapshots.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Fetch the latest snapshot of a confirmed execution.
    ///
    /// Fails on transport or HTTP errors, including not-found for expired or
    /// placeholder ids.
    async fn get_execution_snapshot(&self, execution_id: &str) -> Result<ExecutionSnapshot>;
}

/// `ExecutionBackend` over HTTP.
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// `base_url` is the API root, e.g. `http://localhost:8000/api`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn execution_url(&self, execution_id: &str) -> String {
        format!("{}/executions/{}", self.base_url, execution_id)
    }
}

#[async_trait]
impl ExecutionBackend for HttpBackend {
    async fn get_execution_snapshot(&self, execution_id: &str) -> Result<ExecutionSnapshot> {
        let url = self.execution_url(execution_id);
        debug!("Fetching execution snapshot: {}", url);

        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::ExecutionNotFound(execution_id.to_string()));
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::Backend {
                status: status.as_u16(),
                message,
            });
        }

        let body = resp.text().await?;
        ExecutionSnapshot::from_body(&body)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accept RFC 3339 timestamps as well as naive ISO timestamps (read as UTC).
fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_execution_url() {
        let backend = HttpBackend::with_client(reqwest::Client::new(), "http://localhost:8000/api/");
        assert_eq!(
            backend.execution_url("exec-1"),
            "http://localhost:8000/api/executions/exec-1"
        );
    }

    #[test]
    fn test_snapshot_full_payload() {
        let snapshot: ExecutionSnapshot = serde_json::from_value(json!({
            "execution_id": "exec-1",
            "status": "completed",
            "completed_at": "2024-01-01T00:00:05Z",
            "node_states": {"n1": {"status": "completed"}},
            "logs": [{"level": "INFO", "message": "done"}]
        }))
        .unwrap();

        assert_eq!(snapshot.local_status(), ExecutionStatus::Completed);
        assert_eq!(
            snapshot.completed_at.map(|d| d.to_rfc3339()),
            Some("2024-01-01T00:00:05+00:00".to_string())
        );
        assert_eq!(snapshot.node_states.len(), 1);
        assert_eq!(snapshot.logs.len(), 1);
    }

    #[test]
    fn test_snapshot_missing_and_null_fields() {
        let snapshot: ExecutionSnapshot = serde_json::from_value(json!({
            "status": "paused",
            "completed_at": null,
            "node_states": null
        }))
        .unwrap();

        let update = snapshot.into_update();
        assert_eq!(update.status, ExecutionStatus::Running);
        assert!(update.completed_at.is_none());
        assert!(update.nodes.is_empty());
        assert!(update.logs.is_empty());
    }

    #[test]
    fn test_malformed_body_is_json_error() {
        let err = ExecutionSnapshot::from_body("<html>502 Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, Error::Json(_)));
        assert_eq!(err.code(), "JSON_ERROR");
        assert!(!err.is_not_found());

        let snapshot = ExecutionSnapshot::from_body(r#"{"status":"running"}"#).unwrap();
        assert_eq!(snapshot.local_status(), ExecutionStatus::Running);
    }

    #[test]
    fn test_naive_timestamp_is_read_as_utc() {
        let parsed = parse_timestamp("2024-03-01T12:30:00.250").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-03-01T12:30:00.250+00:00");
        assert!(parse_timestamp("yesterday").is_none());
    }
}
