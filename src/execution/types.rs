//! Tab and execution data model.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque per-node state reported by the workflow engine.
pub type NodeState = Value;

/// Opaque log entry reported by the workflow engine.
pub type LogEntry = Value;

/// The full tab collection. Unchanged tabs are shared between versions.
pub type TabList = Vec<Arc<Tab>>;

/// Local execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    /// Map a status string reported by the backend or the push channel.
    ///
    /// Anything that is not an explicit terminal status (`paused`, `pending`,
    /// unknown values) collapses into `Running`.
    pub fn from_backend(raw: &str) -> Self {
        match raw {
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Running,
        }
    }

    /// Completed and failed runs expect no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown status: {}", s)),
        }
    }
}

/// One run of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub nodes: HashMap<String, NodeState>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

impl Execution {
    /// A freshly started run with no node state or logs yet.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            nodes: HashMap::new(),
            logs: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_running(&self) -> bool {
        self.status == ExecutionStatus::Running
    }
}

/// One open workflow editor session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tab {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub is_unsaved: bool,
    /// Newest first.
    #[serde(default)]
    pub executions: Vec<Arc<Execution>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_execution_id: Option<String>,
}

impl Tab {
    /// An empty tab linked to a persisted workflow.
    pub fn new(id: impl Into<String>, workflow_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            workflow_id,
            is_unsaved: false,
            executions: Vec::new(),
            active_execution_id: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replace the execution list. The active id is left alone.
    pub fn with_executions(mut self, executions: Vec<Execution>) -> Self {
        self.executions = executions.into_iter().map(Arc::new).collect();
        self
    }

    pub fn with_active_execution(mut self, execution_id: impl Into<String>) -> Self {
        self.active_execution_id = Some(execution_id.into());
        self
    }

    pub fn execution(&self, execution_id: &str) -> Option<&Arc<Execution>> {
        self.executions.iter().find(|e| e.id == execution_id)
    }

    pub fn active_execution(&self) -> Option<&Arc<Execution>> {
        self.active_execution_id
            .as_deref()
            .and_then(|id| self.execution(id))
    }

    pub fn has_workflow(&self, workflow_id: &str) -> bool {
        self.workflow_id.as_deref() == Some(workflow_id)
    }
}

/// A normalized execution snapshot fetched from the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionUpdate {
    pub status: ExecutionStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub nodes: HashMap<String, NodeState>,
    pub logs: Vec<LogEntry>,
}
