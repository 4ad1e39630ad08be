//! Error types for flowsync.
//!
//! Errors carry a stable code so hosts can branch on them without matching
//! on message text.

use thiserror::Error;

/// Result type alias for flowsync operations.
pub type Result<T> = std::result::Result<T, Error>;

/// flowsync error types.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("Backend returned HTTP {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Error::ExecutionNotFound(_) => "EXECUTION_NOT_FOUND",
            Error::Backend { .. } => "BACKEND_ERROR",
            Error::Transport(_) => "TRANSPORT_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Http(_) => "HTTP_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }

    /// True when the backend reported that the execution does not exist.
    ///
    /// Expired executions and placeholder ids both end up here.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ExecutionNotFound(_) => true,
            Error::Backend { status, .. } => *status == 404,
            Error::Http(e) => e.status().map(|s| s.as_u16() == 404).unwrap_or(false),
            _ => false,
        }
    }
}
