//! flowsync - execution lifecycle synchronization engine
//!
//! flowsync keeps a local view of long-running workflow executions
//! consistent while updates arrive over two unreliable channels:
//!
//! - **Push**: one WebSocket per running execution, reconnecting with
//!   exponential backoff
//! - **Poll**: a periodic REST fallback that reconciles every running,
//!   confirmed execution
//!
//! Runs may be started optimistically under a placeholder id
//! (`pending-...`) that is resolved once the backend assigns the real one.
//! Every event, whatever its source, is folded into the tab model by the
//! pure functions in [`execution::reducer`].
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use flowsync::client::{HttpBackend, WsTransport};
//! use flowsync::execution::{Tab, TabStore};
//! use flowsync::sync::{SyncConfig, SyncEngine};
//!
//! # async fn run() -> flowsync::Result<()> {
//! let store = TabStore::new(vec![Tab::new("tab-1", Some("wf-1".into()))]);
//! let backend = HttpBackend::new("http://localhost:8000/api", Duration::from_secs(30))?;
//! let mut engine = SyncEngine::new(
//!     store.clone(),
//!     Arc::new(backend),
//!     Arc::new(WsTransport),
//!     SyncConfig::default(),
//! );
//!
//! engine.start();
//! engine.handle_execution_start(Some("tab-1"), "pending-1");
//! engine.handle_execution_start(Some("tab-1"), "exec-42");
//! // ...
//! engine.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod execution;
pub mod poller;
pub mod shutdown;
pub mod sync;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
pub use sync::SyncEngine;
