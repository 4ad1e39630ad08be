//! Execution tracking model.
//!
//! - `ids`: placeholder vs. confirmed execution identifiers
//! - `types`: tabs, executions and statuses
//! - `reducer`: pure transitions applied to the tab collection
//! - `store`: the shared cell the transitions are applied to

pub mod ids;
pub mod reducer;
pub mod store;
pub mod types;

pub use ids::{is_confirmed, is_placeholder, new_placeholder_id, PLACEHOLDER_PREFIX};
pub use store::TabStore;
pub use types::{Execution, ExecutionStatus, ExecutionUpdate, LogEntry, NodeState, Tab, TabList};
