//! Pure state transitions over the tab collection.
//!
//! Every function takes the current tabs plus one event and returns the next
//! tabs. Nothing is mutated in place: tabs and executions an event does not
//! touch are carried over as the same `Arc`, so callers can detect changes
//! with `Arc::ptr_eq`. A miss (unknown tab, workflow or execution) returns the
//! input unchanged rather than failing.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use super::ids::{is_confirmed, is_placeholder};
use super::types::{Execution, ExecutionStatus, ExecutionUpdate, LogEntry, NodeState, Tab, TabList};

/// Record a run started in the active tab.
///
/// An id the tab already holds is only re-activated, before any placeholder
/// resolution is tried, so confirmed ids stay unique within a tab. A new
/// confirmed id resolves the oldest outstanding placeholder (the last one in
/// the newest-first list) so runs keep their creation order even when the
/// backend confirms them out of order. Anything else is prepended as a new
/// running execution.
pub fn handle_execution_start(tabs: &[Arc<Tab>], active_tab_id: &str, new_id: &str) -> TabList {
    tabs.iter()
        .map(|tab| {
            if tab.id == active_tab_id {
                Arc::new(start_in_tab(tab, new_id))
            } else {
                Arc::clone(tab)
            }
        })
        .collect()
}

fn start_in_tab(tab: &Tab, new_id: &str) -> Tab {
    let mut next = tab.clone();
    next.active_execution_id = Some(new_id.to_string());

    // A confirmed id already present is a re-activation; resolving a
    // placeholder to it would leave two executions with the same id.
    if tab.execution(new_id).is_some() {
        return next;
    }

    if is_confirmed(new_id) {
        if let Some(idx) = tab.executions.iter().rposition(|e| is_placeholder(&e.id)) {
            let mut resolved = (*tab.executions[idx]).clone();
            resolved.id = new_id.to_string();
            next.executions[idx] = Arc::new(resolved);
            return next;
        }
    }

    let mut executions = Vec::with_capacity(tab.executions.len() + 1);
    executions.push(Arc::new(Execution::new(new_id)));
    executions.extend(tab.executions.iter().cloned());
    next.executions = executions;
    next
}

/// Drop every execution of the workflow's tab.
pub fn handle_clear_executions(tabs: &[Arc<Tab>], workflow_id: &str) -> TabList {
    tabs.iter()
        .map(|tab| {
            if !tab.has_workflow(workflow_id)
                || (tab.executions.is_empty() && tab.active_execution_id.is_none())
            {
                return Arc::clone(tab);
            }
            let mut next = (**tab).clone();
            next.executions.clear();
            next.active_execution_id = None;
            Arc::new(next)
        })
        .collect()
}

/// Remove one execution.
///
/// Removing the active execution activates the new first execution, or nothing
/// when the list is now empty. Removing any other execution leaves the active
/// id as it was.
pub fn handle_remove_execution(tabs: &[Arc<Tab>], workflow_id: &str, execution_id: &str) -> TabList {
    tabs.iter()
        .map(|tab| {
            if !tab.has_workflow(workflow_id) || tab.execution(execution_id).is_none() {
                return Arc::clone(tab);
            }
            let mut next = (**tab).clone();
            next.executions.retain(|e| e.id != execution_id);
            if tab.active_execution_id.as_deref() == Some(execution_id) {
                next.active_execution_id = next.executions.first().map(|e| e.id.clone());
            }
            Arc::new(next)
        })
        .collect()
}

/// Append one log entry.
pub fn handle_execution_log_update(
    tabs: &[Arc<Tab>],
    workflow_id: &str,
    execution_id: &str,
    entry: LogEntry,
) -> TabList {
    update_execution(tabs, workflow_id, execution_id, |exec| {
        let mut next = exec.clone();
        next.logs.push(entry.clone());
        next
    })
}

/// Set the status.
///
/// `completed_at` is stamped the first time the execution reaches a terminal
/// status and is never cleared or moved afterwards, even if a stale update
/// reports `Running` again.
pub fn handle_execution_status_update(
    tabs: &[Arc<Tab>],
    workflow_id: &str,
    execution_id: &str,
    status: ExecutionStatus,
) -> TabList {
    update_execution(tabs, workflow_id, execution_id, |exec| {
        let mut next = exec.clone();
        next.status = status;
        if status.is_terminal() && next.completed_at.is_none() {
            next.completed_at = Some(Utc::now());
        }
        next
    })
}

/// Merge one node's state into the execution.
pub fn handle_execution_node_update(
    tabs: &[Arc<Tab>],
    workflow_id: &str,
    execution_id: &str,
    node_id: &str,
    node_state: NodeState,
) -> TabList {
    update_execution(tabs, workflow_id, execution_id, |exec| {
        let mut next = exec.clone();
        next.nodes.insert(node_id.to_string(), node_state.clone());
        next
    })
}

/// Apply a batch of backend snapshots keyed by execution id, across all tabs.
///
/// Node states are merged key by key. The snapshot's logs replace the local
/// ones only when they are at least as long, so logs never shrink.
pub fn handle_execution_snapshots(
    tabs: &[Arc<Tab>],
    updates: &HashMap<String, ExecutionUpdate>,
) -> TabList {
    if updates.is_empty() {
        return tabs.to_vec();
    }
    tabs.iter()
        .map(|tab| {
            if !tab.executions.iter().any(|e| updates.contains_key(&e.id)) {
                return Arc::clone(tab);
            }
            let mut next = (**tab).clone();
            next.executions = tab
                .executions
                .iter()
                .map(|exec| match updates.get(&exec.id) {
                    Some(update) => Arc::new(apply_snapshot(exec, update)),
                    None => Arc::clone(exec),
                })
                .collect();
            Arc::new(next)
        })
        .collect()
}

fn apply_snapshot(exec: &Execution, update: &ExecutionUpdate) -> Execution {
    let mut next = exec.clone();
    next.status = update.status;
    next.completed_at = exec
        .completed_at
        .or(update.completed_at)
        .or_else(|| update.status.is_terminal().then(Utc::now));
    for (node_id, state) in &update.nodes {
        next.nodes.insert(node_id.clone(), state.clone());
    }
    if update.logs.len() >= exec.logs.len() {
        next.logs = update.logs.clone();
    }
    next
}

/// First tab linked to `workflow_id`.
pub fn find_tab_by_workflow_id<'a>(tabs: &'a [Arc<Tab>], workflow_id: &str) -> Option<&'a Arc<Tab>> {
    tabs.iter().find(|t| t.has_workflow(workflow_id))
}

fn update_execution<F>(tabs: &[Arc<Tab>], workflow_id: &str, execution_id: &str, f: F) -> TabList
where
    F: Fn(&Execution) -> Execution,
{
    tabs.iter()
        .map(|tab| {
            if !tab.has_workflow(workflow_id) || tab.execution(execution_id).is_none() {
                return Arc::clone(tab);
            }
            let mut next = (**tab).clone();
            next.executions = tab
                .executions
                .iter()
                .map(|exec| {
                    if exec.id == execution_id {
                        Arc::new(f(exec))
                    } else {
                        Arc::clone(exec)
                    }
                })
                .collect();
            Arc::new(next)
        })
        .collect()
}
