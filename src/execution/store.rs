//! Shared cell holding the current tab collection.
//!
//! The store is the only shared state in the engine. Producers never mutate
//! tabs in place: they hand a pure function to [`TabStore::update`], which runs
//! it against the latest collection and publishes the result. Updates are
//! serialized by the underlying `watch` channel.

use std::sync::Arc;

use tokio::sync::watch;

use super::types::{Tab, TabList};

/// Live, cloneable handle to the tab collection.
#[derive(Clone)]
pub struct TabStore {
    tx: Arc<watch::Sender<TabList>>,
}

impl TabStore {
    pub fn new(tabs: Vec<Tab>) -> Self {
        Self::from_list(tabs.into_iter().map(Arc::new).collect())
    }

    pub fn from_list(tabs: TabList) -> Self {
        let (tx, _rx) = watch::channel(tabs);
        Self { tx: Arc::new(tx) }
    }

    /// Current tabs. Cheap: clones `Arc`s only.
    pub fn snapshot(&self) -> TabList {
        self.tx.borrow().clone()
    }

    /// Run `f` against the latest tabs and publish its result.
    ///
    /// Subscribers are only woken when at least one tab was replaced.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&[Arc<Tab>]) -> TabList,
    {
        self.tx.send_if_modified(|current| {
            let next = f(current);
            let changed = next.len() != current.len()
                || next.iter().zip(current.iter()).any(|(a, b)| !Arc::ptr_eq(a, b));
            if changed {
                *current = next;
            }
            changed
        });
    }

    /// Replace the whole collection.
    pub fn set(&self, tabs: TabList) {
        self.tx.send_replace(tabs);
    }

    /// Receiver that is notified whenever the tabs change.
    pub fn subscribe(&self) -> watch::Receiver<TabList> {
        self.tx.subscribe()
    }
}

impl Default for TabStore {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl std::fmt::Debug for TabStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TabStore")
            .field("tabs", &self.tx.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::reducer;
    use crate::execution::types::Execution;

    fn store() -> TabStore {
        TabStore::new(vec![
            Tab::new("tab-1", Some("wf-1".into())).with_executions(vec![Execution::new("exec-1")])
        ])
    }

    #[test]
    fn test_update_publishes_new_tabs() {
        let store = store();

        store.update(|tabs| reducer::handle_execution_start(tabs, "tab-1", "exec-2"));

        let tabs = store.snapshot();
        assert_eq!(tabs[0].executions.len(), 2);
        assert_eq!(tabs[0].active_execution_id.as_deref(), Some("exec-2"));
    }

    #[tokio::test]
    async fn test_noop_update_does_not_notify() {
        let store = store();
        let mut rx = store.subscribe();
        rx.borrow_and_update();

        store.update(|tabs| reducer::handle_clear_executions(tabs, "wf-unknown"));
        assert!(!rx.has_changed().unwrap());

        store.update(|tabs| reducer::handle_clear_executions(tabs, "wf-1"));
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update()[0].executions.is_empty());
    }

    #[test]
    fn test_clones_share_state() {
        let store = store();
        let other = store.clone();

        other.set(Vec::new());

        assert!(store.snapshot().is_empty());
    }
}
