//! Context state store
//!
//! Authoritative mapping from isolation context to lock status. `None` is
//! never stored: it is the absence of an entry. The store has no side
//! effects beyond its map; propagation and guard handling are orchestrated
//! by the coordinator.

use crate::types::{ContextId, LockStatus};
use std::collections::HashMap;

/// Lock status per managed isolation context
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextStateStore {
    statuses: HashMap<ContextId, LockStatus>,
}

impl ContextStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the status of a context, returning the previous status
    ///
    /// Idempotent. Setting `LockStatus::None` deletes the entry.
    pub fn set_status(&mut self, context_id: &str, status: LockStatus) -> LockStatus {
        let previous = if status == LockStatus::None {
            self.statuses.remove(context_id)
        } else {
            self.statuses.insert(context_id.to_string(), status)
        };
        previous.unwrap_or_default()
    }

    /// Get the status of a context (`None` when absent)
    pub fn get_status(&self, context_id: &str) -> LockStatus {
        self.statuses.get(context_id).copied().unwrap_or_default()
    }

    pub fn is_managed(&self, context_id: &str) -> bool {
        self.statuses.contains_key(context_id)
    }

    /// Number of managed contexts
    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    /// Managed context ids, sorted for stable output
    pub fn contexts(&self) -> Vec<ContextId> {
        let mut ids: Vec<ContextId> = self.statuses.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Copy of the full map, used for replica snapshots
    pub fn snapshot(&self) -> HashMap<ContextId, LockStatus> {
        self.statuses.clone()
    }

    /// Replace the full map from a snapshot, dropping `None` entries
    pub fn replace(&mut self, snapshot: HashMap<ContextId, LockStatus>) {
        self.statuses = snapshot
            .into_iter()
            .filter(|(_, status)| status.is_managed())
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_context_is_none() {
        let store = ContextStateStore::new();
        assert_eq!(store.get_status("ctx-1"), LockStatus::None);
        assert!(!store.is_managed("ctx-1"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_set_and_get() {
        let mut store = ContextStateStore::new();
        let prev = store.set_status("ctx-1", LockStatus::Open);
        assert_eq!(prev, LockStatus::None);
        assert_eq!(store.get_status("ctx-1"), LockStatus::Open);

        let prev = store.set_status("ctx-1", LockStatus::Closing);
        assert_eq!(prev, LockStatus::Open);
        assert_eq!(store.get_status("ctx-1"), LockStatus::Closing);
    }

    #[test]
    fn test_set_none_deletes_entry() {
        let mut store = ContextStateStore::new();
        store.set_status("ctx-1", LockStatus::Open);
        store.set_status("ctx-1", LockStatus::None);
        assert!(!store.is_managed("ctx-1"));
        assert_eq!(store.len(), 0);

        // Deleting an absent entry is harmless
        assert_eq!(store.set_status("ctx-1", LockStatus::None), LockStatus::None);
    }

    #[test]
    fn test_set_closed_twice_is_idempotent() {
        let mut once = ContextStateStore::new();
        once.set_status("ctx-1", LockStatus::Closed);

        let mut twice = ContextStateStore::new();
        twice.set_status("ctx-1", LockStatus::Closed);
        twice.set_status("ctx-1", LockStatus::Closed);

        assert_eq!(once, twice);
        assert_eq!(twice.get_status("ctx-1"), LockStatus::Closed);
    }

    #[test]
    fn test_contexts_sorted() {
        let mut store = ContextStateStore::new();
        store.set_status("ctx-b", LockStatus::Open);
        store.set_status("ctx-a", LockStatus::Closed);
        assert_eq!(store.contexts(), vec!["ctx-a", "ctx-b"]);
    }

    #[test]
    fn test_replace_drops_none_entries() {
        let mut snapshot = HashMap::new();
        snapshot.insert("ctx-1".to_string(), LockStatus::Open);
        snapshot.insert("ctx-2".to_string(), LockStatus::None);

        let mut store = ContextStateStore::new();
        store.set_status("stale", LockStatus::Closed);
        store.replace(snapshot);

        assert_eq!(store.contexts(), vec!["ctx-1"]);
    }
}
