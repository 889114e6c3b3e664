//! Action definition (correlation) store.
//!
//! Records, per caller-assigned subscription id, the action definition a
//! subscription was built with. Indications that omit an explicit cell
//! reference are resolved back to a cell through this table. An entry must
//! exist before the corresponding subscribe call is issued, because
//! indications for the id may arrive before the call returns.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use crate::error::{KpmResult, StoreError};
use crate::model::{CellObjectId, NodeId};

/// Caller-assigned subscription id, unique for the lifetime of one
/// subscription attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub i64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The action definition recorded for one subscription id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionEntry {
    pub node_id: NodeId,
    pub cell_object_id: CellObjectId,
    pub measurements: Vec<String>,
    pub granularity_ms: u64,
}

/// In-memory correlation store. Entries are created, never mutated.
#[derive(Debug, Default)]
pub struct ActionStore {
    actions: RwLock<HashMap<SubscriptionId, ActionEntry>>,
}

impl ActionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the action definition for a subscription id.
    pub fn put(&self, id: SubscriptionId, entry: ActionEntry) -> ActionEntry {
        let mut actions = self.actions.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        actions.insert(id, entry.clone());
        entry
    }

    /// Looks up the action definition for a subscription id.
    pub fn get(&self, id: SubscriptionId) -> KpmResult<ActionEntry> {
        let actions = self.actions.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        actions
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { key: id.to_string() }.into())
    }

    /// Removes every entry recorded for a node. Called on node teardown so
    /// stale correlation state does not accumulate across re-subscriptions.
    pub fn delete_for_node(&self, node_id: &NodeId) -> usize {
        let mut actions = self.actions.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = actions.len();
        actions.retain(|_, entry| &entry.node_id != node_id);
        before - actions.len()
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let actions = self.actions.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        actions.len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
