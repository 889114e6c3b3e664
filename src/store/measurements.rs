//! Measurement store.
//!
//! Holds the latest decoded measurement snapshot per (node, cell) key.
//! Writes are last-write-wins with no history retention; every upsert is
//! fanned out to the registered watchers so a northbound surface can stream
//! live changes.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::thread;

use crossbeam_channel::Sender;
use tracing::debug;
use uuid::Uuid;

use crate::ctx::CancelToken;
use crate::error::{KpmResult, StoreError};
use crate::model::{CellIdentity, MeasurementItem, NodeId};
use crate::store::watchers::Watchers;

/// Measurement store key: one entry per (node, cell).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MeasurementKey {
    pub node_id: NodeId,
    pub cell_id: CellIdentity,
}

impl MeasurementKey {
    /// Creates a new measurement key.
    #[must_use]
    pub fn new(node_id: NodeId, cell_id: CellIdentity) -> Self {
        Self { node_id, cell_id }
    }
}

impl fmt::Display for MeasurementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node_id, self.cell_id)
    }
}

/// A stored measurement snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementEntry {
    pub key: MeasurementKey,
    pub items: Vec<MeasurementItem>,
}

/// Kind of store change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Created,
    Updated,
    Deleted,
}

/// A store change event delivered to watchers.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementEvent {
    pub kind: EventType,
    pub entry: MeasurementEntry,
}

/// In-memory measurement store with change notification.
#[derive(Debug, Default)]
pub struct MeasurementStore {
    measurements: RwLock<HashMap<MeasurementKey, MeasurementEntry>>,
    watchers: Arc<Watchers<MeasurementEvent>>,
}

impl MeasurementStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts the snapshot for a key, replacing any previous one, and
    /// publishes a Created/Updated event to all watchers.
    pub fn put(&self, key: MeasurementKey, items: Vec<MeasurementItem>) -> MeasurementEntry {
        let entry = MeasurementEntry {
            key: key.clone(),
            items,
        };
        let kind = {
            let mut map = self.measurements.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            match map.insert(key, entry.clone()) {
                Some(_) => EventType::Updated,
                None => EventType::Created,
            }
        };
        self.watchers.send(&MeasurementEvent {
            kind,
            entry: entry.clone(),
        });
        entry
    }

    /// Point lookup for a key.
    pub fn get(&self, key: &MeasurementKey) -> KpmResult<MeasurementEntry> {
        let map = self.measurements.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        map.get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { key: key.to_string() }.into())
    }

    /// Removes the snapshot for a key, if present, and publishes a Deleted
    /// event. Used when a cell or node leaves topology so stale snapshots
    /// are not served.
    pub fn delete(&self, key: &MeasurementKey) -> KpmResult<()> {
        let removed = {
            let mut map = self.measurements.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            map.remove(key)
        };
        if let Some(entry) = removed {
            self.watchers.send(&MeasurementEvent {
                kind: EventType::Deleted,
                entry,
            });
        }
        Ok(())
    }

    /// Removes every snapshot stored for a node. Returns the number of
    /// entries removed.
    pub fn delete_for_node(&self, node_id: &NodeId) -> usize {
        let removed: Vec<MeasurementEntry> = {
            let mut map = self.measurements.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            let keys: Vec<MeasurementKey> = map
                .keys()
                .filter(|k| &k.node_id == node_id)
                .cloned()
                .collect();
            keys.into_iter().filter_map(|k| map.remove(&k)).collect()
        };
        let count = removed.len();
        for entry in removed {
            self.watchers.send(&MeasurementEvent {
                kind: EventType::Deleted,
                entry,
            });
        }
        count
    }

    /// Streams a snapshot of all current entries to `out`, then closes it by
    /// dropping the sender. Returns a `NoEntries` error if the store is
    /// empty.
    pub fn entries(&self, out: Sender<MeasurementEntry>) -> KpmResult<()> {
        let snapshot: Vec<MeasurementEntry> = {
            let map = self.measurements.read().unwrap_or_else(std::sync::PoisonError::into_inner);
            map.values().cloned().collect()
        };
        if snapshot.is_empty() {
            drop(out);
            return Err(StoreError::NoEntries.into());
        }
        for entry in snapshot {
            if out.send(entry).is_err() {
                break;
            }
        }
        Ok(())
    }

    /// Registers `out` as a watcher of store changes.
    ///
    /// The watcher sees every event published after registration (no replay
    /// of history) and is deregistered, closing its channel, when `ctx` is
    /// canceled.
    pub fn watch(&self, ctx: CancelToken, out: Sender<MeasurementEvent>) -> KpmResult<()> {
        let id = Uuid::new_v4();
        self.watchers.add(id, out);

        let watchers = Arc::clone(&self.watchers);
        let _ = thread::Builder::new()
            .name(format!("kpmon-watch-{id}"))
            .spawn(move || {
                // Blocks until the token is canceled, then deregisters.
                // Dropping the registry's sender closes the watcher channel.
                let _ = ctx.done().recv();
                watchers.remove(id);
                debug!(target: "store", watcher = %id, "watcher deregistered");
            });
        Ok(())
    }

    /// Number of stored snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        let map = self.measurements.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        map.len()
    }

    /// Returns true if the store holds no snapshots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
