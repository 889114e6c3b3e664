//! Watcher registry for store change notifications.
//!
//! Watchers are identified by a fresh uuid and receive events over their own
//! bounded channel. Fan-out is non-blocking: a watcher that cannot keep up
//! has its event dropped, and watchers whose channel has disconnected are
//! pruned on the next send. A slow watcher therefore never stalls a writer.

use std::collections::HashMap;
use std::sync::RwLock;

use crossbeam_channel::{Sender, TrySendError};
use tracing::debug;
use uuid::Uuid;

/// A set of registered watchers for events of type `T`.
#[derive(Debug)]
pub struct Watchers<T> {
    inner: RwLock<HashMap<Uuid, Sender<T>>>,
}

impl<T: Clone> Default for Watchers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Watchers<T> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a watcher under the given id.
    pub fn add(&self, id: Uuid, tx: Sender<T>) {
        let mut inner = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.insert(id, tx);
    }

    /// Deregisters a watcher. Unknown ids are ignored.
    pub fn remove(&self, id: Uuid) {
        let mut inner = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.remove(&id);
    }

    /// Number of registered watchers.
    #[must_use]
    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.len()
    }

    /// Returns true if no watchers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers an event to every watcher without blocking.
    pub fn send(&self, event: &T) {
        let stale: Vec<Uuid> = {
            let inner = self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner);
            let mut stale = Vec::new();
            for (id, tx) in inner.iter() {
                match tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        debug!(target: "store", watcher = %id, "watcher channel full, dropping event");
                    }
                    Err(TrySendError::Disconnected(_)) => stale.push(*id),
                }
            }
            stale
        };

        if !stale.is_empty() {
            let mut inner = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            for id in stale {
                inner.remove(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn events_fan_out_to_all_watchers() {
        let watchers: Watchers<u32> = Watchers::new();
        let (tx1, rx1) = bounded(4);
        let (tx2, rx2) = bounded(4);
        watchers.add(Uuid::new_v4(), tx1);
        watchers.add(Uuid::new_v4(), tx2);

        watchers.send(&7);
        assert_eq!(rx1.try_recv().unwrap(), 7);
        assert_eq!(rx2.try_recv().unwrap(), 7);
    }

    #[test]
    fn full_watcher_drops_event_without_blocking_others() {
        let watchers: Watchers<u32> = Watchers::new();
        let (slow_tx, slow_rx) = bounded(1);
        let (fast_tx, fast_rx) = bounded(4);
        watchers.add(Uuid::new_v4(), slow_tx);
        watchers.add(Uuid::new_v4(), fast_tx);

        watchers.send(&1);
        watchers.send(&2);

        // The slow watcher only sees the first event; the fast one sees both.
        assert_eq!(slow_rx.try_recv().unwrap(), 1);
        assert!(slow_rx.try_recv().is_err());
        assert_eq!(fast_rx.try_recv().unwrap(), 1);
        assert_eq!(fast_rx.try_recv().unwrap(), 2);
    }

    #[test]
    fn disconnected_watchers_are_pruned() {
        let watchers: Watchers<u32> = Watchers::new();
        let (tx, rx) = bounded(1);
        watchers.add(Uuid::new_v4(), tx);
        assert_eq!(watchers.len(), 1);

        drop(rx);
        watchers.send(&1);
        assert!(watchers.is_empty());
    }

    #[test]
    fn remove_deregisters_a_watcher() {
        let watchers: Watchers<u32> = Watchers::new();
        let id = Uuid::new_v4();
        let (tx, rx) = bounded(1);
        watchers.add(id, tx);
        watchers.remove(id);

        watchers.send(&1);
        assert!(rx.try_recv().is_err());
    }
}
