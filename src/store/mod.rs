//! In-memory keyed stores.
//!
//! All stores are rebuilt from topology and configuration on restart; nothing
//! here is persisted. Each store is a single map behind a reader/writer lock;
//! contention is low (one write path per subscription) and operations are
//! O(1) map access.

pub mod actions;
pub mod measurements;
pub mod watchers;

pub use actions::{ActionEntry, ActionStore, SubscriptionId};
pub use measurements::{
    EventType, MeasurementEntry, MeasurementEvent, MeasurementKey, MeasurementStore,
};
pub use watchers::Watchers;
