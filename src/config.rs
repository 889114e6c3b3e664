//! Application configuration client.
//!
//! The core consults, never owns, the xApp configuration: the current report
//! period and granularity period, plus a change-notification feed. A change
//! to the report-period key makes the subscription manager tear down and
//! rebuild every subscription.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::thread;

use crossbeam_channel::Sender;
use uuid::Uuid;

use crate::ctx::CancelToken;
use crate::error::{ConfigError, KpmResult};
use crate::store::watchers::Watchers;

/// Configuration path of the report period (ms between indications).
pub const REPORT_PERIOD_KEY: &str = "/report_period/interval";

/// Configuration path of the granularity period (ms between data items
/// within one report).
pub const GRANULARITY_PERIOD_KEY: &str = "/report_period/granularity";

/// A configuration-key-changed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEvent {
    pub key: String,
    pub value: u64,
}

/// xApp configuration interface.
pub trait AppConfig: Send + Sync {
    /// Current report period in milliseconds.
    fn report_period(&self) -> KpmResult<u64>;

    /// Current granularity period in milliseconds.
    fn granularity_period(&self) -> KpmResult<u64>;

    /// Registers `out` for key-changed events until `ctx` is canceled.
    fn watch(&self, ctx: CancelToken, out: Sender<ConfigEvent>) -> KpmResult<()>;
}

/// In-memory configuration, used in tests and embedded deployments.
#[derive(Debug, Default)]
pub struct InMemoryConfig {
    values: RwLock<HashMap<String, u64>>,
    watchers: Arc<Watchers<ConfigEvent>>,
}

impl InMemoryConfig {
    /// Creates a configuration with the given periods (milliseconds).
    #[must_use]
    pub fn new(report_period_ms: u64, granularity_ms: u64) -> Self {
        let mut values = HashMap::new();
        values.insert(REPORT_PERIOD_KEY.to_string(), report_period_ms);
        values.insert(GRANULARITY_PERIOD_KEY.to_string(), granularity_ms);
        Self {
            values: RwLock::new(values),
            watchers: Arc::new(Watchers::new()),
        }
    }

    /// Sets a key and notifies watchers of the change.
    pub fn set(&self, key: &str, value: u64) {
        {
            let mut values = self.values.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            values.insert(key.to_string(), value);
        }
        self.watchers.send(&ConfigEvent {
            key: key.to_string(),
            value,
        });
    }

    fn get(&self, key: &str) -> KpmResult<u64> {
        let values = self.values.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        values.get(key).copied().ok_or_else(|| {
            ConfigError::MissingKey {
                key: key.to_string(),
            }
            .into()
        })
    }
}

impl AppConfig for InMemoryConfig {
    fn report_period(&self) -> KpmResult<u64> {
        self.get(REPORT_PERIOD_KEY)
    }

    fn granularity_period(&self) -> KpmResult<u64> {
        self.get(GRANULARITY_PERIOD_KEY)
    }

    fn watch(&self, ctx: CancelToken, out: Sender<ConfigEvent>) -> KpmResult<()> {
        let id = Uuid::new_v4();
        self.watchers.add(id, out);

        let watchers = Arc::clone(&self.watchers);
        let _ = thread::Builder::new()
            .name(format!("kpmon-config-watch-{id}"))
            .spawn(move || {
                let _ = ctx.done().recv();
                watchers.remove(id);
            });
        Ok(())
    }
}
