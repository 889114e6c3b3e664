//! # kpmon - KPM telemetry core for a RAN controller
//!
//! kpmon drives the full lifecycle of KPM (Key Performance Measurement)
//! subscriptions against E2 nodes and turns the resulting indication stream
//! into a queryable measurement store.
//!
//! ## Core Concepts
//!
//! - **StreamBroker**: per-subscription buffered streams decoupling the
//!   transport from indication processing
//! - **ActionStore**: correlation from subscription ids to the cell and
//!   measurement set an action was built for
//! - **MeasurementStore**: latest decoded measurements per (node, cell),
//!   with snapshot and watch access
//! - **Monitor**: per-subscription decode loop deriving record timestamps
//!   from the collection start time and granularity
//! - **SubscriptionManager**: watches topology and configuration, creating
//!   and tearing down subscriptions with jittered retry
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kpmon::{
//!     CancelToken, InMemoryConfig, JsonDecoder, ManagerOptions, StreamBroker,
//!     SubscriptionManager,
//! };
//! use kpmon::store::{actions::ActionStore, measurements::MeasurementStore};
//!
//! let manager = Arc::new(SubscriptionManager::new(
//!     ManagerOptions::default(),
//!     e2_client,
//!     topo_client,
//!     Arc::new(InMemoryConfig::new(5000, 1000)),
//!     Arc::new(StreamBroker::new()),
//!     Arc::new(ActionStore::new()),
//!     Arc::new(MeasurementStore::new()),
//!     Arc::new(JsonDecoder),
//! ));
//! manager.start(&CancelToken::background())?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod backoff;
pub mod broker;
pub mod config;
pub mod ctx;
pub mod error;
pub mod indication;
pub mod manager;
pub mod model;
pub mod monitor;
pub mod southbound;
pub mod store;
pub mod topo;

// Re-export primary types at crate root for convenience
pub use backoff::{retry_notify, ExpBackoff};
pub use broker::{StreamBroker, StreamId, StreamInfo, StreamReader, StreamWriter};
pub use config::{AppConfig, ConfigEvent, InMemoryConfig};
pub use ctx::{cancel_pair, CancelHandle, CancelToken};
pub use error::{
    ConfigError, DecodeError, KpmError, KpmResult, StoreError, StreamError, TransportError,
};
pub use indication::{Indication, IndicationDecoder, IndicationHeader, IndicationMessage, JsonDecoder};
pub use manager::{ManagerOptions, SubscriptionManager};
pub use model::{
    CellIdentity, CellIndex, CellObjectId, ChannelId, E2Cell, KpmMeasurement, MeasValue,
    MeasurementCatalog, MeasurementItem, MeasurementRecord, NodeId, ReportStyle, ServiceModelInfo,
};
pub use monitor::Monitor;
pub use southbound::{E2Client, KpmVersion, SubscriptionHandle, SubscriptionRequest};
pub use store::actions::{ActionEntry, ActionStore, SubscriptionId};
pub use store::measurements::{
    EventType, MeasurementEntry, MeasurementEvent, MeasurementKey, MeasurementStore,
};
pub use topo::{TopoClient, TopoEvent, TopoEventKind};
