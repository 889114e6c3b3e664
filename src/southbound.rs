//! Southbound transport contract and subscription request building blocks.
//!
//! The E2-style transport client performs the actual subscribe/unsubscribe
//! RPC and delivers raw indications; the core only assembles requests and
//! consumes the resulting channel. The KPM service-model version is selected
//! once at startup via [`KpmVersion`].

use serde::{Deserialize, Serialize};

use crossbeam_channel::Sender;

use crate::ctx::CancelToken;
use crate::error::{DecodeError, KpmResult};
use crate::indication::Indication;
use crate::model::{CellObjectId, ChannelId, NodeId};

/// KPM service-model version, chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KpmVersion {
    V1,
    V2,
}

impl KpmVersion {
    /// Service model OID advertised by nodes supporting this version.
    #[must_use]
    pub const fn oid(self) -> &'static str {
        match self {
            Self::V1 => "1.3.6.1.4.1.53148.1.1.2.2",
            Self::V2 => "1.3.6.1.4.1.53148.1.2.2.2",
        }
    }

    /// Service model name used in subscription requests.
    #[must_use]
    pub const fn name(self) -> &'static str {
        "oran-e2sm-kpm"
    }

    /// Service model version string.
    #[must_use]
    pub const fn version(self) -> &'static str {
        match self {
            Self::V1 => "v1",
            Self::V2 => "v2",
        }
    }
}

/// Wire encoding of action and event-trigger payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    Json,
}

/// Per-cell specification of what to measure and how often.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub cell_object_id: CellObjectId,
    pub subscription_id: i64,
    pub measurements: Vec<String>,
    pub granularity_ms: u64,
}

impl ActionDefinition {
    /// Encodes the definition into its wire payload.
    pub fn encode(&self) -> KpmResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            DecodeError::Message {
                reason: e.to_string(),
            }
            .into()
        })
    }
}

/// Action type; only report actions are issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    Report,
}

/// Subsequent-action semantics for an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubsequentActionType {
    Continue,
}

/// One action of a subscription request, built per cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub id: i32,
    pub action_type: ActionType,
    pub subsequent_action: SubsequentActionType,
    pub time_to_wait_ms: u64,
    pub encoding: Encoding,
    pub payload: Vec<u8>,
}

/// Event trigger carrying the encoded reporting period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTrigger {
    pub encoding: Encoding,
    pub payload: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EventTriggerData {
    report_period_ms: u64,
}

impl EventTrigger {
    /// Builds an event trigger from the reporting period.
    pub fn from_report_period(report_period_ms: u64) -> KpmResult<Self> {
        let payload = serde_json::to_vec(&EventTriggerData { report_period_ms }).map_err(|e| {
            DecodeError::Message {
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            encoding: Encoding::Json,
            payload,
        })
    }
}

/// Service model name/version pair sent with a subscription request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceModel {
    pub name: String,
    pub version: String,
}

impl From<KpmVersion> for ServiceModel {
    fn from(version: KpmVersion) -> Self {
        Self {
            name: version.name().to_string(),
            version: version.version().to_string(),
        }
    }
}

/// A protocol-level subscription request for one (node, report style).
///
/// Transient: exists only for the duration of the subscribe call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    pub node_id: NodeId,
    pub service_model: ServiceModel,
    pub event_trigger: EventTrigger,
    pub actions: Vec<Action>,
}

/// Handle to an established subscription, used for teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub name: String,
    pub node_id: NodeId,
    pub channel_id: ChannelId,
}

/// Southbound transport client interface.
pub trait E2Client: Send + Sync {
    /// Issues the subscribe RPC; raw indications for the subscription are
    /// delivered on `out` until the subscription is closed.
    fn subscribe(
        &self,
        ctx: &CancelToken,
        request: SubscriptionRequest,
        out: Sender<Indication>,
    ) -> KpmResult<SubscriptionHandle>;

    /// Tears down an established subscription.
    fn unsubscribe(&self, handle: &SubscriptionHandle) -> KpmResult<()>;
}

/// Builds the report action for one cell.
#[must_use]
pub fn build_action(action_id: i32, definition_payload: Vec<u8>) -> Action {
    Action {
        id: action_id,
        action_type: ActionType::Report,
        subsequent_action: SubsequentActionType::Continue,
        time_to_wait_ms: 0,
        encoding: Encoding::Json,
        payload: definition_payload,
    }
}

/// Deterministic subscription name for a (node, style) pair.
#[must_use]
pub fn subscription_name(node_id: &NodeId, style_name: &str) -> String {
    format!("kpmon-{node_id}-{style_name}")
}
