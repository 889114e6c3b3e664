//! Topology (R-NIB) collaborator contract.
//!
//! The topology service owns the inventory: which nodes are connected, which
//! service models they advertise, and which cells they contain. The core
//! reads this inventory, watches connection changes, and pushes decoded
//! measurements back as best-effort cell aspect updates.

use crossbeam_channel::Sender;

use crate::ctx::CancelToken;
use crate::error::KpmResult;
use crate::model::{CellIdentity, E2Cell, MeasurementItem, NodeId, ServiceModelInfo};

/// Kind of topology connection event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopoEventKind {
    /// A node connected.
    Added,
    /// A node disconnected.
    Removed,
    /// Synthesized "no change" event, treated like `Added` for idempotent
    /// re-sync.
    None,
}

/// A node connect/disconnect event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopoEvent {
    pub kind: TopoEventKind,
    pub node_id: NodeId,
}

/// Topology client interface.
pub trait TopoClient: Send + Sync {
    /// Registers `out` for connection events until `ctx` is canceled.
    fn watch_connections(&self, ctx: CancelToken, out: Sender<TopoEvent>) -> KpmResult<()>;

    /// Identifiers of all currently connected nodes.
    fn node_ids(&self) -> KpmResult<Vec<NodeId>>;

    /// Service-model descriptors advertised by a node.
    fn service_models(&self, node_id: &NodeId) -> KpmResult<Vec<ServiceModelInfo>>;

    /// Cells contained by a node.
    fn cells(&self, node_id: &NodeId) -> KpmResult<Vec<E2Cell>>;

    /// Best-effort aspect update for a cell with the latest measurements.
    fn update_cell_aspects(&self, cell_id: &CellIdentity, items: &[MeasurementItem]) -> KpmResult<()>;
}
