//! Core data types shared across the pipeline.
//!
//! These model the topology-owned inventory (nodes, cells, service models,
//! report styles) and the decoded measurement snapshots produced by the
//! indication monitor.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a remote E2 node, as reported by topology.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Node-scoped cell object identifier used in action definitions and
/// indication payloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellObjectId(pub String);

impl fmt::Display for CellObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CellObjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Canonical cell identity used as the measurement store key.
///
/// The resolved cell object id value is used verbatim; no ad-hoc decimal
/// re-encoding of byte arrays.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellIdentity(pub String);

impl fmt::Display for CellIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&CellObjectId> for CellIdentity {
    fn from(id: &CellObjectId) -> Self {
        Self(id.0.clone())
    }
}

/// Identifier of one subscription's data path, issued by the transport when
/// a subscription is established.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A cell as enumerated by topology for one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct E2Cell {
    /// Node-scoped object identifier.
    pub cell_object_id: CellObjectId,
    /// Globally unique cell identifier.
    pub cell_global_id: CellIdentity,
}

/// A measurement advertised by a node's RAN function: numeric id plus name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KpmMeasurement {
    pub id: u32,
    pub name: String,
}

/// A node-advertised grouping of measurements obtainable via one
/// subscription shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportStyle {
    pub name: String,
    pub style_type: u32,
    pub measurements: Vec<KpmMeasurement>,
}

/// Service-model descriptor advertised by a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceModelInfo {
    pub name: String,
    pub oid: String,
    pub report_styles: Vec<ReportStyle>,
}

/// A decoded measurement value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MeasValue {
    Integer(i64),
    Real(f64),
    /// The node reported the measurement without a value.
    NoValue,
}

impl Default for MeasValue {
    fn default() -> Self {
        Self::Integer(0)
    }
}

/// One decoded measurement record: name, value, and the derived timestamp in
/// nanoseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub timestamp: u64,
    pub name: String,
    pub value: MeasValue,
}

/// The records of one measurement-data item (one reporting sub-interval).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MeasurementItem {
    pub records: Vec<MeasurementRecord>,
}

/// Metric-name table for one node: resolves numeric measurement ids in
/// indication payloads back to names.
///
/// Built once per subscription from the node's advertised measurements and
/// shared read-only with the monitor; it is never mutated afterwards.
#[derive(Debug, Clone, Default)]
pub struct MeasurementCatalog {
    names: HashMap<u32, String>,
}

impl MeasurementCatalog {
    /// Builds the catalog from a node's advertised measurement list.
    #[must_use]
    pub fn from_measurements(measurements: &[KpmMeasurement]) -> Self {
        let names = measurements
            .iter()
            .map(|m| (m.id, m.name.clone()))
            .collect();
        Self { names }
    }

    /// Resolves a numeric measurement id to its advertised name.
    #[must_use]
    pub fn lookup(&self, id: u32) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    /// Number of known measurements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if no measurements are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Cell-identity table for one node: resolves node-scoped cell object ids
/// to the globally unique identifiers topology knows the cells by.
///
/// Built once per subscription from the node's cell list, like
/// [`MeasurementCatalog`].
#[derive(Debug, Clone, Default)]
pub struct CellIndex {
    global_ids: HashMap<CellObjectId, CellIdentity>,
}

impl CellIndex {
    /// Builds the index from a node's cell list.
    #[must_use]
    pub fn from_cells(cells: &[E2Cell]) -> Self {
        let global_ids = cells
            .iter()
            .map(|c| (c.cell_object_id.clone(), c.cell_global_id.clone()))
            .collect();
        Self { global_ids }
    }

    /// Resolves a cell object id to the cell's global identifier.
    #[must_use]
    pub fn lookup(&self, id: &CellObjectId) -> Option<&CellIdentity> {
        self.global_ids.get(id)
    }

    /// Number of known cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.global_ids.len()
    }

    /// Returns true if no cells are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.global_ids.is_empty()
    }
}
