//! Indication messages and decoding.
//!
//! The transport delivers indications as opaque byte pairs (header bytes,
//! message bytes). The pipeline never interprets transport framing itself;
//! an [`IndicationDecoder`] turns the bytes into the typed format-1
//! structures consumed by the monitor. The default [`JsonDecoder`] uses
//! serde_json, which is also what the test fakes encode with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::model::CellObjectId;

/// A raw indication as delivered by the subscribed node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Indication {
    /// Encoded indication header.
    pub header: Vec<u8>,
    /// Encoded indication message.
    pub payload: Vec<u8>,
}

/// Decoded indication header (format 1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicationHeader {
    /// Collection start time for the reporting interval.
    pub collection_start_time: DateTime<Utc>,
}

impl IndicationHeader {
    /// The collection start time in nanoseconds since the Unix epoch.
    ///
    /// Times before the epoch or beyond the representable range collapse
    /// to zero.
    #[must_use]
    pub fn collection_start_unix_nanos(&self) -> u64 {
        self.collection_start_time
            .timestamp_nanos_opt()
            .and_then(|n| u64::try_from(n).ok())
            .unwrap_or(0)
    }
}

/// Measurement type reference inside an indication: either the name itself
/// or the numeric id from the node's advertised measurement list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeasType {
    Name(String),
    Id(u32),
}

/// One entry of the indication's measurement info list; position `j` labels
/// the `j`-th record of every data item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementInfoItem {
    pub meas_type: MeasType,
}

/// A single measurement record value on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MeasRecordItem {
    Integer(i64),
    Real(f64),
    NoValue,
}

/// One measurement-data item: the records for one reporting sub-interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementDataItem {
    pub records: Vec<MeasRecordItem>,
}

/// Decoded indication message (format 1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicationMessage {
    /// Cell the report refers to; absent when the node relies on the
    /// subscription id for correlation.
    pub cell_object_id: Option<CellObjectId>,
    /// Caller-assigned subscription id echoed back by the node.
    pub subscription_id: Option<i64>,
    /// Labels for the records of each data item.
    pub meas_info: Vec<MeasurementInfoItem>,
    /// One entry per reporting sub-interval.
    pub meas_data: Vec<MeasurementDataItem>,
}

/// Decodes indication bytes into typed structures.
pub trait IndicationDecoder: Send + Sync {
    /// Decodes the indication header.
    fn decode_header(&self, bytes: &[u8]) -> Result<IndicationHeader, DecodeError>;

    /// Decodes the indication message.
    fn decode_message(&self, bytes: &[u8]) -> Result<IndicationMessage, DecodeError>;
}

/// serde_json-backed decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl JsonDecoder {
    /// Encodes a header; the inverse of `decode_header`, used by fakes.
    pub fn encode_header(header: &IndicationHeader) -> Result<Vec<u8>, DecodeError> {
        serde_json::to_vec(header).map_err(|e| DecodeError::Header {
            reason: e.to_string(),
        })
    }

    /// Encodes a message; the inverse of `decode_message`, used by fakes.
    pub fn encode_message(message: &IndicationMessage) -> Result<Vec<u8>, DecodeError> {
        serde_json::to_vec(message).map_err(|e| DecodeError::Message {
            reason: e.to_string(),
        })
    }
}

impl IndicationDecoder for JsonDecoder {
    fn decode_header(&self, bytes: &[u8]) -> Result<IndicationHeader, DecodeError> {
        serde_json::from_slice(bytes).map_err(|e| DecodeError::Header {
            reason: e.to_string(),
        })
    }

    fn decode_message(&self, bytes: &[u8]) -> Result<IndicationMessage, DecodeError> {
        serde_json::from_slice(bytes).map_err(|e| DecodeError::Message {
            reason: e.to_string(),
        })
    }
}
