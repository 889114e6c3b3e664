//! Indication monitor.
//!
//! One monitor is bound to one subscription's stream. It pulls indications
//! off the stream, decodes header and payload, resolves the cell identity
//! (directly from the payload or through the action store), derives record
//! timestamps from the collection start time and granularity period, and
//! writes the resulting snapshot to the measurement store. Decode and
//! correlation failures are logged and the indication skipped; only stream
//! closure or cancellation terminates the loop.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::broker::StreamReader;
use crate::config::AppConfig;
use crate::ctx::CancelToken;
use crate::error::{DecodeError, KpmResult};
use crate::indication::{Indication, IndicationDecoder, IndicationMessage, MeasRecordItem, MeasType};
use crate::model::{
    CellIdentity, CellIndex, CellObjectId, MeasValue, MeasurementCatalog, MeasurementItem,
    MeasurementRecord, NodeId,
};
use crate::store::actions::{ActionStore, SubscriptionId};
use crate::store::measurements::{MeasurementKey, MeasurementStore};
use crate::topo::TopoClient;

/// Indication monitor for one subscription stream.
pub struct Monitor {
    reader: StreamReader,
    node_id: NodeId,
    catalog: MeasurementCatalog,
    cells: CellIndex,
    actions: Arc<ActionStore>,
    measurements: Arc<MeasurementStore>,
    config: Arc<dyn AppConfig>,
    topo: Arc<dyn TopoClient>,
    decoder: Arc<dyn IndicationDecoder>,
}

impl Monitor {
    /// Creates a monitor bound to one stream.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reader: StreamReader,
        node_id: NodeId,
        catalog: MeasurementCatalog,
        cells: CellIndex,
        actions: Arc<ActionStore>,
        measurements: Arc<MeasurementStore>,
        config: Arc<dyn AppConfig>,
        topo: Arc<dyn TopoClient>,
        decoder: Arc<dyn IndicationDecoder>,
    ) -> Self {
        Self {
            reader,
            node_id,
            catalog,
            cells,
            actions,
            measurements,
            config,
            topo,
            decoder,
        }
    }

    /// Runs the monitor loop until the stream closes or `ctx` is canceled.
    ///
    /// Returns the first unrecoverable error; per-indication decode and
    /// correlation failures are logged and swallowed.
    pub fn start(&self, ctx: &CancelToken) -> KpmResult<()> {
        loop {
            let indication = match self.reader.recv(ctx) {
                Ok(indication) => indication,
                Err(err) => {
                    debug!(target: "monitor", node_id = %self.node_id, error = %err, "monitor loop terminating");
                    return Err(err);
                }
            };
            if let Err(err) = self.process_indication(&indication) {
                warn!(target: "monitor", node_id = %self.node_id, error = %err, "skipping indication");
            }
        }
    }

    fn process_indication(&self, indication: &Indication) -> KpmResult<()> {
        let header = self.decoder.decode_header(&indication.header)?;
        let message = self.decoder.decode_message(&indication.payload)?;

        let base_ns = header.collection_start_unix_nanos();
        // Current value at processing time, not the value captured when the
        // subscription was created.
        let granularity = self.config.granularity_period()?;

        let cell_object_id = self.resolve_cell(&message)?;
        let cell_id = CellIdentity::from(&cell_object_id);
        let items = self.build_items(&message, base_ns, granularity);

        let key = MeasurementKey::new(self.node_id.clone(), cell_id);
        self.measurements.put(key, items.clone());

        // Best-effort: an aspect update failure must not undo the store
        // write. Topology addresses cells by their global id, not the
        // node-scoped object id the store is keyed by.
        match self.cells.lookup(&cell_object_id) {
            Some(global_id) => {
                if let Err(err) = self.topo.update_cell_aspects(global_id, &items) {
                    warn!(target: "monitor", cell_id = %global_id, error = %err, "cell aspect update failed");
                }
            }
            None => {
                debug!(target: "monitor", cell_object_id = %cell_object_id, "cell not in topology index, skipping aspect update");
            }
        }

        Ok(())
    }

    /// Resolves the cell the indication refers to, falling back to the
    /// action store when the payload omits the cell object id.
    fn resolve_cell(&self, message: &IndicationMessage) -> KpmResult<CellObjectId> {
        if let Some(cell_object_id) = &message.cell_object_id {
            return Ok(cell_object_id.clone());
        }
        let sub_id = message
            .subscription_id
            .ok_or(DecodeError::MissingCellReference)?;
        let entry = self.actions.get(SubscriptionId(sub_id))?;
        Ok(entry.cell_object_id)
    }

    fn build_items(
        &self,
        message: &IndicationMessage,
        base_ns: u64,
        granularity: u64,
    ) -> Vec<MeasurementItem> {
        let mut items = Vec::with_capacity(message.meas_data.len());
        for (i, data_item) in message.meas_data.iter().enumerate() {
            // One reporting sub-interval per data item.
            let timestamp = base_ns + granularity * 1_000_000 * i as u64;

            let mut records = Vec::with_capacity(data_item.records.len());
            for (j, record) in data_item.records.iter().enumerate() {
                let value = match record {
                    MeasRecordItem::Integer(v) => MeasValue::Integer(*v),
                    MeasRecordItem::Real(v) => MeasValue::Real(*v),
                    MeasRecordItem::NoValue => MeasValue::NoValue,
                };

                let Some(name) = self.resolve_name(message, j) else {
                    debug!(target: "monitor", record_index = j, "unresolvable measurement name, skipping record");
                    continue;
                };

                records.push(MeasurementRecord {
                    timestamp,
                    name,
                    value,
                });
            }
            items.push(MeasurementItem { records });
        }
        items
    }

    /// Resolves the name of the `j`-th record: directly from the info list
    /// when present, otherwise through the node's measurement catalog.
    fn resolve_name(&self, message: &IndicationMessage, j: usize) -> Option<String> {
        match &message.meas_info.get(j)?.meas_type {
            MeasType::Name(name) if !name.is_empty() => Some(name.clone()),
            MeasType::Name(_) => None,
            MeasType::Id(id) => self.catalog.lookup(*id).map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::StreamBroker;
    use crate::config::InMemoryConfig;
    use crate::indication::{JsonDecoder, MeasurementDataItem, MeasurementInfoItem};
    use crate::model::{CellObjectId, ChannelId, E2Cell, KpmMeasurement, ServiceModelInfo};
    use crate::store::actions::ActionEntry;
    use crate::topo::{TopoEvent, TopoClient};
    use chrono::{TimeZone, Utc};
    use crossbeam_channel::Sender;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Topology fake that records aspect updates.
    #[derive(Default)]
    struct RecordingTopo {
        updates: Mutex<Vec<(CellIdentity, usize)>>,
        fail_updates: bool,
    }

    impl TopoClient for RecordingTopo {
        fn watch_connections(&self, _ctx: CancelToken, _out: Sender<TopoEvent>) -> KpmResult<()> {
            Ok(())
        }

        fn node_ids(&self) -> KpmResult<Vec<NodeId>> {
            Ok(Vec::new())
        }

        fn service_models(&self, _node_id: &NodeId) -> KpmResult<Vec<ServiceModelInfo>> {
            Ok(Vec::new())
        }

        fn cells(&self, _node_id: &NodeId) -> KpmResult<Vec<E2Cell>> {
            Ok(Vec::new())
        }

        fn update_cell_aspects(
            &self,
            cell_id: &CellIdentity,
            items: &[MeasurementItem],
        ) -> KpmResult<()> {
            if self.fail_updates {
                return Err(crate::error::KpmError::internal("topo unavailable"));
            }
            self.updates
                .lock()
                .unwrap()
                .push((cell_id.clone(), items.len()));
            Ok(())
        }
    }

    struct Fixture {
        monitor: Monitor,
        writer: crate::broker::StreamWriter,
        measurements: Arc<MeasurementStore>,
        actions: Arc<ActionStore>,
        topo: Arc<RecordingTopo>,
    }

    fn cell_index() -> CellIndex {
        CellIndex::from_cells(&[
            E2Cell {
                cell_object_id: CellObjectId::from("cell-A"),
                cell_global_id: CellIdentity("global-A".to_string()),
            },
            E2Cell {
                cell_object_id: CellObjectId::from("cell-C"),
                cell_global_id: CellIdentity("global-C".to_string()),
            },
        ])
    }

    fn fixture(granularity_ms: u64) -> Fixture {
        let broker = StreamBroker::new();
        let reader = broker.open_stream(NodeId::from("gnb-1"), ChannelId::from("chan-1"), "sub-1");
        let writer = broker.get_writer(reader.info().stream_id).unwrap();

        let actions = Arc::new(ActionStore::new());
        let measurements = Arc::new(MeasurementStore::new());
        let topo = Arc::new(RecordingTopo::default());
        let config = Arc::new(InMemoryConfig::new(5000, granularity_ms));
        let catalog = MeasurementCatalog::from_measurements(&[KpmMeasurement {
            id: 1,
            name: "RRC.ConnEstabAtt.Tot".to_string(),
        }]);

        let monitor = Monitor::new(
            reader,
            NodeId::from("gnb-1"),
            catalog,
            cell_index(),
            Arc::clone(&actions),
            Arc::clone(&measurements),
            config,
            Arc::clone(&topo) as Arc<dyn TopoClient>,
            Arc::new(JsonDecoder),
        );

        Fixture {
            monitor,
            writer,
            measurements,
            actions,
            topo,
        }
    }

    fn base_time() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn indication(message: &IndicationMessage) -> Indication {
        let header = crate::indication::IndicationHeader {
            collection_start_time: base_time(),
        };
        Indication {
            header: JsonDecoder::encode_header(&header).unwrap(),
            payload: JsonDecoder::encode_message(message).unwrap(),
        }
    }

    fn message_with_values(cell: Option<&str>, sub_id: Option<i64>, values: &[i64]) -> IndicationMessage {
        IndicationMessage {
            cell_object_id: cell.map(CellObjectId::from),
            subscription_id: sub_id,
            meas_info: vec![MeasurementInfoItem {
                meas_type: MeasType::Name("RRC.ConnEstabSucc.Tot".to_string()),
            }],
            meas_data: values
                .iter()
                .map(|v| MeasurementDataItem {
                    records: vec![MeasRecordItem::Integer(*v)],
                })
                .collect(),
        }
    }

    #[test]
    fn explicit_cell_indication_produces_a_snapshot() {
        let fx = fixture(1000);
        let msg = message_with_values(Some("cell-A"), None, &[5]);
        fx.monitor.process_indication(&indication(&msg)).unwrap();

        let key = MeasurementKey::new(NodeId::from("gnb-1"), CellIdentity("cell-A".to_string()));
        let entry = fx.measurements.get(&key).unwrap();
        assert_eq!(entry.items.len(), 1);
        let record = &entry.items[0].records[0];
        assert_eq!(record.name, "RRC.ConnEstabSucc.Tot");
        assert_eq!(record.value, MeasValue::Integer(5));
        assert_eq!(
            record.timestamp,
            base_time().timestamp() as u64 * 1_000_000_000
        );
    }

    #[test]
    fn timestamps_advance_by_granularity_per_data_item() {
        let fx = fixture(1000);
        let msg = message_with_values(Some("cell-A"), None, &[1, 2, 3]);
        fx.monitor.process_indication(&indication(&msg)).unwrap();

        let key = MeasurementKey::new(NodeId::from("gnb-1"), CellIdentity("cell-A".to_string()));
        let entry = fx.measurements.get(&key).unwrap();
        let base_ns = base_time().timestamp() as u64 * 1_000_000_000;
        for (k, item) in entry.items.iter().enumerate() {
            assert_eq!(item.records[0].timestamp, base_ns + 1000 * 1_000_000 * k as u64);
        }
    }

    #[test]
    fn missing_cell_reference_resolves_through_the_action_store() {
        let fx = fixture(1000);
        fx.actions.put(
            SubscriptionId(42),
            ActionEntry {
                node_id: NodeId::from("gnb-1"),
                cell_object_id: CellObjectId::from("cell-C"),
                measurements: vec!["RRC.ConnEstabSucc.Tot".to_string()],
                granularity_ms: 1000,
            },
        );

        let msg = message_with_values(None, Some(42), &[9]);
        fx.monitor.process_indication(&indication(&msg)).unwrap();

        let key = MeasurementKey::new(NodeId::from("gnb-1"), CellIdentity("cell-C".to_string()));
        assert!(fx.measurements.get(&key).is_ok());
    }

    #[test]
    fn unknown_subscription_id_drops_the_indication() {
        let fx = fixture(1000);
        let msg = message_with_values(None, Some(99), &[9]);
        let err = fx.monitor.process_indication(&indication(&msg)).unwrap_err();
        assert!(err.is_not_found());
        assert!(fx.measurements.is_empty());
    }

    #[test]
    fn indication_without_any_cell_reference_is_a_decode_error() {
        let fx = fixture(1000);
        let msg = message_with_values(None, None, &[1]);
        let err = fx.monitor.process_indication(&indication(&msg)).unwrap_err();
        assert!(matches!(
            err,
            crate::error::KpmError::Decode(DecodeError::MissingCellReference)
        ));
    }

    #[test]
    fn second_indication_overwrites_the_snapshot() {
        let fx = fixture(1000);
        let key = MeasurementKey::new(NodeId::from("gnb-1"), CellIdentity("cell-A".to_string()));

        let first = message_with_values(Some("cell-A"), None, &[5]);
        fx.monitor.process_indication(&indication(&first)).unwrap();

        let second = message_with_values(Some("cell-A"), None, &[7]);
        fx.monitor.process_indication(&indication(&second)).unwrap();

        let entry = fx.measurements.get(&key).unwrap();
        assert_eq!(entry.items.len(), 1);
        assert_eq!(entry.items[0].records[0].value, MeasValue::Integer(7));
    }

    #[test]
    fn numeric_ids_resolve_through_the_catalog() {
        let fx = fixture(1000);
        let msg = IndicationMessage {
            cell_object_id: Some(CellObjectId::from("cell-A")),
            subscription_id: None,
            meas_info: vec![
                MeasurementInfoItem {
                    meas_type: MeasType::Id(1),
                },
                MeasurementInfoItem {
                    meas_type: MeasType::Id(77),
                },
            ],
            meas_data: vec![MeasurementDataItem {
                records: vec![MeasRecordItem::Real(0.5), MeasRecordItem::Integer(3)],
            }],
        };
        fx.monitor.process_indication(&indication(&msg)).unwrap();

        let key = MeasurementKey::new(NodeId::from("gnb-1"), CellIdentity("cell-A".to_string()));
        let entry = fx.measurements.get(&key).unwrap();
        // The unknown id 77 is skipped; the known id resolves to its name.
        assert_eq!(entry.items[0].records.len(), 1);
        assert_eq!(entry.items[0].records[0].name, "RRC.ConnEstabAtt.Tot");
        assert_eq!(entry.items[0].records[0].value, MeasValue::Real(0.5));
    }

    #[test]
    fn no_value_records_are_kept_as_no_value() {
        let fx = fixture(1000);
        let msg = IndicationMessage {
            cell_object_id: Some(CellObjectId::from("cell-A")),
            subscription_id: None,
            meas_info: vec![MeasurementInfoItem {
                meas_type: MeasType::Name("RRC.ConnEstabSucc.Tot".to_string()),
            }],
            meas_data: vec![MeasurementDataItem {
                records: vec![MeasRecordItem::NoValue],
            }],
        };
        fx.monitor.process_indication(&indication(&msg)).unwrap();

        let key = MeasurementKey::new(NodeId::from("gnb-1"), CellIdentity("cell-A".to_string()));
        let entry = fx.measurements.get(&key).unwrap();
        assert_eq!(entry.items[0].records[0].value, MeasValue::NoValue);
    }

    #[test]
    fn aspect_update_failure_does_not_roll_back_the_store_write() {
        let broker = StreamBroker::new();
        let reader = broker.open_stream(NodeId::from("gnb-1"), ChannelId::from("chan-1"), "sub-1");

        let measurements = Arc::new(MeasurementStore::new());
        let topo = Arc::new(RecordingTopo {
            updates: Mutex::new(Vec::new()),
            fail_updates: true,
        });
        let monitor = Monitor::new(
            reader,
            NodeId::from("gnb-1"),
            MeasurementCatalog::default(),
            cell_index(),
            Arc::new(ActionStore::new()),
            Arc::clone(&measurements),
            Arc::new(InMemoryConfig::new(5000, 1000)),
            topo,
            Arc::new(JsonDecoder),
        );

        let msg = message_with_values(Some("cell-A"), None, &[5]);
        monitor.process_indication(&indication(&msg)).unwrap();
        assert_eq!(measurements.len(), 1);
    }

    #[test]
    fn monitor_loop_skips_bad_indications_and_keeps_running() {
        let fx = fixture(1000);
        let ctx = CancelToken::background();

        let writer = fx.writer.clone();
        let measurements = Arc::clone(&fx.measurements);
        let monitor = fx.monitor;
        let loop_handle = std::thread::spawn(move || monitor.start(&ctx));

        // Garbage bytes first, then a valid indication.
        writer
            .send(Indication {
                header: b"garbage".to_vec(),
                payload: b"garbage".to_vec(),
            })
            .unwrap();
        let msg = message_with_values(Some("cell-A"), None, &[5]);
        writer.send(indication(&msg)).unwrap();

        let key = MeasurementKey::new(NodeId::from("gnb-1"), CellIdentity("cell-A".to_string()));
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while measurements.get(&key).is_err() {
            assert!(std::time::Instant::now() < deadline, "snapshot never appeared");
            std::thread::sleep(Duration::from_millis(5));
        }

        // Closing the stream terminates the loop with end-of-stream.
        writer.close();
        let err = loop_handle.join().unwrap().unwrap_err();
        assert!(err.is_closed());
    }

    #[test]
    fn aspect_updates_address_cells_by_their_global_id() {
        let fx = fixture(1000);
        let msg = message_with_values(Some("cell-A"), None, &[5]);
        fx.monitor.process_indication(&indication(&msg)).unwrap();

        // The store key stays the object id; topology sees the global id.
        let key = MeasurementKey::new(NodeId::from("gnb-1"), CellIdentity("cell-A".to_string()));
        assert!(fx.measurements.get(&key).is_ok());

        let updates = fx.topo.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, CellIdentity("global-A".to_string()));
    }

    #[test]
    fn cells_absent_from_topology_skip_the_aspect_update() {
        let fx = fixture(1000);
        let msg = message_with_values(Some("cell-X"), None, &[5]);
        fx.monitor.process_indication(&indication(&msg)).unwrap();

        // The snapshot is still stored; only the topology write is skipped.
        let key = MeasurementKey::new(NodeId::from("gnb-1"), CellIdentity("cell-X".to_string()));
        assert!(fx.measurements.get(&key).is_ok());
        assert!(fx.topo.updates.lock().unwrap().is_empty());
    }
}
