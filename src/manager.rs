//! Subscription manager.
//!
//! The orchestrator of the pipeline: watches topology for node
//! connect/disconnect, builds protocol subscription requests per
//! (node, report style), issues them through the transport client with
//! jittered exponential backoff, bridges the resulting raw indication
//! channel into the stream broker, and starts an indication monitor per
//! subscription. A report-period configuration change tears down every
//! stream and re-subscribes all connected nodes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{bounded, Receiver};
use tracing::{debug, info, warn};

use crate::backoff::{retry_notify, ExpBackoff};
use crate::broker::{StreamBroker, StreamId};
use crate::config::{AppConfig, REPORT_PERIOD_KEY};
use crate::ctx::CancelToken;
use crate::error::{KpmResult, StoreError};
use crate::indication::{Indication, IndicationDecoder};
use crate::model::{CellIndex, ChannelId, E2Cell, MeasurementCatalog, NodeId, ReportStyle};
use crate::monitor::Monitor;
use crate::southbound::{
    build_action, subscription_name, ActionDefinition, E2Client, EventTrigger, KpmVersion,
    ServiceModel, SubscriptionHandle, SubscriptionRequest,
};
use crate::store::actions::{ActionEntry, ActionStore, SubscriptionId};
use crate::store::measurements::MeasurementStore;
use crate::topo::{TopoClient, TopoEvent, TopoEventKind};

/// Manager tunables fixed at startup.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// KPM service-model version to subscribe with.
    pub kpm_version: KpmVersion,
    /// Base RIC action id; per-cell action ids are assigned from here.
    pub base_action_id: i32,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            kpm_version: KpmVersion::V2,
            base_action_id: 10,
        }
    }
}

/// Subscription manager.
pub struct SubscriptionManager {
    options: ManagerOptions,
    e2: Arc<dyn E2Client>,
    topo: Arc<dyn TopoClient>,
    config: Arc<dyn AppConfig>,
    broker: Arc<StreamBroker>,
    actions: Arc<ActionStore>,
    measurements: Arc<MeasurementStore>,
    decoder: Arc<dyn IndicationDecoder>,
    next_sub_id: AtomicI64,
    handles: Mutex<HashMap<ChannelId, SubscriptionHandle>>,
}

impl SubscriptionManager {
    /// Creates a manager wired to its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        options: ManagerOptions,
        e2: Arc<dyn E2Client>,
        topo: Arc<dyn TopoClient>,
        config: Arc<dyn AppConfig>,
        broker: Arc<StreamBroker>,
        actions: Arc<ActionStore>,
        measurements: Arc<MeasurementStore>,
        decoder: Arc<dyn IndicationDecoder>,
    ) -> Self {
        Self {
            options,
            e2,
            topo,
            config,
            broker,
            actions,
            measurements,
            decoder,
            next_sub_id: AtomicI64::new(0),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Starts the topology and configuration watch loops.
    ///
    /// Both run until `ctx` is canceled, which is the only expected
    /// system-wide stop signal.
    pub fn start(self: &Arc<Self>, ctx: &CancelToken) -> KpmResult<()> {
        let manager = Arc::clone(self);
        let topo_ctx = ctx.clone();
        let _ = thread::Builder::new()
            .name("kpmon-topo-watch".to_string())
            .spawn(move || {
                if let Err(err) = manager.watch_topology(&topo_ctx) {
                    if !err.is_canceled() {
                        warn!(target: "manager", error = %err, "topology watch loop failed");
                    }
                }
            });

        let manager = Arc::clone(self);
        let config_ctx = ctx.clone();
        let _ = thread::Builder::new()
            .name("kpmon-config-watch".to_string())
            .spawn(move || {
                if let Err(err) = manager.watch_config(&config_ctx) {
                    if !err.is_canceled() {
                        warn!(target: "manager", error = %err, "config watch loop failed");
                    }
                }
            });

        Ok(())
    }

    /// Consumes node connect/disconnect events until canceled.
    fn watch_topology(self: &Arc<Self>, ctx: &CancelToken) -> KpmResult<()> {
        let (tx, rx) = bounded::<TopoEvent>(16);
        self.topo.watch_connections(ctx.clone(), tx)?;

        loop {
            let event = match recv_event(&rx, ctx)? {
                Some(event) => event,
                None => return Ok(()),
            };
            match event.kind {
                // "No change" events are treated like connects so a restart
                // re-syncs idempotently.
                TopoEventKind::Added | TopoEventKind::None => {
                    match self.supports_kpm(&event.node_id) {
                        Ok(true) => self.spawn_subscription(ctx, event.node_id),
                        Ok(false) => {
                            debug!(target: "manager", node_id = %event.node_id, "node does not advertise the KPM service model");
                        }
                        Err(err) => {
                            warn!(target: "manager", node_id = %event.node_id, error = %err, "failed to read node service models");
                        }
                    }
                }
                TopoEventKind::Removed => self.teardown_node(&event.node_id),
            }
        }
    }

    /// Consumes configuration change events until canceled; a report-period
    /// change rebuilds every subscription.
    fn watch_config(self: &Arc<Self>, ctx: &CancelToken) -> KpmResult<()> {
        let (tx, rx) = bounded(16);
        self.config.watch(ctx.clone(), tx)?;

        loop {
            let event = match recv_event(&rx, ctx)? {
                Some(event) => event,
                None => return Ok(()),
            };
            if event.key == REPORT_PERIOD_KEY {
                info!(target: "manager", value = event.value, "report period changed, rebuilding all subscriptions");
                self.resubscribe_all(ctx);
            }
        }
    }

    /// Closes every open stream and re-subscribes every connected node that
    /// advertises the KPM service model.
    fn resubscribe_all(self: &Arc<Self>, ctx: &CancelToken) {
        for channel_id in self.broker.channel_ids() {
            if let Err(err) = self.broker.close_stream(&channel_id) {
                warn!(target: "manager", channel_id = %channel_id, error = %err, "failed to close stream");
            }
            self.unsubscribe_channel(&channel_id);
        }

        let nodes = match self.topo.node_ids() {
            Ok(nodes) => nodes,
            Err(err) => {
                warn!(target: "manager", error = %err, "failed to list nodes for re-subscription");
                return;
            }
        };

        for node_id in nodes {
            match self.supports_kpm(&node_id) {
                Ok(true) => {
                    // Old correlation entries are superseded by the new
                    // subscription cycle.
                    self.actions.delete_for_node(&node_id);
                    self.spawn_subscription(ctx, node_id);
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(target: "manager", node_id = %node_id, error = %err, "failed to read node service models");
                }
            }
        }
    }

    /// Tears down all per-node state after a disconnect.
    fn teardown_node(&self, node_id: &NodeId) {
        let channels: Vec<ChannelId> = {
            let handles = self.handles.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            handles
                .iter()
                .filter(|(_, handle)| &handle.node_id == node_id)
                .map(|(channel_id, _)| channel_id.clone())
                .collect()
        };

        for channel_id in channels {
            if let Err(err) = self.broker.close_stream(&channel_id) {
                debug!(target: "manager", channel_id = %channel_id, error = %err, "stream already closed");
            }
            self.unsubscribe_channel(&channel_id);
        }

        self.actions.delete_for_node(node_id);
        let removed = self.measurements.delete_for_node(node_id);
        info!(target: "manager", node_id = %node_id, removed, "node torn down");
    }

    /// Unsubscribes the handle recorded for a channel. Errors are logged and
    /// never block teardown.
    fn unsubscribe_channel(&self, channel_id: &ChannelId) {
        let handle = {
            let mut handles = self.handles.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            handles.remove(channel_id)
        };
        if let Some(handle) = handle {
            if let Err(err) = self.e2.unsubscribe(&handle) {
                warn!(target: "manager", subscription = %handle.name, error = %err, "unsubscribe failed");
            }
        }
    }

    /// Spawns one subscription-attempt task for a node, retrying with
    /// capped, jittered, unbounded backoff until the node is ready.
    fn spawn_subscription(self: &Arc<Self>, ctx: &CancelToken, node_id: NodeId) {
        let manager = Arc::clone(self);
        let ctx = ctx.clone();
        let _ = thread::Builder::new()
            .name(format!("kpmon-sub-{node_id}"))
            .spawn(move || {
                let attempt_node = node_id.clone();
                let result = retry_notify(
                    &ctx,
                    ExpBackoff::default(),
                    || manager.create_subscriptions(&ctx, &attempt_node),
                    |err, delay| {
                        info!(
                            target: "manager",
                            node_id = %attempt_node,
                            error = %err,
                            delay_ms = delay.as_millis() as u64,
                            "retrying subscription creation"
                        );
                    },
                );
                if let Err(err) = result {
                    if !err.is_canceled() {
                        warn!(target: "manager", node_id = %node_id, error = %err, "subscription attempt failed");
                    }
                }
            });
    }

    /// Returns true if the node advertises the configured KPM version.
    fn supports_kpm(&self, node_id: &NodeId) -> KpmResult<bool> {
        let models = self.topo.service_models(node_id)?;
        Ok(models.iter().any(|m| m.oid == self.options.kpm_version.oid()))
    }

    /// Creates one subscription per report style advertised by the node.
    fn create_subscriptions(self: &Arc<Self>, ctx: &CancelToken, node_id: &NodeId) -> KpmResult<()> {
        info!(target: "manager", node_id = %node_id, "creating subscriptions");

        let models = self.topo.service_models(node_id)?;
        let model = models
            .iter()
            .find(|m| m.oid == self.options.kpm_version.oid())
            .ok_or_else(|| StoreError::NotFound {
                key: format!("service model {}", self.options.kpm_version.oid()),
            })?;

        let mut cells = self.topo.cells(node_id)?;
        // Deterministic ordering gives a stable action-id assignment.
        cells.sort_by(|a, b| a.cell_object_id.cmp(&b.cell_object_id));

        let report_period = self.config.report_period()?;
        let granularity = self.config.granularity_period()?;

        for style in &model.report_styles {
            self.subscribe_style(ctx, node_id, style, &cells, report_period, granularity)?;
        }
        Ok(())
    }

    /// Builds the request for one (node, style) pair, recording a
    /// correlation entry per cell before the wire payload is constructed.
    fn build_style_request(
        &self,
        node_id: &NodeId,
        style: &ReportStyle,
        cells: &[E2Cell],
        report_period: u64,
        granularity: u64,
    ) -> KpmResult<SubscriptionRequest> {
        let meas_names: Vec<String> = style.measurements.iter().map(|m| m.name.clone()).collect();

        let mut actions = Vec::with_capacity(cells.len());
        for (idx, cell) in cells.iter().enumerate() {
            let sub_id = SubscriptionId(self.next_sub_id.fetch_add(1, Ordering::SeqCst) + 1);

            // Indications for this id may arrive before the subscribe call
            // returns, so the correlation entry goes in first.
            self.actions.put(
                sub_id,
                ActionEntry {
                    node_id: node_id.clone(),
                    cell_object_id: cell.cell_object_id.clone(),
                    measurements: meas_names.clone(),
                    granularity_ms: granularity,
                },
            );

            let definition = ActionDefinition {
                cell_object_id: cell.cell_object_id.clone(),
                subscription_id: sub_id.0,
                measurements: meas_names.clone(),
                granularity_ms: granularity,
            };
            actions.push(build_action(
                self.options.base_action_id + i32::try_from(idx).unwrap_or(i32::MAX),
                definition.encode()?,
            ));
        }

        Ok(SubscriptionRequest {
            node_id: node_id.clone(),
            service_model: ServiceModel::from(self.options.kpm_version),
            event_trigger: EventTrigger::from_report_period(report_period)?,
            actions,
        })
    }

    /// Issues one subscription, opens its broker stream, and starts the
    /// forwarding task and indication monitor against it.
    fn subscribe_style(
        self: &Arc<Self>,
        ctx: &CancelToken,
        node_id: &NodeId,
        style: &ReportStyle,
        cells: &[E2Cell],
        report_period: u64,
        granularity: u64,
    ) -> KpmResult<()> {
        let request = self.build_style_request(node_id, style, cells, report_period, granularity)?;

        let (raw_tx, raw_rx) = bounded::<Indication>(0);
        let handle = self.e2.subscribe(ctx, request, raw_tx)?;
        {
            let mut handles = self.handles.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            handles.insert(handle.channel_id.clone(), handle.clone());
        }

        let sub_name = subscription_name(node_id, &style.name);
        let reader = self
            .broker
            .open_stream(node_id.clone(), handle.channel_id.clone(), sub_name);
        let stream_id = reader.info().stream_id;

        // Pass-through task: decouples the transport's channel from the
        // broker's buffering and consumer fan-out.
        let broker = Arc::clone(&self.broker);
        let _ = thread::Builder::new()
            .name(format!("kpmon-fwd-{stream_id}"))
            .spawn(move || forward_indications(&broker, stream_id, &raw_rx));

        let catalog = MeasurementCatalog::from_measurements(&style.measurements);
        let monitor = Monitor::new(
            reader,
            node_id.clone(),
            catalog,
            CellIndex::from_cells(cells),
            Arc::clone(&self.actions),
            Arc::clone(&self.measurements),
            Arc::clone(&self.config),
            Arc::clone(&self.topo),
            Arc::clone(&self.decoder),
        );
        let monitor_ctx = ctx.clone();
        let monitor_node = node_id.clone();
        let _ = thread::Builder::new()
            .name(format!("kpmon-monitor-{stream_id}"))
            .spawn(move || {
                if let Err(err) = monitor.start(&monitor_ctx) {
                    if !err.is_canceled() && !err.is_closed() {
                        warn!(target: "manager", node_id = %monitor_node, error = %err, "monitor terminated");
                    }
                }
            });

        info!(target: "manager", node_id = %node_id, style = %style.name, "subscription established");
        Ok(())
    }
}

/// Blocks for the next event, mapping cancellation and channel closure.
/// Returns `Ok(None)` when the event feed closed.
fn recv_event<T>(rx: &Receiver<T>, ctx: &CancelToken) -> KpmResult<Option<T>> {
    crossbeam_channel::select! {
        recv(rx) -> msg => Ok(msg.ok()),
        recv(ctx.done()) -> msg => match msg {
            Err(_) => Err(crate::error::StreamError::Canceled.into()),
            Ok(never) => match never {},
        },
    }
}

/// Drains the transport's raw indication channel into the broker stream.
/// Backpressure (`Unavailable`) drops the indication and keeps forwarding;
/// a closed stream ends the task.
fn forward_indications(broker: &StreamBroker, stream_id: StreamId, rx: &Receiver<Indication>) {
    let Ok(writer) = broker.get_writer(stream_id) else {
        return;
    };
    for indication in rx.iter() {
        match writer.send(indication) {
            Ok(()) => {}
            Err(err) if err.is_closed() => return,
            Err(err) => {
                warn!(target: "manager", %stream_id, error = %err, "dropping indication");
            }
        }
    }
}
