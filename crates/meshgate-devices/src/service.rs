//! Gateway service - wires the device layer together.
//!
//! ```text
//! endpoint ──reports──► report loop ──► ReportPipeline ──► StateStore ──► EventBus
//!                              │
//!                              └──(time cluster)──► ClockSync ──write──► endpoint
//! caller ──dispatch──► CommandDispatcher ──write/command──► endpoint
//!                              └──ack──► ReportPipeline::apply_optimistic
//! caller ──join──► Configurator ──bind/configure──► endpoint
//! ```

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use meshgate_core::{DeviceId, EventBus, EventBusReceiver, FieldValue, GatewayEvent};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::binding::{Commissioning, Configurator};
use crate::clock::{ClockSync, TimeSource};
use crate::config::GatewayConfig;
use crate::dispatch::{CommandDispatcher, DispatchOutcome};
use crate::endpoint::{AttributeReport, Endpoint};
use crate::error::GatewayResult;
use crate::ingest::ReportPipeline;
use crate::registry::{DeviceDirectory, SchemaRegistry};
use crate::state::{DeviceState, StateStore};
use crate::wire::ClusterId;

/// Handles one inbound report: ingest, then clock sync on its own task.
#[derive(Clone)]
struct ReportHandler {
    pipeline: ReportPipeline,
    clock: ClockSync,
}

impl ReportHandler {
    fn handle(&self, report: &AttributeReport) -> GatewayResult<BTreeSet<String>> {
        let device_id = &report.device_id;
        let device = self.pipeline.resolve(device_id)?;
        let changed = self.pipeline.ingest_resolved(device_id, &device, report);

        if let Some(config) = device.schema.clock_sync().copied() {
            if report.touches(config.cluster) {
                let clock = self.clock.clone();
                let report = report.clone();
                // The report path never waits on the clock write.
                tokio::spawn(async move {
                    clock.handle_report(&report, &config).await;
                });
            }
        }
        Ok(changed)
    }
}

struct RunningLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Mesh-sensor gateway core.
pub struct Gateway {
    config: GatewayConfig,
    registry: Arc<SchemaRegistry>,
    directory: Arc<DeviceDirectory>,
    store: Arc<StateStore>,
    pipeline: ReportPipeline,
    dispatcher: CommandDispatcher,
    clock: ClockSync,
    configurator: Configurator,
    endpoint: Arc<dyn Endpoint>,
    events: EventBus,
    report_loop: Mutex<Option<RunningLoop>>,
}

impl Gateway {
    /// Build a gateway over an endpoint. The registry is frozen from here on.
    pub fn new(registry: SchemaRegistry, endpoint: Arc<dyn Endpoint>, config: GatewayConfig) -> Self {
        let registry = Arc::new(registry);
        let directory = Arc::new(DeviceDirectory::new());
        let store = Arc::new(StateStore::new());
        let events = EventBus::with_capacity(config.event_capacity).named("gateway");

        let pipeline = ReportPipeline::new(
            registry.clone(),
            directory.clone(),
            store.clone(),
            events.clone(),
        );
        let dispatcher = CommandDispatcher::new(
            registry.clone(),
            directory.clone(),
            pipeline.clone(),
            endpoint.clone(),
            events.clone(),
        );
        let clock = ClockSync::new(
            endpoint.clone(),
            config.time_source(),
            config.clock_write_timeout(),
            events.clone(),
        );
        let configurator = Configurator::new(endpoint.clone());

        tracing::info!(models = registry.len(), "Gateway created");
        Self {
            config,
            registry,
            directory,
            store,
            pipeline,
            dispatcher,
            clock,
            configurator,
            endpoint,
            events,
            report_loop: Mutex::new(None),
        }
    }

    /// Built-in models plus the configured schema file, if any.
    pub fn from_config(endpoint: Arc<dyn Endpoint>, config: GatewayConfig) -> GatewayResult<Self> {
        let mut registry = SchemaRegistry::with_builtin_models()?;
        if let Some(path) = &config.schema_path {
            registry.load_file(path)?;
        }
        Ok(Self::new(registry, endpoint, config))
    }

    /// Replace the clock used for device time sync.
    pub fn with_time_source(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = ClockSync::new(
            self.endpoint.clone(),
            clock,
            self.config.clock_write_timeout(),
            self.events.clone(),
        );
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn directory(&self) -> &Arc<DeviceDirectory> {
        &self.directory
    }

    pub fn configurator(&self) -> &Configurator {
        &self.configurator
    }

    pub fn clock(&self) -> &ClockSync {
        &self.clock
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> EventBusReceiver {
        self.events.subscribe()
    }

    fn handler(&self) -> ReportHandler {
        ReportHandler {
            pipeline: self.pipeline.clone(),
            clock: self.clock.clone(),
        }
    }

    /// Commission a device as `model`. Safe to repeat after re-pairing.
    pub async fn join(&self, device_id: impl Into<DeviceId>, model: &str) -> GatewayResult<Commissioning> {
        let device_id = device_id.into();
        let schema = self.registry.lookup(model)?;

        if let Some(previous) = self.directory.assign(device_id.clone(), model) {
            if previous != model {
                tracing::info!(device_id = %device_id, from = %previous, to = %model, "Device changed model");
            }
        }
        self.store.ensure(&device_id, model);

        let summary = self.configurator.configure(&device_id, &schema).await?;
        self.events.publish_with_source(
            GatewayEvent::DeviceJoined {
                device_id,
                model: model.to_string(),
                timestamp: Utc::now(),
            },
            "gateway",
        );
        Ok(summary)
    }

    /// Forget a device and its state.
    pub fn leave(&self, device_id: &DeviceId) -> Option<DeviceState> {
        self.directory.remove(device_id);
        self.configurator.table().forget(device_id);
        self.store.remove(device_id)
    }

    /// Ingest one report as if it came from the endpoint.
    ///
    /// Must be called from within a Tokio runtime: a time-cluster report
    /// spawns the clock sync write.
    pub fn ingest(&self, report: &AttributeReport) -> GatewayResult<BTreeSet<String>> {
        self.handler().handle(report)
    }

    /// Set a field on a device.
    pub async fn dispatch(
        &self,
        device_id: &DeviceId,
        field: &str,
        raw_value: &str,
    ) -> GatewayResult<DispatchOutcome> {
        self.dispatcher.dispatch(device_id, field, raw_value).await
    }

    /// Set a field on a device from an already-typed value.
    pub async fn dispatch_value(
        &self,
        device_id: &DeviceId,
        field: &str,
        value: &FieldValue,
    ) -> GatewayResult<DispatchOutcome> {
        self.dispatcher.dispatch_value(device_id, field, value).await
    }

    /// Reset a device to factory defaults and drop its stored values.
    pub async fn factory_reset(&self, device_id: &DeviceId) -> GatewayResult<()> {
        self.dispatcher.factory_reset(device_id).await
    }

    /// Poll a field from a device and merge the answer into its state.
    pub async fn refresh(&self, device_id: &DeviceId, field: &str) -> GatewayResult<FieldValue> {
        self.dispatcher.refresh(device_id, field).await
    }

    /// Snapshot of a device's state.
    pub fn state(&self, device_id: &DeviceId) -> Option<DeviceState> {
        self.store.snapshot(device_id)
    }

    /// Joined devices.
    pub fn devices(&self) -> Vec<DeviceId> {
        self.directory.devices()
    }

    /// Clusters the report loop listens on: every cluster any model reports on.
    pub fn report_clusters(&self) -> Vec<ClusterId> {
        let clusters: HashSet<ClusterId> = self
            .registry
            .schemas()
            .flat_map(|schema| schema.report_clusters())
            .collect();
        let mut clusters: Vec<ClusterId> = clusters.into_iter().collect();
        clusters.sort();
        clusters
    }

    pub fn is_running(&self) -> bool {
        self.report_loop
            .lock()
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Start the report loop. Returns `false` if it is already running.
    pub fn start(&self) -> bool {
        let mut slot = self.report_loop.lock();
        if slot.as_ref().is_some_and(|running| !running.handle.is_finished()) {
            tracing::warn!("Gateway report loop already running");
            return false;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_report_loop(
            self.endpoint.clone(),
            self.report_clusters(),
            self.handler(),
            self.config.resubscribe_delay(),
            shutdown_rx,
        ));
        *slot = Some(RunningLoop { shutdown, handle });
        tracing::info!("Gateway started");
        true
    }

    /// Stop the report loop and wait for it to finish.
    pub async fn stop(&self) {
        let running = self.report_loop.lock().take();
        let Some(running) = running else {
            return;
        };
        let _ = running.shutdown.send(true);
        if let Err(e) = running.handle.await {
            tracing::warn!(error = %e, "Report loop ended abnormally");
        }
        tracing::info!("Gateway stopped");
    }
}

async fn run_report_loop(
    endpoint: Arc<dyn Endpoint>,
    clusters: Vec<ClusterId>,
    handler: ReportHandler,
    resubscribe_delay: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let mut stream = endpoint.subscribe_reports(&clusters);
        tracing::info!(clusters = clusters.len(), "Subscribed to attribute reports");

        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                next = stream.next() => match next {
                    Some(report) => {
                        if let Err(e) = handler.handle(&report) {
                            tracing::warn!(device_id = %report.device_id, error = %e, "Failed to ingest report");
                        }
                    }
                    None => break,
                },
            }
        }

        tracing::warn!(
            delay_ms = resubscribe_delay.as_millis() as u64,
            "Report stream ended, resubscribing"
        );
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(resubscribe_delay) => {}
        }
    }
}
