//! Report ingestion pipeline.
//!
//! Resolves the reporting device's schema, decodes the report, merges the
//! decoded fields into the device's state and publishes one
//! `StateChanged` event per field whose value actually changed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use meshgate_core::{ChangeSource, DeviceId, EventBus, FieldValue, GatewayEvent};

use crate::codec;
use crate::endpoint::AttributeReport;
use crate::error::GatewayResult;
use crate::registry::{DeviceDirectory, SchemaRegistry};
use crate::schema::DeviceSchema;
use crate::state::StateStore;

/// A device's model together with its schema, resolved once per report.
#[derive(Debug, Clone)]
pub struct ResolvedDevice {
    pub model: String,
    pub schema: Arc<DeviceSchema>,
}

/// Consumes attribute reports and owns every state mutation.
#[derive(Clone)]
pub struct ReportPipeline {
    registry: Arc<SchemaRegistry>,
    directory: Arc<DeviceDirectory>,
    store: Arc<StateStore>,
    events: EventBus,
}

impl ReportPipeline {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        directory: Arc<DeviceDirectory>,
        store: Arc<StateStore>,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            directory,
            store,
            events,
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Model and schema of a joined device.
    ///
    /// Fails with `UnknownModel` if the device was never joined or its
    /// model is not registered.
    pub fn resolve(&self, device_id: &DeviceId) -> GatewayResult<ResolvedDevice> {
        let model = self.directory.model_of(device_id)?;
        let schema = self.registry.lookup(&model)?;
        Ok(ResolvedDevice { model, schema })
    }

    /// Ingest one report, returning the names of fields that changed value.
    ///
    /// Fails with `UnknownModel` if the device was never joined or its
    /// model is not registered. Unmapped attributes are skipped.
    pub fn ingest(
        &self,
        device_id: &DeviceId,
        report: &AttributeReport,
    ) -> GatewayResult<BTreeSet<String>> {
        let device = self.resolve(device_id)?;
        Ok(self.ingest_resolved(device_id, &device, report))
    }

    /// Ingest a report against an already resolved schema.
    ///
    /// Callers that need the schema again after ingesting (for the clock
    /// sync check) resolve once and use this, so a concurrent leave cannot
    /// fail the report halfway through.
    pub fn ingest_resolved(
        &self,
        device_id: &DeviceId,
        device: &ResolvedDevice,
        report: &AttributeReport,
    ) -> BTreeSet<String> {
        let decoded = codec::decode(&device.schema, report);
        tracing::trace!(
            device_id = %device_id,
            records = report.records.len(),
            decoded = decoded.len(),
            "Decoded report"
        );

        let changed = self
            .store
            .merge(device_id, &device.model, decoded, report.received_at);
        self.publish(device_id, changed, ChangeSource::Report, report.received_at)
    }

    /// Record a value the device acknowledged writing.
    ///
    /// This is the single state mutation path outside report ingestion.
    /// Returns whether the stored value changed.
    pub fn apply_optimistic(
        &self,
        device_id: &DeviceId,
        model: &str,
        field: &str,
        value: FieldValue,
    ) -> bool {
        let now = Utc::now();
        let mut values = BTreeMap::new();
        values.insert(field.to_string(), value);
        let changed = self.store.merge(device_id, model, values, now);
        !self
            .publish(device_id, changed, ChangeSource::Command, now)
            .is_empty()
    }

    fn publish(
        &self,
        device_id: &DeviceId,
        changed: Vec<(String, FieldValue)>,
        source: ChangeSource,
        timestamp: DateTime<Utc>,
    ) -> BTreeSet<String> {
        let origin = match source {
            ChangeSource::Report => "ingest",
            ChangeSource::Command => "dispatch",
        };
        let mut names = BTreeSet::new();
        for (field, value) in changed {
            tracing::debug!(device_id = %device_id, field = %field, value = %value, ?source, "State changed");
            self.events.publish_with_source(
                GatewayEvent::StateChanged {
                    device_id: device_id.clone(),
                    field: field.clone(),
                    value,
                    source,
                    timestamp,
                },
                origin,
            );
            names.insert(field);
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin_models::EFLORA_PRO;
    use crate::wire::{clusters, WireValue};

    fn pipeline() -> (ReportPipeline, Arc<DeviceDirectory>) {
        let registry = Arc::new(SchemaRegistry::with_builtin_models().unwrap());
        let directory = Arc::new(DeviceDirectory::new());
        let pipeline = ReportPipeline::new(
            registry,
            directory.clone(),
            Arc::new(StateStore::new()),
            EventBus::new(),
        );
        (pipeline, directory)
    }

    #[test]
    fn test_resolved_ingest_survives_leave() {
        let (pipeline, directory) = pipeline();
        let device = DeviceId::from("dev1");
        directory.assign(device.clone(), EFLORA_PRO);

        let resolved = pipeline.resolve(&device).unwrap();
        directory.remove(&device);

        let report = AttributeReport::new("dev1", 1)
            .with_record(clusters::GEN_POWER_CFG, 0x0201, WireValue::Unsigned16(30));
        let changed = pipeline.ingest_resolved(&device, &resolved, &report);
        assert!(changed.contains("report_delay"));
        assert!(resolved.schema.clock_sync().is_some());
        assert!(pipeline.ingest(&device, &report).is_err());
    }

    #[tokio::test]
    async fn test_event_source_follows_change_source() {
        let (pipeline, directory) = pipeline();
        let device = DeviceId::from("dev1");
        directory.assign(device.clone(), EFLORA_PRO);
        let mut rx = pipeline.events.subscribe();

        let report = AttributeReport::new("dev1", 1)
            .with_record(clusters::GEN_POWER_CFG, 0x0201, WireValue::Unsigned16(30));
        pipeline.ingest(&device, &report).unwrap();
        assert!(pipeline.apply_optimistic(&device, EFLORA_PRO, "report_delay", FieldValue::Integer(45)));

        let (_, report_meta) = rx.try_recv().unwrap();
        let (_, command_meta) = rx.try_recv().unwrap();
        assert_eq!(report_meta.source, "ingest");
        assert_eq!(command_meta.source, "dispatch");
    }
}
