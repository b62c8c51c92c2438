//! Command dispatcher.
//!
//! A command is validated and encoded in full before the endpoint is
//! touched. Only an acknowledged write updates local state; transport
//! failures are surfaced as-is and never retried here.
//!
//! Access is enforced here, not in the codec: sensor fields and derived
//! fields are rejected with `ReadOnlyField` before any transport call.

use std::sync::Arc;

use chrono::Utc;
use meshgate_core::{DeviceId, EventBus, FieldValue, GatewayEvent};
use serde::Serialize;

use crate::codec::{self, EncodedWrite};
use crate::endpoint::{AttributeReport, Endpoint, EndpointAddress};
use crate::error::{GatewayError, GatewayResult};
use crate::ingest::ReportPipeline;
use crate::registry::{DeviceDirectory, SchemaRegistry};
use crate::schema::DeviceSchema;
use crate::wire::{clusters, commands};

const EVENT_SOURCE: &str = "dispatch";

/// Name reported in `CommandCompleted` for a factory reset.
pub const FACTORY_RESET: &str = "factory_reset";

/// Only read-write fields may be set.
fn settable(schema: &DeviceSchema, field: &str) -> GatewayResult<()> {
    match schema.mapping(field) {
        Some(mapping) if mapping.is_settable() => Ok(()),
        Some(_) => Err(GatewayError::ReadOnlyField(field.to_string())),
        None if schema.derived(field).is_some() => Err(GatewayError::ReadOnlyField(field.to_string())),
        None => Err(GatewayError::UnknownField(field.to_string())),
    }
}

/// Result of an acknowledged command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchOutcome {
    /// What was written.
    pub write: EncodedWrite,
    /// The written value as it now appears in device state.
    pub value: FieldValue,
    /// Whether the stored value changed.
    pub changed: bool,
}

/// Validates, encodes and issues set-commands.
#[derive(Clone)]
pub struct CommandDispatcher {
    registry: Arc<SchemaRegistry>,
    directory: Arc<DeviceDirectory>,
    pipeline: ReportPipeline,
    endpoint: Arc<dyn Endpoint>,
    events: EventBus,
}

impl CommandDispatcher {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        directory: Arc<DeviceDirectory>,
        pipeline: ReportPipeline,
        endpoint: Arc<dyn Endpoint>,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            directory,
            pipeline,
            endpoint,
            events,
        }
    }

    fn resolve(&self, device_id: &DeviceId) -> GatewayResult<(String, Arc<DeviceSchema>)> {
        let model = self.directory.model_of(device_id)?;
        let schema = self.registry.lookup(&model)?;
        Ok((model, schema))
    }

    /// Set `field` on a device from its textual form (`"45"`, `"ON"`, `"21.5"`).
    pub async fn dispatch(
        &self,
        device_id: &DeviceId,
        field: &str,
        raw_value: &str,
    ) -> GatewayResult<DispatchOutcome> {
        let (model, schema) = self.resolve(device_id)?;
        let write = settable(&schema, field).and_then(|()| codec::encode(&schema, field, raw_value));
        self.issue(device_id, &model, &schema, field, write).await
    }

    /// Set `field` on a device from an already-typed value.
    pub async fn dispatch_value(
        &self,
        device_id: &DeviceId,
        field: &str,
        value: &FieldValue,
    ) -> GatewayResult<DispatchOutcome> {
        let (model, schema) = self.resolve(device_id)?;
        let write = settable(&schema, field).and_then(|()| codec::encode_value(&schema, field, value));
        self.issue(device_id, &model, &schema, field, write).await
    }

    async fn issue(
        &self,
        device_id: &DeviceId,
        model: &str,
        schema: &DeviceSchema,
        field: &str,
        write: GatewayResult<EncodedWrite>,
    ) -> GatewayResult<DispatchOutcome> {
        let result = self.write_and_apply(device_id, model, schema, write).await;
        self.complete(device_id, field, result.as_ref().err());
        result
    }

    fn complete(&self, device_id: &DeviceId, field: &str, error: Option<&GatewayError>) {
        let error = error.map(|e| e.to_string());
        match &error {
            None => tracing::info!(device_id = %device_id, field = %field, "Command acknowledged"),
            Some(e) => tracing::warn!(device_id = %device_id, field = %field, error = %e, "Command failed"),
        }
        self.events.publish_with_source(
            GatewayEvent::CommandCompleted {
                device_id: device_id.clone(),
                field: field.to_string(),
                success: error.is_none(),
                error,
                timestamp: Utc::now(),
            },
            EVENT_SOURCE,
        );
    }

    async fn write_and_apply(
        &self,
        device_id: &DeviceId,
        model: &str,
        schema: &DeviceSchema,
        write: GatewayResult<EncodedWrite>,
    ) -> GatewayResult<DispatchOutcome> {
        let write = write?;
        let mapping = schema
            .mapping(&write.field)
            .ok_or_else(|| GatewayError::UnknownField(write.field.clone()))?;
        let value = codec::decode_value(mapping, &write.value).ok_or_else(|| {
            GatewayError::invalid_value(&write.field, write.value.to_string(), "cannot be decoded back")
        })?;

        let target = EndpointAddress::new(device_id.clone(), write.endpoint);
        self.endpoint
            .write_attribute(&target, write.cluster, write.attribute, write.value)
            .await?;

        let changed = self
            .pipeline
            .apply_optimistic(device_id, model, &write.field, value.clone());
        Ok(DispatchOutcome {
            write,
            value,
            changed,
        })
    }

    /// Reset a device to factory defaults.
    ///
    /// Sends the `genBasic` reset command to the endpoint hosting the
    /// device's basic cluster. Once acknowledged, the device's stored values
    /// are dropped: they no longer describe the device. It stays joined.
    pub async fn factory_reset(&self, device_id: &DeviceId) -> GatewayResult<()> {
        let (_, schema) = self.resolve(device_id)?;
        let target = EndpointAddress::new(device_id.clone(), schema.endpoint_for(clusters::GEN_BASIC));

        let result = self
            .endpoint
            .command(&target, clusters::GEN_BASIC, commands::RESET_FACTORY_DEFAULTS, &[])
            .await
            .map_err(GatewayError::from);
        if result.is_ok() {
            self.pipeline.store().clear(device_id);
        }
        self.complete(device_id, FACTORY_RESET, result.as_ref().err());
        result
    }

    /// Poll one field from the device and merge it like a report would.
    pub async fn refresh(&self, device_id: &DeviceId, field: &str) -> GatewayResult<FieldValue> {
        let (_, schema) = self.resolve(device_id)?;
        let mapping = schema
            .mapping(field)
            .ok_or_else(|| GatewayError::UnknownField(field.to_string()))?;

        let target = EndpointAddress::new(device_id.clone(), mapping.endpoint);
        let raw = self
            .endpoint
            .read_attribute(&target, mapping.cluster, mapping.attribute)
            .await?;
        let value = codec::decode_value(mapping, &raw).ok_or_else(|| {
            GatewayError::invalid_value(field, raw.to_string(), format!("expected {}", mapping.wire_type))
        })?;

        let report = AttributeReport::new(device_id.clone(), mapping.endpoint).with_record(
            mapping.cluster,
            mapping.attribute.0,
            raw,
        );
        self.pipeline.ingest(device_id, &report)?;
        Ok(value)
    }
}
