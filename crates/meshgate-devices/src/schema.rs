//! Device schemas - declarative attribute mappings per device model.
//!
//! A schema lists, for one device model, every field the gateway knows
//! about: where it lives on the wire (endpoint, cluster, attribute, type),
//! whether it can be set, and the bounds a set-command must respect.
//! Adding a device model means adding a schema, never code.
//!
//! Schemas are usually loaded from a JSON file at startup:
//!
//! ```json
//! {
//!   "models": [{
//!     "model": "EFEKTA_eFlora_Pro",
//!     "fields": [
//!       { "field": "report_delay", "cluster": "genPowerCfg", "attribute": "0x0201",
//!         "wire_type": "uint16", "access": "read_write", "bounds": { "min": 1, "max": 360 } }
//!     ],
//!     "bindings": [{ "endpoint": 1, "clusters": ["genPowerCfg", "genTime"] }],
//!     "clock_sync": { "endpoint": 1 }
//!   }]
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use meshgate_core::config::defaults;
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};
use crate::wire::{clusters, AttributeId, ClusterId, WireType};

fn default_endpoint() -> u8 {
    defaults::ENDPOINT
}

/// Read/write direction of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// Sensor field, only ever reported by the device.
    #[default]
    Read,
    /// Control field, reported and settable.
    ReadWrite,
}

/// Inclusive bounds on the application-level value of a field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Reporting interval configuration issued at commissioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportingConfig {
    /// Minimum seconds between reports.
    pub min_interval: u16,
    /// Maximum seconds between reports.
    pub max_interval: u16,
    /// Raw change that triggers a report before `max_interval`.
    #[serde(default)]
    pub reportable_change: u32,
}

/// How a derived field is computed from the raw value of its attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Derivation {
    /// Lux from a logarithmic illuminance reading, `10^((raw - 1) / 10000)`.
    /// A raw zero means too dark to measure and yields zero.
    LogLux,
    /// True when any bit of `mask` is set.
    AnyBit { mask: u32 },
}

/// Read-only field computed from another field's raw value in the same record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedField {
    pub field: String,
    #[serde(flatten)]
    pub derivation: Derivation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Association of a wire attribute with a named field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeMapping {
    /// Field name in the normalized device state.
    pub field: String,
    /// Endpoint hosting the cluster on the device.
    #[serde(default = "default_endpoint")]
    pub endpoint: u8,
    pub cluster: ClusterId,
    pub attribute: AttributeId,
    pub wire_type: WireType,
    #[serde(default)]
    pub access: Access,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
    /// Symbolic labels accepted on set (e.g. `OFF` -> 0, `ON` -> 1).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, i64>,
    /// Raw value = application value x scale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporting: Option<ReportingConfig>,
    /// Extra fields computed from the same raw value.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub derived: Vec<DerivedField>,
}

impl AttributeMapping {
    /// Create a read-only mapping on the default endpoint.
    pub fn new(
        field: impl Into<String>,
        cluster: ClusterId,
        attribute: u16,
        wire_type: WireType,
    ) -> Self {
        Self {
            field: field.into(),
            endpoint: defaults::ENDPOINT,
            cluster,
            attribute: AttributeId(attribute),
            wire_type,
            access: Access::Read,
            bounds: None,
            labels: BTreeMap::new(),
            scale: None,
            unit: None,
            description: String::new(),
            reporting: None,
            derived: Vec::new(),
        }
    }

    pub fn on_endpoint(mut self, endpoint: u8) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn settable(mut self) -> Self {
        self.access = Access::ReadWrite;
        self
    }

    pub fn with_bounds(mut self, min: f64, max: f64) -> Self {
        self.bounds = Some(Bounds::new(min, max));
        self
    }

    pub fn with_label(mut self, label: impl Into<String>, raw: i64) -> Self {
        self.labels.insert(label.into(), raw);
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_reporting(mut self, reporting: ReportingConfig) -> Self {
        self.reporting = Some(reporting);
        self
    }

    pub fn with_derived(mut self, field: impl Into<String>, derivation: Derivation) -> Self {
        self.derived.push(DerivedField {
            field: field.into(),
            derivation,
            unit: None,
            description: String::new(),
        });
        self
    }

    pub fn is_settable(&self) -> bool {
        self.access == Access::ReadWrite
    }

    /// Label whose raw value is `raw`, if any.
    pub fn label_for(&self, raw: i64) -> Option<&str> {
        self.labels
            .iter()
            .find(|(_, v)| **v == raw)
            .map(|(k, _)| k.as_str())
    }

    /// Raw integer for an application value, rounding after scaling.
    pub(crate) fn to_raw(&self, value: f64) -> f64 {
        match self.scale {
            Some(scale) => (value * scale).round(),
            None => value.round(),
        }
    }
}

/// Cluster bindings to establish on one endpoint at join time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: u8,
    pub clusters: Vec<ClusterId>,
}

fn default_time_cluster() -> ClusterId {
    clusters::GEN_TIME
}

/// Where the device keeps the clock the gateway pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockSyncConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: u8,
    /// Reports on this cluster trigger a sync; writes go to it too.
    #[serde(default = "default_time_cluster")]
    pub cluster: ClusterId,
    #[serde(default)]
    pub attribute: u16,
}

impl Default for ClockSyncConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::ENDPOINT,
            cluster: clusters::GEN_TIME,
            attribute: 0x0000,
        }
    }
}

/// Plain, unvalidated form of a device schema, as written in definition files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub model: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub description: String,
    pub fields: Vec<AttributeMapping>,
    #[serde(default)]
    pub bindings: Vec<BindingConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock_sync: Option<ClockSyncConfig>,
}

impl SchemaDefinition {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            vendor: String::new(),
            description: String::new(),
            fields: Vec::new(),
            bindings: Vec::new(),
            clock_sync: None,
        }
    }

    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = vendor.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_field(mut self, mapping: AttributeMapping) -> Self {
        self.fields.push(mapping);
        self
    }

    pub fn with_binding(mut self, endpoint: u8, clusters: Vec<ClusterId>) -> Self {
        self.bindings.push(BindingConfig { endpoint, clusters });
        self
    }

    pub fn with_clock_sync(mut self, clock_sync: ClockSyncConfig) -> Self {
        self.clock_sync = Some(clock_sync);
        self
    }

    /// Validate and index the definition.
    pub fn build(self) -> GatewayResult<DeviceSchema> {
        DeviceSchema::try_from(self)
    }
}

/// Validated, indexed device schema. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "SchemaDefinition", into = "SchemaDefinition")]
pub struct DeviceSchema {
    definition: SchemaDefinition,
    by_address: HashMap<(ClusterId, AttributeId), usize>,
    by_field: HashMap<String, usize>,
    /// Derived field name -> (mapping index, derived index).
    derived: HashMap<String, (usize, usize)>,
}

impl TryFrom<SchemaDefinition> for DeviceSchema {
    type Error = GatewayError;

    fn try_from(definition: SchemaDefinition) -> Result<Self, Self::Error> {
        let model = definition.model.trim();
        if model.is_empty() {
            return Err(GatewayError::InvalidSchema("model name is empty".into()));
        }

        let mut by_address = HashMap::with_capacity(definition.fields.len());
        let mut by_field = HashMap::with_capacity(definition.fields.len());

        for (index, mapping) in definition.fields.iter().enumerate() {
            validate_mapping(model, mapping)?;

            if by_field.insert(mapping.field.clone(), index).is_some() {
                return Err(GatewayError::InvalidSchema(format!(
                    "{}: field '{}' is declared twice",
                    model, mapping.field
                )));
            }
            if let Some(previous) = by_address.insert((mapping.cluster, mapping.attribute), index)
            {
                return Err(GatewayError::InvalidSchema(format!(
                    "{}: {}/{} is mapped by both '{}' and '{}'",
                    model,
                    mapping.cluster,
                    mapping.attribute,
                    definition.fields[previous].field,
                    mapping.field
                )));
            }
        }

        let mut derived = HashMap::new();
        for (index, mapping) in definition.fields.iter().enumerate() {
            for (slot, field) in mapping.derived.iter().enumerate() {
                if field.field.trim().is_empty() {
                    return Err(GatewayError::InvalidSchema(format!(
                        "{}: field '{}' has an unnamed derived field",
                        model, mapping.field
                    )));
                }
                if by_field.contains_key(&field.field)
                    || derived.insert(field.field.clone(), (index, slot)).is_some()
                {
                    return Err(GatewayError::InvalidSchema(format!(
                        "{}: field '{}' is declared twice",
                        model, field.field
                    )));
                }
            }
        }

        Ok(Self {
            definition,
            by_address,
            by_field,
            derived,
        })
    }
}

fn validate_mapping(model: &str, mapping: &AttributeMapping) -> GatewayResult<()> {
    let invalid = |reason: String| {
        Err(GatewayError::InvalidSchema(format!(
            "{}: field '{}' {}",
            model, mapping.field, reason
        )))
    };

    if mapping.field.trim().is_empty() {
        return Err(GatewayError::InvalidSchema(format!(
            "{}: field at {}/{} has no name",
            model, mapping.cluster, mapping.attribute
        )));
    }
    if let Some(scale) = mapping.scale {
        if !scale.is_finite() || scale <= 0.0 {
            return invalid(format!("has invalid scale {}", scale));
        }
    }
    if let Some(bounds) = mapping.bounds {
        if !bounds.min.is_finite() || !bounds.max.is_finite() || bounds.min > bounds.max {
            return invalid(format!("has invalid bounds [{}, {}]", bounds.min, bounds.max));
        }
        if mapping.is_settable() {
            for edge in [bounds.min, bounds.max] {
                let raw = mapping.to_raw(edge);
                if !mapping.wire_type.fits(raw as i64) {
                    return invalid(format!(
                        "bound {} does not fit wire type {}",
                        edge, mapping.wire_type
                    ));
                }
            }
        }
    }
    for (label, raw) in &mapping.labels {
        if !mapping.wire_type.fits(*raw) {
            return invalid(format!(
                "label '{}' = {} does not fit wire type {}",
                label, raw, mapping.wire_type
            ));
        }
    }
    Ok(())
}

impl From<DeviceSchema> for SchemaDefinition {
    fn from(schema: DeviceSchema) -> Self {
        schema.definition
    }
}

impl DeviceSchema {
    pub fn model(&self) -> &str {
        &self.definition.model
    }

    pub fn vendor(&self) -> &str {
        &self.definition.vendor
    }

    pub fn description(&self) -> &str {
        &self.definition.description
    }

    pub fn definition(&self) -> &SchemaDefinition {
        &self.definition
    }

    pub fn fields(&self) -> &[AttributeMapping] {
        &self.definition.fields
    }

    /// Mapping for a field name.
    pub fn mapping(&self, field: &str) -> Option<&AttributeMapping> {
        self.by_field
            .get(field)
            .map(|&index| &self.definition.fields[index])
    }

    /// Derived field by name, with the mapping it is computed from.
    pub fn derived(&self, field: &str) -> Option<(&AttributeMapping, &DerivedField)> {
        self.derived.get(field).map(|&(index, slot)| {
            let mapping = &self.definition.fields[index];
            (mapping, &mapping.derived[slot])
        })
    }

    /// Mapping for a wire address.
    pub fn mapping_for(&self, cluster: ClusterId, attribute: AttributeId) -> Option<&AttributeMapping> {
        self.by_address
            .get(&(cluster, attribute))
            .map(|&index| &self.definition.fields[index])
    }

    /// Read-only sensor fields.
    pub fn sensors(&self) -> impl Iterator<Item = &AttributeMapping> {
        self.fields().iter().filter(|m| !m.is_settable())
    }

    /// Settable control fields.
    pub fn controls(&self) -> impl Iterator<Item = &AttributeMapping> {
        self.fields().iter().filter(|m| m.is_settable())
    }

    /// Endpoint the device hosts `cluster` on: from its mapped fields, then
    /// its bindings, else the default endpoint.
    pub fn endpoint_for(&self, cluster: ClusterId) -> u8 {
        self.fields()
            .iter()
            .find(|m| m.cluster == cluster)
            .map(|m| m.endpoint)
            .or_else(|| {
                self.bindings()
                    .iter()
                    .find(|b| b.clusters.contains(&cluster))
                    .map(|b| b.endpoint)
            })
            .unwrap_or(defaults::ENDPOINT)
    }

    pub fn bindings(&self) -> &[BindingConfig] {
        &self.definition.bindings
    }

    pub fn clock_sync(&self) -> Option<&ClockSyncConfig> {
        self.definition.clock_sync.as_ref()
    }

    /// Every cluster this model reports on: bound clusters plus mapped ones.
    pub fn report_clusters(&self) -> BTreeSet<ClusterId> {
        let mut clusters: BTreeSet<ClusterId> = self
            .bindings()
            .iter()
            .flat_map(|b| b.clusters.iter().copied())
            .collect();
        clusters.extend(self.fields().iter().map(|m| m.cluster));
        if let Some(clock) = self.clock_sync() {
            clusters.insert(clock.cluster);
        }
        clusters
    }
}

/// Schema definition file: the device models a gateway instance serves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaFile {
    pub models: Vec<DeviceSchema>,
}

impl SchemaFile {
    pub fn from_json(json: &str) -> GatewayResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let file = Self::from_json(&contents)?;
        tracing::info!(
            path = %path.display(),
            models = file.models.len(),
            "Loaded schema file"
        );
        Ok(file)
    }

    pub fn to_json_pretty(&self) -> GatewayResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
