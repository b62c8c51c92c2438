//! Schema registry and device directory.
//!
//! The [`SchemaRegistry`] maps model identifiers to device schemas. It is
//! populated once at startup and then shared read-only behind an `Arc`, so
//! lookups on the ingest and dispatch paths never take a lock.
//!
//! The [`DeviceDirectory`] tracks which joined device runs which model.
//!
//! ```rust
//! use meshgate_devices::SchemaRegistry;
//!
//! let registry = SchemaRegistry::with_builtin_models().unwrap();
//! assert!(registry.lookup("EFEKTA_eFlora_Pro").is_ok());
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use meshgate_core::DeviceId;

use crate::builtin_models;
use crate::error::{GatewayError, GatewayResult};
use crate::schema::{DeviceSchema, SchemaFile};

/// Model identifier -> schema.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<DeviceSchema>>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in device model.
    pub fn with_builtin_models() -> GatewayResult<Self> {
        let mut registry = Self::new();
        for schema in builtin_models::builtin_schemas()? {
            registry.register(schema)?;
        }
        Ok(registry)
    }

    /// Registry holding every model of a schema file.
    pub fn from_schema_file(file: SchemaFile) -> GatewayResult<Self> {
        let mut registry = Self::new();
        registry.extend(file)?;
        Ok(registry)
    }

    /// Load a schema file from disk and add its models.
    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> GatewayResult<usize> {
        self.extend(SchemaFile::load(path)?)
    }

    /// Add every model of a schema file, failing on the first duplicate.
    pub fn extend(&mut self, file: SchemaFile) -> GatewayResult<usize> {
        let count = file.models.len();
        for schema in file.models {
            self.register(schema)?;
        }
        Ok(count)
    }

    /// Register a schema. Model identifiers are unique.
    pub fn register(&mut self, schema: DeviceSchema) -> GatewayResult<()> {
        let model = schema.model().to_string();
        if self.schemas.contains_key(&model) {
            return Err(GatewayError::DuplicateModel(model));
        }
        tracing::debug!(model = %model, fields = schema.fields().len(), "Registered device schema");
        self.schemas.insert(model, Arc::new(schema));
        Ok(())
    }

    /// Schema for a model.
    pub fn lookup(&self, model: &str) -> GatewayResult<Arc<DeviceSchema>> {
        self.schemas
            .get(model)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownModel(model.to_string()))
    }

    pub fn contains(&self, model: &str) -> bool {
        self.schemas.contains_key(model)
    }

    /// Registered model identifiers, sorted.
    pub fn models(&self) -> Vec<String> {
        let mut models: Vec<String> = self.schemas.keys().cloned().collect();
        models.sort();
        models
    }

    pub fn schemas(&self) -> impl Iterator<Item = &Arc<DeviceSchema>> {
        self.schemas.values()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

/// Joined devices and the model each one runs.
#[derive(Debug, Default)]
pub struct DeviceDirectory {
    devices: DashMap<DeviceId, String>,
}

impl DeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a device's model. Returns the previous model if the device re-joined.
    pub fn assign(&self, device_id: DeviceId, model: impl Into<String>) -> Option<String> {
        self.devices.insert(device_id, model.into())
    }

    pub fn remove(&self, device_id: &DeviceId) -> Option<String> {
        self.devices.remove(device_id).map(|(_, model)| model)
    }

    /// Model of a joined device.
    pub fn model_of(&self, device_id: &DeviceId) -> GatewayResult<String> {
        self.devices
            .get(device_id)
            .map(|model| model.clone())
            .ok_or_else(|| GatewayError::UnknownModel(format!("{} (device not joined)", device_id)))
    }

    pub fn contains(&self, device_id: &DeviceId) -> bool {
        self.devices.contains_key(device_id)
    }

    /// Joined device identifiers, sorted.
    pub fn devices(&self) -> Vec<DeviceId> {
        let mut devices: Vec<DeviceId> = self.devices.iter().map(|e| e.key().clone()).collect();
        devices.sort();
        devices
    }

    /// Devices running a given model, sorted.
    pub fn devices_of_model(&self, model: &str) -> Vec<DeviceId> {
        let mut devices: Vec<DeviceId> = self
            .devices
            .iter()
            .filter(|e| e.value() == model)
            .map(|e| e.key().clone())
            .collect();
        devices.sort();
        devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
