//! Normalized per-device state.
//!
//! Each device's state sits behind its own lock. Reports and optimistic
//! command updates for one device merge one at a time; different devices
//! never contend. Locks are only held for the merge itself, never across
//! a transport call.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use meshgate_core::{DeviceId, FieldValue};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Last known value of every field of one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub device_id: DeviceId,
    pub model: String,
    pub fields: BTreeMap<String, FieldValue>,
    /// When the device last reported or acknowledged any value, changed or not.
    pub last_updated: Option<DateTime<Utc>>,
}

impl DeviceState {
    pub fn new(device_id: DeviceId, model: impl Into<String>) -> Self {
        Self {
            device_id,
            model: model.into(),
            fields: BTreeMap::new(),
            last_updated: None,
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Merge values into the state, returning the fields whose value changed.
    ///
    /// Fields not present in `values` are left untouched. Any non-empty
    /// merge refreshes `last_updated`, even when nothing changed; it never
    /// moves backwards.
    pub fn merge(
        &mut self,
        values: BTreeMap<String, FieldValue>,
        at: DateTime<Utc>,
    ) -> Vec<(String, FieldValue)> {
        if values.is_empty() {
            return Vec::new();
        }
        self.last_updated = Some(self.last_updated.map_or(at, |last| last.max(at)));

        let mut changed = Vec::new();
        for (field, value) in values {
            if self.fields.get(&field) == Some(&value) {
                continue;
            }
            self.fields.insert(field.clone(), value.clone());
            changed.push((field, value));
        }
        changed
    }
}

/// Device id -> independently locked state.
#[derive(Debug, Default)]
pub struct StateStore {
    devices: DashMap<DeviceId, Arc<Mutex<DeviceState>>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty state for a device, or reset it if the model changed.
    pub fn ensure(&self, device_id: &DeviceId, model: &str) {
        let entry = self.slot(device_id, model);
        let mut state = entry.lock();
        if state.model != model {
            *state = DeviceState::new(device_id.clone(), model);
        }
    }

    fn slot(&self, device_id: &DeviceId, model: &str) -> Arc<Mutex<DeviceState>> {
        self.devices
            .entry(device_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(DeviceState::new(device_id.clone(), model))))
            .clone()
    }

    /// Drop every stored value of a device, keeping it known.
    pub fn clear(&self, device_id: &DeviceId) {
        if let Some(slot) = self.devices.get(device_id).map(|entry| entry.clone()) {
            let mut state = slot.lock();
            let model = std::mem::take(&mut state.model);
            *state = DeviceState::new(device_id.clone(), model);
        }
    }

    /// Merge values into one device's state under its lock.
    pub fn merge(
        &self,
        device_id: &DeviceId,
        model: &str,
        values: BTreeMap<String, FieldValue>,
        at: DateTime<Utc>,
    ) -> Vec<(String, FieldValue)> {
        if values.is_empty() {
            return Vec::new();
        }
        // Clone the Arc out so the shard lock is released before merging.
        let slot = self.slot(device_id, model);
        let changed = slot.lock().merge(values, at);
        changed
    }

    /// Consistent copy of one device's state.
    pub fn snapshot(&self, device_id: &DeviceId) -> Option<DeviceState> {
        let slot = self.devices.get(device_id)?.clone();
        let state = slot.lock().clone();
        Some(state)
    }

    pub fn remove(&self, device_id: &DeviceId) -> Option<DeviceState> {
        let (_, slot) = self.devices.remove(device_id)?;
        let state = slot.lock().clone();
        Some(state)
    }

    pub fn devices(&self) -> Vec<DeviceId> {
        let mut devices: Vec<DeviceId> = self.devices.iter().map(|e| e.key().clone()).collect();
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

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, i64)]) -> BTreeMap<String, FieldValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), FieldValue::Integer(*v)))
            .collect()
    }

    #[test]
    fn test_merge_reports_changes_only() {
        let mut state = DeviceState::new(DeviceId::from("dev1"), "m");
        let now = Utc::now();

        let changed = state.merge(values(&[("a", 1), ("b", 2)]), now);
        assert_eq!(changed.len(), 2);

        let changed = state.merge(values(&[("a", 1), ("b", 3)]), now);
        assert_eq!(changed, vec![("b".to_string(), FieldValue::Integer(3))]);

        assert!(state.merge(values(&[("a", 1)]), now).is_empty());
        assert_eq!(state.get("b"), Some(&FieldValue::Integer(3)));
    }

    #[test]
    fn test_unchanged_merge_refreshes_last_updated() {
        let mut state = DeviceState::new(DeviceId::from("dev1"), "m");
        let first = Utc::now();
        let later = first + chrono::Duration::seconds(30);

        state.merge(values(&[("a", 1)]), first);
        assert_eq!(state.last_updated, Some(first));

        assert!(state.merge(values(&[("a", 1)]), later).is_empty());
        assert_eq!(state.last_updated, Some(later));

        // An empty merge is not a sign of life, and a late report never rewinds.
        state.merge(BTreeMap::new(), later + chrono::Duration::seconds(30));
        state.merge(values(&[("a", 1)]), first);
        assert_eq!(state.last_updated, Some(later));
    }

    #[test]
    fn test_store_snapshot_and_reset() {
        let store = StateStore::new();
        let dev = DeviceId::from("dev1");
        assert!(store.snapshot(&dev).is_none());

        store.ensure(&dev, "m");
        assert!(store.snapshot(&dev).unwrap().fields.is_empty());

        store.merge(&dev, "m", values(&[("a", 1)]), Utc::now());
        store.ensure(&dev, "m");
        assert_eq!(store.snapshot(&dev).unwrap().fields.len(), 1);

        // Re-joining as another model starts from scratch.
        store.ensure(&dev, "other");
        let snapshot = store.snapshot(&dev).unwrap();
        assert_eq!(snapshot.model, "other");
        assert!(snapshot.fields.is_empty());
    }
}
