//! Gateway events.
//!
//! Every observable effect of the device layer is published as a
//! [`GatewayEvent`]. Consumers subscribe through the [`crate::EventBus`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{DeviceId, FieldValue};

/// What caused a field of a device state to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeSource {
    /// An attribute report (or read response) from the device.
    Report,
    /// A write acknowledged by the device, applied optimistically.
    Command,
}

/// Events published by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayEvent {
    /// One field of a device's normalized state took a new value.
    StateChanged {
        device_id: DeviceId,
        field: String,
        value: FieldValue,
        source: ChangeSource,
        timestamp: DateTime<Utc>,
    },

    /// A device was commissioned under a model.
    DeviceJoined {
        device_id: DeviceId,
        model: String,
        timestamp: DateTime<Utc>,
    },

    /// A set-command finished, successfully or not.
    CommandCompleted {
        device_id: DeviceId,
        field: String,
        success: bool,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A clock synchronization attempt finished.
    ClockSynced {
        device_id: DeviceId,
        device_time: u32,
        success: bool,
        timestamp: DateTime<Utc>,
    },
}

impl GatewayEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "StateChanged",
            Self::DeviceJoined { .. } => "DeviceJoined",
            Self::CommandCompleted { .. } => "CommandCompleted",
            Self::ClockSynced { .. } => "ClockSynced",
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        match self {
            Self::StateChanged { device_id, .. }
            | Self::DeviceJoined { device_id, .. }
            | Self::CommandCompleted { device_id, .. }
            | Self::ClockSynced { device_id, .. } => device_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::StateChanged { timestamp, .. }
            | Self::DeviceJoined { timestamp, .. }
            | Self::CommandCompleted { timestamp, .. }
            | Self::ClockSynced { timestamp, .. } => *timestamp,
        }
    }

    pub fn is_state_event(&self) -> bool {
        matches!(self, Self::StateChanged { .. })
    }

    pub fn is_lifecycle_event(&self) -> bool {
        matches!(self, Self::DeviceJoined { .. } | Self::ClockSynced { .. })
    }

    pub fn is_command_event(&self) -> bool {
        matches!(self, Self::CommandCompleted { .. })
    }
}

/// Metadata attached to every published event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub event_id: Uuid,
    /// Component that published the event (e.g. `ingest`, `dispatch`).
    pub source: String,
    pub published_at: DateTime<Utc>,
}

impl EventMetadata {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            source: source.into(),
            published_at: Utc::now(),
        }
    }
}
