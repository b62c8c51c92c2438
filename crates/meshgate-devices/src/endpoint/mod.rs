//! Endpoint capability - the seam to the mesh radio stack.
//!
//! The gateway never talks to the radio directly. It consumes an
//! [`Endpoint`] implementation that can read and write attributes, send
//! cluster commands, create bindings, configure reporting and deliver
//! inbound attribute reports.
//! Addressing, retries, encryption and session handling all live behind it.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use meshgate_core::config::defaults;
use meshgate_core::DeviceId;
use serde::{Deserialize, Serialize};

use crate::schema::ReportingConfig;
use crate::wire::{AttributeId, ClusterId, WireType, WireValue};

pub mod memory;

pub use memory::{EndpointCall, MemoryEndpoint};

/// Link or radio failure reported by the endpoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    #[error("Device unreachable: {0}")]
    Unreachable(DeviceId),

    /// The device answered with a non-success cluster-library status.
    #[error("Rejected by device with status 0x{status:02x}")]
    Rejected { status: u8 },

    #[error("Transport disconnected")]
    Disconnected,

    #[error("Transport error: {0}")]
    Other(String),
}

/// One addressable endpoint on one device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointAddress {
    pub device_id: DeviceId,
    pub endpoint: u8,
}

impl EndpointAddress {
    pub fn new(device_id: impl Into<DeviceId>, endpoint: u8) -> Self {
        Self {
            device_id: device_id.into(),
            endpoint,
        }
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device_id, self.endpoint)
    }
}

/// One (cluster, attribute, raw value) triple of a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeRecord {
    pub cluster: ClusterId,
    pub attribute: AttributeId,
    pub value: WireValue,
}

fn default_endpoint() -> u8 {
    defaults::ENDPOINT
}

/// Attribute values delivered by one device at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeReport {
    pub device_id: DeviceId,
    #[serde(default = "default_endpoint")]
    pub endpoint: u8,
    pub records: Vec<AttributeRecord>,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl AttributeReport {
    pub fn new(device_id: impl Into<DeviceId>, endpoint: u8) -> Self {
        Self {
            device_id: device_id.into(),
            endpoint,
            records: Vec::new(),
            received_at: Utc::now(),
        }
    }

    pub fn with_record(mut self, cluster: ClusterId, attribute: u16, value: WireValue) -> Self {
        self.records.push(AttributeRecord {
            cluster,
            attribute: AttributeId(attribute),
            value,
        });
        self
    }

    /// Whether any record belongs to `cluster`.
    pub fn touches(&self, cluster: ClusterId) -> bool {
        self.records.iter().any(|r| r.cluster == cluster)
    }
}

/// Push-based stream of inbound reports.
pub type ReportStream = Pin<Box<dyn Stream<Item = AttributeReport> + Send>>;

/// Capability the gateway consumes from the mesh stack.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Poll one attribute.
    async fn read_attribute(
        &self,
        target: &EndpointAddress,
        cluster: ClusterId,
        attribute: AttributeId,
    ) -> Result<WireValue, TransportError>;

    /// Write one attribute; `Ok` means the device acknowledged it.
    async fn write_attribute(
        &self,
        target: &EndpointAddress,
        cluster: ClusterId,
        attribute: AttributeId,
        value: WireValue,
    ) -> Result<(), TransportError>;

    /// Send a cluster-specific command; `Ok` means the device acknowledged it.
    async fn command(
        &self,
        target: &EndpointAddress,
        cluster: ClusterId,
        command: u8,
        payload: &[u8],
    ) -> Result<(), TransportError>;

    /// Route the device's reports on `cluster` to the gateway.
    async fn bind(&self, target: &EndpointAddress, cluster: ClusterId) -> Result<(), TransportError>;

    /// Set the reporting interval for one attribute.
    async fn configure_reporting(
        &self,
        target: &EndpointAddress,
        cluster: ClusterId,
        attribute: AttributeId,
        wire_type: WireType,
        config: &ReportingConfig,
    ) -> Result<(), TransportError>;

    /// Stream of reports on the given clusters (all clusters when empty).
    ///
    /// Under normal operation the stream never ends; it ends when the
    /// transport drops and can be re-opened by calling this again.
    fn subscribe_reports(&self, clusters: &[ClusterId]) -> ReportStream;
}
