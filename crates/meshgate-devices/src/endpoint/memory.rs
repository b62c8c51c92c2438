//! In-process endpoint for tests, demos and report replay.
//!
//! Keeps an attribute table per (device, endpoint, cluster, attribute),
//! records every call made against it, and fans pushed reports out to
//! subscribers. Failures and latency can be injected.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{
    AttributeReport, Endpoint, EndpointAddress, ReportStream, TransportError,
};
use crate::schema::ReportingConfig;
use crate::wire::{clusters, commands, AttributeId, ClusterId, WireType, WireValue};

/// ZCL status returned for reads of attributes the device does not have.
const UNSUPPORTED_ATTRIBUTE: u8 = 0x86;

/// One call made against a [`MemoryEndpoint`].
#[derive(Debug, Clone, PartialEq)]
pub enum EndpointCall {
    Read {
        target: EndpointAddress,
        cluster: ClusterId,
        attribute: AttributeId,
    },
    Write {
        target: EndpointAddress,
        cluster: ClusterId,
        attribute: AttributeId,
        value: WireValue,
    },
    Command {
        target: EndpointAddress,
        cluster: ClusterId,
        command: u8,
        payload: Vec<u8>,
    },
    Bind {
        target: EndpointAddress,
        cluster: ClusterId,
    },
    ConfigureReporting {
        target: EndpointAddress,
        cluster: ClusterId,
        attribute: AttributeId,
        wire_type: WireType,
        config: ReportingConfig,
    },
}

type AttributeKey = (EndpointAddress, ClusterId, AttributeId);

struct Subscriber {
    clusters: Vec<ClusterId>,
    tx: mpsc::UnboundedSender<AttributeReport>,
}

/// In-memory [`Endpoint`].
#[derive(Default)]
pub struct MemoryEndpoint {
    attributes: DashMap<AttributeKey, WireValue>,
    calls: Mutex<Vec<EndpointCall>>,
    subscribers: Mutex<Vec<Subscriber>>,
    subscribe_count: AtomicUsize,
    failure: Mutex<Option<TransportError>>,
    latency: Mutex<Option<Duration>>,
}

impl MemoryEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preload an attribute value, as if the device held it.
    pub fn set_attribute(
        &self,
        target: &EndpointAddress,
        cluster: ClusterId,
        attribute: AttributeId,
        value: WireValue,
    ) {
        self.attributes
            .insert((target.clone(), cluster, attribute), value);
    }

    /// Current value the "device" holds for an attribute.
    pub fn attribute(
        &self,
        target: &EndpointAddress,
        cluster: ClusterId,
        attribute: AttributeId,
    ) -> Option<WireValue> {
        self.attributes
            .get(&(target.clone(), cluster, attribute))
            .map(|v| *v)
    }

    /// Make every following transport call fail with `error` (or succeed again with `None`).
    pub fn set_failure(&self, error: Option<TransportError>) {
        *self.failure.lock() = error;
    }

    /// Delay every following transport call.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Deliver a report to every subscriber interested in one of its clusters.
    ///
    /// Returns the number of subscribers that received it.
    pub fn push_report(&self, report: AttributeReport) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| !s.tx.is_closed());

        let mut delivered = 0;
        for subscriber in subscribers.iter() {
            let wanted = subscriber.clusters.is_empty()
                || subscriber.clusters.iter().any(|c| report.touches(*c));
            if wanted && subscriber.tx.send(report.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// End every open report stream, as a dropped link would.
    pub fn disconnect_subscribers(&self) {
        self.subscribers.lock().clear();
    }

    /// Number of times `subscribe_reports` was called.
    pub fn subscribe_count(&self) -> usize {
        self.subscribe_count.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<EndpointCall> {
        self.calls.lock().clone()
    }

    /// Number of transport calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Write calls, in order.
    pub fn writes(&self) -> Vec<(EndpointAddress, ClusterId, AttributeId, WireValue)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                EndpointCall::Write {
                    target,
                    cluster,
                    attribute,
                    value,
                } => Some((target.clone(), *cluster, *attribute, *value)),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    async fn enter(&self, call: EndpointCall) -> Result<(), TransportError> {
        self.calls.lock().push(call);
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let failure = self.failure.lock().clone();
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Endpoint for MemoryEndpoint {
    async fn read_attribute(
        &self,
        target: &EndpointAddress,
        cluster: ClusterId,
        attribute: AttributeId,
    ) -> Result<WireValue, TransportError> {
        self.enter(EndpointCall::Read {
            target: target.clone(),
            cluster,
            attribute,
        })
        .await?;
        self.attribute(target, cluster, attribute)
            .ok_or(TransportError::Rejected {
                status: UNSUPPORTED_ATTRIBUTE,
            })
    }

    async fn write_attribute(
        &self,
        target: &EndpointAddress,
        cluster: ClusterId,
        attribute: AttributeId,
        value: WireValue,
    ) -> Result<(), TransportError> {
        self.enter(EndpointCall::Write {
            target: target.clone(),
            cluster,
            attribute,
            value,
        })
        .await?;
        self.set_attribute(target, cluster, attribute, value);
        Ok(())
    }

    async fn command(
        &self,
        target: &EndpointAddress,
        cluster: ClusterId,
        command: u8,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        self.enter(EndpointCall::Command {
            target: target.clone(),
            cluster,
            command,
            payload: payload.to_vec(),
        })
        .await?;
        if cluster == clusters::GEN_BASIC && command == commands::RESET_FACTORY_DEFAULTS {
            // Every endpoint of the device forgets what it was told.
            self.attributes
                .retain(|(address, _, _), _| address.device_id != target.device_id);
        }
        Ok(())
    }

    async fn bind(&self, target: &EndpointAddress, cluster: ClusterId) -> Result<(), TransportError> {
        self.enter(EndpointCall::Bind {
            target: target.clone(),
            cluster,
        })
        .await
    }

    async fn configure_reporting(
        &self,
        target: &EndpointAddress,
        cluster: ClusterId,
        attribute: AttributeId,
        wire_type: WireType,
        config: &ReportingConfig,
    ) -> Result<(), TransportError> {
        self.enter(EndpointCall::ConfigureReporting {
            target: target.clone(),
            cluster,
            attribute,
            wire_type,
            config: *config,
        })
        .await
    }

    fn subscribe_reports(&self, clusters: &[ClusterId]) -> ReportStream {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(Subscriber {
            clusters: clusters.to_vec(),
            tx,
        });
        self.subscribe_count.fetch_add(1, Ordering::SeqCst);

        Box::pin(async_stream::stream! {
            while let Some(report) = rx.recv().await {
                yield report;
            }
        })
    }
}
