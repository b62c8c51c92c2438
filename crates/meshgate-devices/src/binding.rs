//! Commissioning: bindings and reporting configuration at join time.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use meshgate_core::DeviceId;
use serde::Serialize;

use crate::endpoint::{Endpoint, EndpointAddress};
use crate::error::GatewayResult;
use crate::schema::DeviceSchema;
use crate::wire::ClusterId;

/// Bindings established per device, as a set of (endpoint, cluster).
#[derive(Debug, Default)]
pub struct BindingTable {
    bindings: DashMap<DeviceId, BTreeSet<(u8, ClusterId)>>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a binding. Returns `false` if it was already recorded.
    pub fn record(&self, device_id: &DeviceId, endpoint: u8, cluster: ClusterId) -> bool {
        self.bindings
            .entry(device_id.clone())
            .or_default()
            .insert((endpoint, cluster))
    }

    pub fn bindings(&self, device_id: &DeviceId) -> Vec<(u8, ClusterId)> {
        self.bindings
            .get(device_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_bound(&self, device_id: &DeviceId, endpoint: u8, cluster: ClusterId) -> bool {
        self.bindings
            .get(device_id)
            .is_some_and(|set| set.contains(&(endpoint, cluster)))
    }

    pub fn forget(&self, device_id: &DeviceId) {
        self.bindings.remove(device_id);
    }
}

/// Summary of one commissioning run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Commissioning {
    /// Bind calls issued.
    pub bound: usize,
    /// Bindings not previously recorded.
    pub new_bindings: usize,
    /// Reporting configurations issued.
    pub reporting: usize,
}

/// Issues the binding and reporting configuration a schema declares.
#[derive(Clone)]
pub struct Configurator {
    endpoint: Arc<dyn Endpoint>,
    table: Arc<BindingTable>,
}

impl Configurator {
    pub fn new(endpoint: Arc<dyn Endpoint>) -> Self {
        Self {
            endpoint,
            table: Arc::new(BindingTable::new()),
        }
    }

    pub fn table(&self) -> &Arc<BindingTable> {
        &self.table
    }

    /// Configure a device for its schema.
    ///
    /// Safe to re-run: every binding is re-issued so a re-paired device
    /// gets them back, but the table never holds duplicates. The first
    /// transport failure aborts the run.
    pub async fn configure(
        &self,
        device_id: &DeviceId,
        schema: &DeviceSchema,
    ) -> GatewayResult<Commissioning> {
        let mut summary = Commissioning::default();

        let wanted: BTreeSet<(u8, ClusterId)> = schema
            .bindings()
            .iter()
            .flat_map(|b| b.clusters.iter().map(move |c| (b.endpoint, *c)))
            .collect();

        for (endpoint, cluster) in wanted {
            let target = EndpointAddress::new(device_id.clone(), endpoint);
            self.endpoint.bind(&target, cluster).await?;
            summary.bound += 1;
            if self.table.record(device_id, endpoint, cluster) {
                summary.new_bindings += 1;
            }
        }

        for mapping in schema.fields() {
            let Some(reporting) = &mapping.reporting else {
                continue;
            };
            let target = EndpointAddress::new(device_id.clone(), mapping.endpoint);
            self.endpoint
                .configure_reporting(
                    &target,
                    mapping.cluster,
                    mapping.attribute,
                    mapping.wire_type,
                    reporting,
                )
                .await?;
            summary.reporting += 1;
        }

        tracing::info!(
            device_id = %device_id,
            model = %schema.model(),
            bound = summary.bound,
            new_bindings = summary.new_bindings,
            reporting = summary.reporting,
            "Device commissioned"
        );
        Ok(summary)
    }
}
