//! Mesh-sensor device layer.
//!
//! Translates between the compact wire attribute protocol spoken by
//! battery-powered mesh sensors and a normalized, named field state.
//!
//! ## Architecture
//!
//! - **SchemaRegistry**: per-model attribute mappings, read-only after startup
//! - **codec**: decode reports into fields, validate and encode set-commands
//! - **ReportPipeline**: merges decoded reports into per-device state
//! - **CommandDispatcher**: validated writes with optimistic state update
//! - **ClockSync**: pushes local time to devices that report on their time cluster
//! - **Configurator**: bindings and reporting configuration at join time
//! - **Gateway**: wires all of the above to an [`Endpoint`]
//!
//! Device models are data, not code: see [`schema`] for the definition format.

pub mod binding;
pub mod builtin_models;
pub mod clock;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod ingest;
pub mod registry;
pub mod schema;
pub mod service;
pub mod state;
pub mod wire;

pub use binding::{BindingTable, Commissioning, Configurator};
pub use clock::{ClockPhase, ClockSync, FixedClock, SystemClock, TimeSource};
pub use codec::{decode, encode, encode_value, EncodedWrite};
pub use config::GatewayConfig;
pub use dispatch::{CommandDispatcher, DispatchOutcome};
pub use endpoint::{
    AttributeRecord, AttributeReport, Endpoint, EndpointAddress, EndpointCall, MemoryEndpoint,
    ReportStream, TransportError,
};
pub use error::{GatewayError, GatewayResult};
pub use ingest::{ReportPipeline, ResolvedDevice};
pub use registry::{DeviceDirectory, SchemaRegistry};
pub use schema::{
    Access, AttributeMapping, Bounds, ClockSyncConfig, Derivation, DerivedField, DeviceSchema,
    ReportingConfig, SchemaDefinition, SchemaFile,
};
pub use service::Gateway;
pub use state::{DeviceState, StateStore};
pub use wire::{clusters, commands, AttributeId, ClusterId, WireType, WireValue};

pub use meshgate_core::{DeviceId, FieldValue};
