//! Core types shared across meshgate.
//!
//! This crate defines the value model, the gateway event vocabulary and the
//! event bus used to fan state changes out to consumers.

pub mod config;
pub mod event;
pub mod eventbus;
pub mod types;

pub use event::{ChangeSource, EventMetadata, GatewayEvent};
pub use eventbus::{
    DEFAULT_CHANNEL_CAPACITY, EventBus, EventBusReceiver, EventPredicate, FilterBuilder,
    FilteredReceiver, SharedEventBus,
};
pub use types::{DeviceId, FieldValue};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::{defaults, env_vars};
    pub use crate::event::{ChangeSource, EventMetadata, GatewayEvent};
    pub use crate::eventbus::{EventBus, SharedEventBus};
    pub use crate::types::{DeviceId, FieldValue};
}
