//! Gateway runtime configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use meshgate_core::config::{self as core_config, defaults};
use serde::{Deserialize, Serialize};

use crate::clock::{FixedClock, SystemClock, TimeSource};

/// Tunables of a [`Gateway`](crate::Gateway).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Subscriber backlog at which the event bus warns.
    pub event_capacity: usize,
    /// Upper bound on one clock-sync write.
    pub clock_write_timeout_ms: u64,
    /// Pause before re-opening an ended report stream.
    pub resubscribe_delay_ms: u64,
    /// UTC offset pushed to devices; the host time zone when unset.
    pub utc_offset_secs: Option<i32>,
    /// Schema file loaded in addition to the built-in models.
    pub schema_path: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            event_capacity: defaults::EVENT_CAPACITY,
            clock_write_timeout_ms: defaults::CLOCK_WRITE_TIMEOUT_MS,
            resubscribe_delay_ms: defaults::RESUBSCRIBE_DELAY_MS,
            utc_offset_secs: None,
            schema_path: None,
        }
    }
}

impl GatewayConfig {
    /// Defaults overridden by `MESHGATE_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            event_capacity: core_config::event_capacity(),
            clock_write_timeout_ms: core_config::clock_write_timeout_ms(),
            resubscribe_delay_ms: core_config::resubscribe_delay_ms(),
            utc_offset_secs: core_config::utc_offset_secs(),
            schema_path: core_config::schema_path(),
        }
    }

    pub fn with_utc_offset(mut self, offset_secs: i32) -> Self {
        self.utc_offset_secs = Some(offset_secs);
        self
    }

    pub fn with_clock_write_timeout(mut self, timeout: Duration) -> Self {
        self.clock_write_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn clock_write_timeout(&self) -> Duration {
        Duration::from_millis(self.clock_write_timeout_ms)
    }

    pub fn resubscribe_delay(&self) -> Duration {
        Duration::from_millis(self.resubscribe_delay_ms)
    }

    /// Time source matching the configured offset.
    pub fn time_source(&self) -> Arc<dyn TimeSource> {
        match self.utc_offset_secs {
            Some(offset) => Arc::new(FixedClock::with_offset(offset)),
            None => Arc::new(SystemClock),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.clock_write_timeout(), Duration::from_secs(5));
        assert_eq!(config.resubscribe_delay(), Duration::from_secs(2));
        assert!(config.schema_path.is_none());
    }

    #[test]
    fn test_partial_json() {
        let config: GatewayConfig = serde_json::from_str(r#"{ "utc_offset_secs": 3600 }"#).unwrap();
        assert_eq!(config.utc_offset_secs, Some(3600));
        assert_eq!(config.event_capacity, defaults::EVENT_CAPACITY);
        assert_eq!(config.time_source().utc_offset_secs(), 3600);
    }
}
