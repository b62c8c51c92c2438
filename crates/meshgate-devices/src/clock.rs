//! Clock synchronization for devices without a reliable clock.
//!
//! A report on the device's time cluster triggers one write of the current
//! local wall-clock time, as seconds since 2000-01-01. The write is best
//! effort: it is bounded by a timeout and its failures are logged, never
//! returned to the report path that triggered it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use meshgate_core::{DeviceId, EventBus, GatewayEvent};
use serde::Serialize;

use crate::endpoint::{AttributeReport, Endpoint, EndpointAddress};
use crate::schema::ClockSyncConfig;
use crate::wire::{AttributeId, WireValue, EPOCH_2000_UNIX_SECS};

const EVENT_SOURCE: &str = "clock";

/// Source of wall-clock time and the local UTC offset.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Local offset from UTC, in seconds (east positive).
    fn utc_offset_secs(&self) -> i32;
}

/// Host clock and host time zone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn utc_offset_secs(&self) -> i32 {
        Local::now().offset().local_minus_utc()
    }
}

/// Clock with a configured UTC offset and, optionally, a frozen time.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    at: Option<DateTime<Utc>>,
    offset_secs: i32,
}

impl FixedClock {
    /// Frozen at `at`.
    pub fn at(at: DateTime<Utc>, offset_secs: i32) -> Self {
        Self {
            at: Some(at),
            offset_secs,
        }
    }

    /// Host time with a fixed offset instead of the host time zone.
    pub fn with_offset(offset_secs: i32) -> Self {
        Self {
            at: None,
            offset_secs,
        }
    }
}

impl TimeSource for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.at.unwrap_or_else(Utc::now)
    }

    fn utc_offset_secs(&self) -> i32 {
        self.offset_secs
    }
}

/// Device-side time value: local seconds since 2000-01-01T00:00:00.
pub fn device_time(now: DateTime<Utc>, utc_offset_secs: i32) -> u32 {
    let secs = now.timestamp() - EPOCH_2000_UNIX_SECS + i64::from(utc_offset_secs);
    secs.clamp(0, i64::from(u32::MAX)) as u32
}

/// Where one device is in a sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockPhase {
    Idle,
    TriggerReceived,
    Computing,
    Writing,
}

impl fmt::Display for ClockPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::TriggerReceived => "trigger_received",
            Self::Computing => "computing",
            Self::Writing => "writing",
        };
        f.write_str(s)
    }
}

/// Per-device clock sync state machine.
#[derive(Clone)]
pub struct ClockSync {
    endpoint: Arc<dyn Endpoint>,
    clock: Arc<dyn TimeSource>,
    write_timeout: Duration,
    // Devices absent from the map are idle.
    phases: Arc<DashMap<DeviceId, ClockPhase>>,
    events: EventBus,
}

impl ClockSync {
    pub fn new(
        endpoint: Arc<dyn Endpoint>,
        clock: Arc<dyn TimeSource>,
        write_timeout: Duration,
        events: EventBus,
    ) -> Self {
        Self {
            endpoint,
            clock,
            write_timeout,
            phases: Arc::new(DashMap::new()),
            events,
        }
    }

    pub fn phase(&self, device_id: &DeviceId) -> ClockPhase {
        self.phases
            .get(device_id)
            .map(|p| *p)
            .unwrap_or(ClockPhase::Idle)
    }

    /// Sync the reporting device if the report touches its time cluster.
    ///
    /// Returns `None` when the report is not a trigger or a sync for the
    /// device is already running, otherwise whether the write succeeded.
    pub async fn handle_report(
        &self,
        report: &AttributeReport,
        config: &ClockSyncConfig,
    ) -> Option<bool> {
        if !report.touches(config.cluster) {
            return None;
        }
        self.sync(&report.device_id, config).await
    }

    /// Run one sync cycle for a device. `None` if one is already running.
    pub async fn sync(&self, device_id: &DeviceId, config: &ClockSyncConfig) -> Option<bool> {
        match self.phases.entry(device_id.clone()) {
            Entry::Occupied(entry) => {
                tracing::debug!(device_id = %device_id, phase = %entry.get(), "Clock sync already in progress");
                return None;
            }
            Entry::Vacant(entry) => {
                entry.insert(ClockPhase::TriggerReceived);
            }
        }

        self.phases.insert(device_id.clone(), ClockPhase::Computing);
        let time = device_time(self.clock.now(), self.clock.utc_offset_secs());

        self.phases.insert(device_id.clone(), ClockPhase::Writing);
        let target = EndpointAddress::new(device_id.clone(), config.endpoint);
        let write = self.endpoint.write_attribute(
            &target,
            config.cluster,
            AttributeId(config.attribute),
            WireValue::UtcTime(time),
        );
        let success = match tokio::time::timeout(self.write_timeout, write).await {
            Ok(Ok(())) => {
                tracing::debug!(device_id = %device_id, device_time = time, "Clock synced");
                true
            }
            Ok(Err(e)) => {
                tracing::warn!(device_id = %device_id, error = %e, "Clock sync write failed");
                false
            }
            Err(_) => {
                tracing::warn!(
                    device_id = %device_id,
                    timeout_ms = self.write_timeout.as_millis() as u64,
                    "Clock sync write timed out"
                );
                false
            }
        };

        self.phases.remove(device_id);
        self.events.publish_with_source(
            GatewayEvent::ClockSynced {
                device_id: device_id.clone(),
                device_time: time,
                success,
                timestamp: Utc::now(),
            },
            EVENT_SOURCE,
        );
        Some(success)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_device_time_epoch() {
        let epoch = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(device_time(epoch, 0), 0);
        assert_eq!(device_time(epoch, 3600), 3600);
        // Before the device epoch clamps to zero.
        assert_eq!(device_time(epoch, -60), 0);

        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let expected = (now.timestamp() - EPOCH_2000_UNIX_SECS + 7200) as u32;
        assert_eq!(device_time(now, 7200), expected);
    }

    #[test]
    fn test_fixed_clock() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = FixedClock::at(at, -18_000);
        assert_eq!(clock.now(), at);
        assert_eq!(clock.utc_offset_secs(), -18_000);
        assert_eq!(FixedClock::with_offset(60).utc_offset_secs(), 60);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(ClockPhase::TriggerReceived.to_string(), "trigger_received");
    }
}
