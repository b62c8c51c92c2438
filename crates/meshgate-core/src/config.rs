//! Shared configuration defaults and environment variable helpers.
//!
//! Every tunable of the gateway has a default here and can be overridden
//! through the environment, so the library crates never hard-code them.

/// Default values.
pub mod defaults {
    /// Subscriber backlog at which the event bus warns.
    pub const EVENT_CAPACITY: usize = 1024;
    /// Upper bound on the best-effort clock write.
    pub const CLOCK_WRITE_TIMEOUT_MS: u64 = 5_000;
    /// Pause before resubscribing after the report stream ended.
    pub const RESUBSCRIBE_DELAY_MS: u64 = 2_000;
    /// Endpoint used by mappings that do not name one.
    pub const ENDPOINT: u8 = 1;
}

/// Environment variable names.
pub mod env_vars {
    pub const EVENT_CAPACITY: &str = "MESHGATE_EVENT_CAPACITY";
    pub const CLOCK_WRITE_TIMEOUT_MS: &str = "MESHGATE_CLOCK_WRITE_TIMEOUT_MS";
    pub const RESUBSCRIBE_DELAY_MS: &str = "MESHGATE_RESUBSCRIBE_DELAY_MS";
    /// Fixed UTC offset (seconds) for clock sync instead of the host timezone.
    pub const UTC_OFFSET_SECS: &str = "MESHGATE_UTC_OFFSET_SECS";
    /// Path of the JSON schema file with device model definitions.
    pub const SCHEMA_PATH: &str = "MESHGATE_SCHEMA_PATH";
    /// Emit logs as JSON lines.
    pub const LOG_JSON: &str = "MESHGATE_LOG_JSON";
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Event bus capacity from the environment, or the default.
pub fn event_capacity() -> usize {
    parse_env(env_vars::EVENT_CAPACITY).unwrap_or(defaults::EVENT_CAPACITY)
}

/// Clock write timeout from the environment, or the default.
pub fn clock_write_timeout_ms() -> u64 {
    parse_env(env_vars::CLOCK_WRITE_TIMEOUT_MS).unwrap_or(defaults::CLOCK_WRITE_TIMEOUT_MS)
}

/// Resubscribe delay from the environment, or the default.
pub fn resubscribe_delay_ms() -> u64 {
    parse_env(env_vars::RESUBSCRIBE_DELAY_MS).unwrap_or(defaults::RESUBSCRIBE_DELAY_MS)
}

/// Fixed UTC offset override, if set and valid.
pub fn utc_offset_secs() -> Option<i32> {
    parse_env(env_vars::UTC_OFFSET_SECS)
}

/// Schema file path, if set.
pub fn schema_path() -> Option<std::path::PathBuf> {
    std::env::var_os(env_vars::SCHEMA_PATH).map(std::path::PathBuf::from)
}

/// Whether JSON logging is requested.
pub fn log_json() -> bool {
    parse_env(env_vars::LOG_JSON).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_rejects_garbage() {
        std::env::set_var("MESHGATE_TEST_PARSE_GARBAGE", "not-a-number");
        assert_eq!(parse_env::<u64>("MESHGATE_TEST_PARSE_GARBAGE"), None);
        std::env::set_var("MESHGATE_TEST_PARSE_OK", " 42 ");
        assert_eq!(parse_env::<u64>("MESHGATE_TEST_PARSE_OK"), Some(42));
    }

    #[test]
    fn test_missing_env_uses_default() {
        assert_eq!(parse_env::<u64>("MESHGATE_TEST_NEVER_SET"), None);
    }
}
