use std::env;

/// Process-wide drip configuration. Every knob is optional in the
/// environment and falls back to the documented default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DripConfig {
    /// Global cap on completed sends per civil day.
    pub daily_max: u32,
    /// Milliseconds between empty-result polls.
    pub poll_interval_ms: u64,
    /// Milliseconds between successful sends in one worker.
    pub message_delay_ms: u64,
    /// Per-read visibility lease in seconds.
    pub visibility_timeout_secs: u32,
    /// Days the scheduler will scan forward for capacity.
    pub overflow_horizon_days: u32,
    /// Days of past queues kept alive by the janitor.
    pub retention_days: u32,
    /// Seconds the janitor may spend before abandoning remaining drops.
    pub janitor_timeout_secs: u64,
    /// Prefixes queue names with `test-`.
    pub test_mode: bool,
}

impl Default for DripConfig {
    fn default() -> Self {
        Self {
            daily_max: 100,
            poll_interval_ms: 5000,
            message_delay_ms: 2000,
            visibility_timeout_secs: 30,
            overflow_horizon_days: 30,
            retention_days: 7,
            janitor_timeout_secs: 10,
            test_mode: false,
        }
    }
}

impl DripConfig {
    pub fn from_env() -> Self {
        fn parse_bool(key: &str, default: bool) -> bool {
            match env::var(key) {
                Ok(val) => matches!(
                    val.to_ascii_lowercase().as_str(),
                    "1" | "true" | "yes" | "on"
                ),
                Err(_) => default,
            }
        }

        fn parse_u64(key: &str, default: u64) -> u64 {
            env::var(key)
                .ok()
                .and_then(|raw| raw.parse::<u64>().ok())
                .unwrap_or(default)
        }

        fn parse_u32(key: &str, default: u32) -> u32 {
            env::var(key)
                .ok()
                .and_then(|raw| raw.parse::<u32>().ok())
                .unwrap_or(default)
        }

        let defaults = Self::default();

        Self {
            daily_max: parse_u32("DAILY_MAX", defaults.daily_max),
            poll_interval_ms: parse_u64("WORKER_POLL_INTERVAL", defaults.poll_interval_ms),
            message_delay_ms: parse_u64("WORKER_MESSAGE_DELAY", defaults.message_delay_ms),
            visibility_timeout_secs: parse_u32(
                "DRIP_VISIBILITY_TIMEOUT_SECONDS",
                defaults.visibility_timeout_secs,
            ),
            // The scan always covers at least the preferred day itself.
            overflow_horizon_days: parse_u32(
                "DRIP_OVERFLOW_HORIZON_DAYS",
                defaults.overflow_horizon_days,
            )
            .max(1),
            retention_days: parse_u32("DRIP_RETENTION_DAYS", defaults.retention_days),
            janitor_timeout_secs: parse_u64(
                "DRIP_JANITOR_TIMEOUT_SECONDS",
                defaults.janitor_timeout_secs,
            ),
            test_mode: parse_bool("DRIP_TEST_MODE", defaults.test_mode),
        }
    }
}
