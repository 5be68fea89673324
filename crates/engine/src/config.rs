//! Engine configuration

use std::env;
use std::time::Duration;

/// Tunables for reconciliation and connection recovery
///
/// Defaults match production behavior; every value can be overridden from
/// the environment for test rigs and staging.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How far apart a placeholder and its confirmation may be timestamped
    /// while still correlating as the same message
    pub correlation_window: Duration,

    /// First reconnect delay after a dropped connection; doubles per attempt
    pub reconnect_base_delay: Duration,

    /// Ceiling for the doubling reconnect delay
    pub reconnect_max_delay: Duration,

    /// Initial backoff for retried history pulls
    pub fetch_retry_base_delay: Duration,

    /// Ceiling for the history pull backoff
    pub fetch_retry_max_delay: Duration,

    /// Retry attempts for a transient history pull failure
    pub fetch_max_retries: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            correlation_window: Duration::from_secs(10),
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(15),
            fetch_retry_base_delay: Duration::from_millis(250),
            fetch_retry_max_delay: Duration::from_secs(5),
            fetch_max_retries: 3,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            correlation_window: env_millis("DESKLINE_CORRELATION_WINDOW_MS")
                .unwrap_or(defaults.correlation_window),
            reconnect_base_delay: env_millis("DESKLINE_RECONNECT_BASE_MS")
                .unwrap_or(defaults.reconnect_base_delay),
            reconnect_max_delay: env_millis("DESKLINE_RECONNECT_MAX_MS")
                .unwrap_or(defaults.reconnect_max_delay),
            fetch_retry_base_delay: env_millis("DESKLINE_FETCH_RETRY_BASE_MS")
                .unwrap_or(defaults.fetch_retry_base_delay),
            fetch_retry_max_delay: env_millis("DESKLINE_FETCH_RETRY_MAX_MS")
                .unwrap_or(defaults.fetch_retry_max_delay),
            fetch_max_retries: env::var("DESKLINE_FETCH_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.fetch_max_retries),
        }
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_defaults() {
        env::remove_var("DESKLINE_CORRELATION_WINDOW_MS");
        env::remove_var("DESKLINE_RECONNECT_MAX_MS");

        let config = EngineConfig::from_env();
        assert_eq!(config.correlation_window, Duration::from_secs(10));
        assert_eq!(config.reconnect_max_delay, Duration::from_secs(15));
        assert_eq!(config.fetch_max_retries, 3);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        env::set_var("DESKLINE_CORRELATION_WINDOW_MS", "2500");
        env::set_var("DESKLINE_FETCH_MAX_RETRIES", "7");

        let config = EngineConfig::from_env();
        assert_eq!(config.correlation_window, Duration::from_millis(2500));
        assert_eq!(config.fetch_max_retries, 7);

        env::remove_var("DESKLINE_CORRELATION_WINDOW_MS");
        env::remove_var("DESKLINE_FETCH_MAX_RETRIES");
    }

    #[test]
    #[serial]
    fn test_unparseable_value_falls_back() {
        env::set_var("DESKLINE_RECONNECT_BASE_MS", "not-a-number");

        let config = EngineConfig::from_env();
        assert_eq!(config.reconnect_base_delay, Duration::from_secs(1));

        env::remove_var("DESKLINE_RECONNECT_BASE_MS");
    }
}
