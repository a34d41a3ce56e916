//! Demo configuration loaded from environment variables.

use std::time::Duration;

use scheduler::{RetryPolicy, RuntimeOptions};

/// Demo configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `ORDER_COUNT`: orders to process (default: `3`)
/// - `RETRY_MAX_ATTEMPTS`: attempts per activity (default: `3`)
/// - `RETRY_BACKOFF_MS`: first retry delay in milliseconds (default: `100`)
/// - `WAIT_TIMEOUT_SECS`: how long to wait for each order (default: `30`)
/// - `PRINT_METRICS`: print Prometheus metrics on exit (default: `false`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub order_count: usize,
    pub retry_max_attempts: u32,
    pub retry_backoff: Duration,
    pub wait_timeout: Duration,
    pub print_metrics: bool,
    pub log_level: String,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults for
    /// missing or unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            order_count: lookup("ORDER_COUNT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.order_count),
            retry_max_attempts: lookup("RETRY_MAX_ATTEMPTS")
                .and_then(|v| v.parse().ok())
                .filter(|attempts| *attempts > 0)
                .unwrap_or(defaults.retry_max_attempts),
            retry_backoff: lookup("RETRY_BACKOFF_MS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_backoff),
            wait_timeout: lookup("WAIT_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.wait_timeout),
            print_metrics: lookup("PRINT_METRICS")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.print_metrics),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
        }
    }

    /// Runtime options derived from the retry settings.
    pub fn runtime_options(&self) -> RuntimeOptions {
        RuntimeOptions::default().with_retry_policy(
            RetryPolicy::new(self.retry_max_attempts).with_initial_backoff(self.retry_backoff),
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            order_count: 3,
            retry_max_attempts: 3,
            retry_backoff: Duration::from_millis(100),
            wait_timeout: Duration::from_secs(30),
            print_metrics: false,
            log_level: "info".to_string(),
        }
    }
}
