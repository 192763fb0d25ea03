//! Runtime configuration from environment variables and CLI arguments

use std::env;
use std::time::Duration;

/// Tuning knobs of the poller
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Size of the worker pool shared by all poll cycles
    pub max_concurrent_polls: usize,

    /// Timeout of a single device request
    pub http_timeout: Duration,
}

impl PollerConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `SENSORFLOW_MAX_CONCURRENT_POLLS` (default: 10)
    /// - `SENSORFLOW_HTTP_TIMEOUT_SECS` (default: 30)
    pub fn from_env() -> Self {
        let max_concurrent_polls = env::var("SENSORFLOW_MAX_CONCURRENT_POLLS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(10);

        let http_timeout_secs = env::var("SENSORFLOW_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n: &u64| *n > 0)
            .unwrap_or(30);

        Self {
            max_concurrent_polls,
            http_timeout: Duration::from_secs(http_timeout_secs),
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_polls: 10,
            http_timeout: Duration::from_secs(30),
        }
    }
}

/// Database connection settings as given on the command line
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl DatabaseSettings {
    pub const DEFAULT_URL: &'static str = "sensorflow.db";

    /// File path of the SQLite database (`sqlite://` prefix stripped)
    pub fn path(&self) -> &str {
        let url = self.url.trim();
        let path = url.strip_prefix("sqlite://").unwrap_or(url);
        if path.is_empty() {
            Self::DEFAULT_URL
        } else {
            path
        }
    }

    /// Whether credentials were supplied (SQLite does not use them)
    pub fn has_credentials(&self) -> bool {
        self.user.is_some() || self.password.is_some()
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: Self::DEFAULT_URL.to_string(),
            user: None,
            password: None,
        }
    }
}
