//! Queue configuration.

use std::time::Duration;

use crate::error::{QueueError, QueueResult};
use crate::keys::Keys;

const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;
const DEFAULT_FETCH_TIMEOUT_MS: u64 = 1000;

/// Queue configuration.
///
/// Assembled once at startup and shared read-only by every component.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Key prefix, either empty or `"<ns>:"`
    pub namespace: String,
    /// Identifies this process's in-progress lists; must be stable across restarts
    pub process_id: String,
    /// How often delayed and retry sets are polled
    pub poll_interval: Duration,
    /// Upper bound on a single blocking claim against a queue
    pub fetch_timeout: Duration,
}

impl QueueConfig {
    /// Create a config for the given process id with default settings.
    pub fn new(process_id: impl Into<String>) -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            namespace: String::new(),
            process_id: process_id.into(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            fetch_timeout: Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS),
        }
    }

    /// Set the namespace. A trailing `:` is added when missing.
    pub fn with_namespace(mut self, namespace: impl AsRef<str>) -> Self {
        self.namespace = Keys::normalize_namespace(namespace.as_ref());
        self
    }

    pub fn with_redis_url(mut self, redis_url: impl Into<String>) -> Self {
        self.redis_url = redis_url.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// Create config from environment variables.
    ///
    /// `QWORK_PROCESS_ID` is required; everything else has a default.
    pub fn from_env() -> QueueResult<Self> {
        let process_id = std::env::var("QWORK_PROCESS_ID").unwrap_or_default();

        let config = Self::new(process_id)
            .with_redis_url(
                std::env::var("REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string()),
            )
            .with_namespace(std::env::var("QWORK_NAMESPACE").unwrap_or_default())
            .with_poll_interval(Duration::from_secs(
                std::env::var("QWORK_POLL_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            ))
            .with_fetch_timeout(Duration::from_millis(
                std::env::var("QWORK_FETCH_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_FETCH_TIMEOUT_MS),
            ));

        config.validate()?;
        Ok(config)
    }

    /// Check the settings that have no sensible default.
    pub fn validate(&self) -> QueueResult<()> {
        if self.redis_url.trim().is_empty() {
            return Err(QueueError::config("a redis url is required"));
        }
        if self.process_id.trim().is_empty() {
            return Err(QueueError::config(
                "a process id is required; it uniquely identifies this instance",
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(QueueError::config("poll interval must be positive"));
        }
        if self.fetch_timeout.is_zero() {
            return Err(QueueError::config("fetch timeout must be positive"));
        }
        Ok(())
    }

    /// Key builder for this config's namespace.
    pub fn keys(&self) -> Keys {
        Keys::new(&self.namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QueueConfig::new("1");

        assert_eq!(config.process_id, "1");
        assert_eq!(config.namespace, "");
        assert_eq!(config.poll_interval, Duration::from_secs(15));
        assert_eq!(config.fetch_timeout, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_namespace_gets_trailing_colon() {
        let config = QueueConfig::new("1").with_namespace("prod");
        assert_eq!(config.namespace, "prod:");

        let config = QueueConfig::new("1").with_namespace("prod:");
        assert_eq!(config.namespace, "prod:");
    }

    #[test]
    fn test_custom_poll_interval() {
        let config = QueueConfig::new("1").with_poll_interval(Duration::from_secs(1));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_requires_process_id() {
        let err = QueueConfig::new("").validate().unwrap_err();
        assert!(matches!(err, QueueError::Config(_)));
        assert!(err.to_string().contains("process id"));
    }

    #[test]
    fn test_requires_redis_url() {
        let err = QueueConfig::new("1").with_redis_url("").validate().unwrap_err();
        assert!(matches!(err, QueueError::Config(_)));
    }
}
