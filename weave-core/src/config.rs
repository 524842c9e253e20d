//! Runtime configuration.
//!
//! A [`RuntimeConfig`] controls how the default [`Runtime`](crate::reactive::Runtime)
//! batches work. It can be built in code or loaded from JSON; missing fields
//! fall back to their defaults.
//!
//! ```rust,ignore
//! let config = RuntimeConfig::from_json(r#"{ "notification_interval_ms": 33 }"#)?;
//! let runtime = Runtime::new(config)?;
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default wait of the notification batcher: roughly one frame at 60 Hz.
pub const DEFAULT_NOTIFICATION_INTERVAL_MS: u64 = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How long the computation batcher waits before draining.
    /// Zero merges everything that arrives in the same tick.
    pub computation_interval_ms: u64,

    /// How long the notification batcher waits before draining.
    pub notification_interval_ms: u64,

    /// Drain pending change notifications right after every computation batch.
    pub flush_notifications_after_computations: bool,

    /// Upper bound on batches running at the same time, per batcher.
    pub max_consumers: usize,

    /// Worker threads for a runtime-owned tokio runtime. `None` uses tokio's default.
    pub worker_threads: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            computation_interval_ms: 0,
            notification_interval_ms: DEFAULT_NOTIFICATION_INTERVAL_MS,
            flush_notifications_after_computations: true,
            max_consumers: 1,
            worker_threads: None,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON and validate it.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_consumers == 0 {
            return Err(ConfigError::Invalid("max_consumers must be at least 1"));
        }
        if self.worker_threads == Some(0) {
            return Err(ConfigError::Invalid("worker_threads must be at least 1"));
        }
        Ok(())
    }

    pub fn computation_interval(&self) -> Duration {
        Duration::from_millis(self.computation_interval_ms)
    }

    pub fn notification_interval(&self) -> Duration {
        Duration::from_millis(self.notification_interval_ms)
    }

    pub fn with_computation_interval(mut self, interval: Duration) -> Self {
        self.computation_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_notification_interval(mut self, interval: Duration) -> Self {
        self.notification_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_flush_notifications_after_computations(mut self, enabled: bool) -> Self {
        self.flush_notifications_after_computations = enabled;
        self
    }

    pub fn with_max_consumers(mut self, max_consumers: usize) -> Self {
        self.max_consumers = max_consumers;
        self
    }

    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = Some(worker_threads);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.computation_interval(), Duration::ZERO);
        assert_eq!(config.notification_interval(), Duration::from_millis(16));
        assert!(config.flush_notifications_after_computations);
        assert_eq!(config.max_consumers, 1);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config = RuntimeConfig::from_json(r#"{ "notification_interval_ms": 33 }"#).unwrap();
        assert_eq!(config.notification_interval_ms, 33);
        assert_eq!(config.computation_interval_ms, 0);
        assert!(config.flush_notifications_after_computations);
    }

    #[test]
    fn rejects_zero_consumers() {
        let err = RuntimeConfig::from_json(r#"{ "max_consumers": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = RuntimeConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
