use crate::error::{BatchError, BatchResult};
use serde::Deserialize;
use std::time::Duration;

/// Batcher configuration. Loaded from environment variables with the
/// prefix `BATCHER__`, or built in code through the engine's builder.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BatcherConfig {
    /// Number of items that closes a batch (size trigger).
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Microseconds a batch may stay open after its first item (time trigger).
    /// Zero dispatches whatever is pending on the next scheduler tick.
    #[serde(default = "default_max_wait_us")]
    pub max_wait_us: u64,
    /// Executor invocations allowed to run at the same time.
    #[serde(default = "default_max_concurrent_dispatches")]
    pub max_concurrent_dispatches: usize,
    /// Optional weight limit per batch, measured by the batcher's weigher.
    #[serde(default)]
    pub max_batch_bytes: Option<usize>,
    /// How long `close` waits for in-flight batches before failing them.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    /// Build without binding to a runtime; the host calls `start` later.
    #[serde(default)]
    pub skip_auto_start: bool,
}

pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;
pub const DEFAULT_MAX_WAIT_US: u64 = 1_000_000;
pub const DEFAULT_MAX_CONCURRENT_DISPATCHES: usize = 3;
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5000;

fn default_max_batch_size() -> usize {
    DEFAULT_MAX_BATCH_SIZE
}
fn default_max_wait_us() -> u64 {
    DEFAULT_MAX_WAIT_US
}
fn default_max_concurrent_dispatches() -> usize {
    DEFAULT_MAX_CONCURRENT_DISPATCHES
}
fn default_shutdown_timeout_ms() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_MS
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            max_wait_us: default_max_wait_us(),
            max_concurrent_dispatches: default_max_concurrent_dispatches(),
            max_batch_bytes: None,
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            skip_auto_start: false,
        }
    }
}

impl BatcherConfig {
    /// Load configuration from the environment, falling back to defaults for
    /// anything unset. `BATCHER__MAX_BATCH_SIZE=500` sets `max_batch_size`.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("BATCHER")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> BatchResult<()> {
        if self.max_batch_size == 0 {
            return Err(BatchError::Config(
                "max_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.max_concurrent_dispatches == 0 {
            return Err(BatchError::Config(
                "max_concurrent_dispatches must be greater than zero".to_string(),
            ));
        }
        if self.max_batch_bytes == Some(0) {
            return Err(BatchError::Config(
                "max_batch_bytes must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_micros(self.max_wait_us)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BatcherConfig::default();
        assert_eq!(config.max_batch_size, 1000);
        assert_eq!(config.max_wait(), Duration::from_secs(1));
        assert_eq!(config.max_concurrent_dispatches, 3);
        assert_eq!(config.max_batch_bytes, None);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(5));
        assert!(!config.skip_auto_start);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: BatcherConfig =
            serde_json::from_str(r#"{"max_batch_size": 10, "max_wait_us": 50000}"#).unwrap();
        assert_eq!(config.max_batch_size, 10);
        assert_eq!(config.max_wait(), Duration::from_millis(50));
        assert_eq!(config.max_concurrent_dispatches, 3);
        assert_eq!(config.shutdown_timeout_ms, 5000);
    }

    #[test]
    fn test_zero_wait_is_valid() {
        let config = BatcherConfig {
            max_wait_us: 0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert!(config.max_wait().is_zero());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_size = BatcherConfig {
            max_batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(zero_size.validate(), Err(BatchError::Config(_))));

        let zero_dispatches = BatcherConfig {
            max_concurrent_dispatches: 0,
            ..Default::default()
        };
        assert!(matches!(
            zero_dispatches.validate(),
            Err(BatchError::Config(_))
        ));

        let zero_bytes = BatcherConfig {
            max_batch_bytes: Some(0),
            ..Default::default()
        };
        assert!(matches!(zero_bytes.validate(), Err(BatchError::Config(_))));
    }
}
