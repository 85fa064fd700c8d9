//! Operator configuration.

use crate::cache::DEFAULT_CAPACITY;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

/// Default wait between two attempts of a lock-contended call.
pub const DEFAULT_RETRY_WAIT_MS: u64 = 1;

/// Configuration shared by the operator layers.
///
/// # Example
///
/// ```
/// use store_guard::config::StoreConfig;
///
/// let config = StoreConfig {
///     cache_capacity: 1024,
///     cache_enabled: true,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// Total weight the memory cache may hold (entries, with the default weigher).
    pub cache_capacity: usize,
    /// Whether the memory cache starts enabled.
    pub cache_enabled: bool,
    /// Wait between retries of a lock-contended call, in milliseconds.
    pub retry_wait_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            cache_capacity: DEFAULT_CAPACITY,
            cache_enabled: false,
            retry_wait_ms: DEFAULT_RETRY_WAIT_MS,
        }
    }
}

impl StoreConfig {
    /// Build configuration from environment variables.
    ///
    /// - `STORE_GUARD_CACHE_CAPACITY`
    /// - `STORE_GUARD_CACHE_ENABLED` (`true`/`false`)
    /// - `STORE_GUARD_RETRY_WAIT_MS`
    ///
    /// Unset or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        let defaults = StoreConfig::default();
        StoreConfig {
            cache_capacity: env_or("STORE_GUARD_CACHE_CAPACITY", defaults.cache_capacity),
            cache_enabled: env_or("STORE_GUARD_CACHE_ENABLED", defaults.cache_enabled),
            retry_wait_ms: env_or("STORE_GUARD_RETRY_WAIT_MS", defaults.retry_wait_ms),
        }
    }

    /// Check that the values can drive an operator stack.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` for a zero cache capacity or a zero retry
    /// wait (which would turn the contention wait into a busy loop).
    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            return Err(Error::ConfigError(
                "cache_capacity must be greater than zero".to_string(),
            ));
        }
        if self.retry_wait_ms == 0 {
            return Err(Error::ConfigError(
                "retry_wait_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Retry wait as a [`Duration`].
    pub fn retry_wait(&self) -> Duration {
        Duration::from_millis(self.retry_wait_ms)
    }
}

fn env_or<V: std::str::FromStr>(name: &str, default: V) -> V {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring unparsable {}={:?}, using default", name, raw);
                default
            }
        },
        Err(_) => default,
    }
}
