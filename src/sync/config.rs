//! Sync timing configuration.
//!
//! # Environment Variables
//!
//! - `SYNC_MIN_INTERVAL_SECS`: debounce window between full rebuilds (default: 300)
//! - `SYNC_LOCK_TTL_SECS`: rebuild lock lifetime (default: 30, minimum: 1)
//! - `SYNC_TICK_INTERVAL_SECS`: how often the ticker calls the scheduler (default: 60)
//! - `SYNC_POLL_TIMEOUT_SECS`: worker dequeue timeout (default: 1, minimum: 1)

use std::time::Duration;

use crate::infrastructure::ConfigurationError;

/// Default debounce window between scheduled rebuilds.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default rebuild lock lifetime.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

/// Default ticker period.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Default worker dequeue timeout.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Timing knobs for the scheduler, worker and ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Minimum time between two scheduled full rebuilds.
    pub min_interval: Duration,
    /// Lifetime of the rebuild lock.
    pub lock_ttl: Duration,
    /// Period of the rebuild ticker.
    pub tick_interval: Duration,
    /// How long the worker blocks waiting for a job.
    pub poll_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            min_interval: DEFAULT_MIN_INTERVAL,
            lock_ttl: DEFAULT_LOCK_TTL,
            tick_interval: DEFAULT_TICK_INTERVAL,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

impl SyncConfig {
    /// Creates a configuration from environment variables.
    ///
    /// Unset or empty variables take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::InvalidNumber` for values that are not
    /// non-negative integers, or zero where a minimum of one applies.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Creates a configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`SyncConfig::from_env`].
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigurationError> {
        let seconds = |name: &'static str, default: Duration, minimum: u64| {
            let Some(raw) = lookup(name).filter(|value| !value.trim().is_empty()) else {
                return Ok(default);
            };
            match raw.trim().parse::<u64>() {
                Ok(value) if value >= minimum => Ok(Duration::from_secs(value)),
                _ => Err(ConfigurationError::InvalidNumber { name, value: raw }),
            }
        };

        Ok(Self {
            min_interval: seconds("SYNC_MIN_INTERVAL_SECS", DEFAULT_MIN_INTERVAL, 0)?,
            lock_ttl: seconds("SYNC_LOCK_TTL_SECS", DEFAULT_LOCK_TTL, 1)?,
            tick_interval: seconds("SYNC_TICK_INTERVAL_SECS", DEFAULT_TICK_INTERVAL, 1)?,
            poll_timeout: seconds("SYNC_POLL_TIMEOUT_SECS", DEFAULT_POLL_TIMEOUT, 1)?,
        })
    }
}
