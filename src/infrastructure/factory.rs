//! Backend factory for runtime backend selection.
//!
//! This module builds the injected clients (index, lock store, job queue,
//! user source) from environment configuration. It supports switching
//! between in-memory, Redis and `PostgreSQL` backends at runtime.
//!
//! # Environment Variables
//!
//! - `STORAGE_MODE`: `in_memory` (default) | `postgres`
//! - `CACHE_MODE`: `in_memory` (default) | `redis`
//! - `DATABASE_URL`: `PostgreSQL` connection URL (required when `STORAGE_MODE=postgres`)
//! - `REDIS_URL`: Redis connection URL (required when `CACHE_MODE=redis`)
//! - `REDIS_NAMESPACE`: optional prefix for every Redis key
//! - `SYNC_CONSUMER_ID`: name of this process's in-flight job list; falls back
//!   to `HOSTNAME`, then to `default`. Must be stable across restarts and
//!   distinct per running instance.
//!
//! # Example
//!
//! ```ignore
//! use user_sync_index::infrastructure::factory::{BackendConfig, BackendFactory};
//!
//! let config = BackendConfig::from_env()?;
//! let backends = BackendFactory::new(config).create().await?;
//! ```

use std::env;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

use super::{
    EmailIndexBackend, InMemoryEmailIndex, InMemoryJobQueue, InMemorySyncLockStore,
    InMemoryUserSource, JobQueue, PostgresUserSource, RedisEmailIndex, RedisJobQueue, RedisKeys,
    RedisSyncLockStore, SyncLockStore, UserSource, redis::create_pool,
    repository::DEFAULT_CONSUMER,
};

// =============================================================================
// Configuration Types
// =============================================================================

/// Where the authoritative user table lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageMode {
    /// In-memory user table. Suitable for testing and development.
    #[default]
    InMemory,
    /// `PostgreSQL` `users` table.
    Postgres,
}

impl FromStr for StorageMode {
    type Err = ConfigurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "in_memory" | "inmemory" | "memory" => Ok(Self::InMemory),
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            _ => Err(ConfigurationError::InvalidStorageMode(value.to_string())),
        }
    }
}

/// Where the index, lock and job queue live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Process-local index, lock and queue. Single-process only.
    #[default]
    InMemory,
    /// Redis for all three.
    Redis,
}

impl FromStr for CacheMode {
    type Err = ConfigurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "in_memory" | "inmemory" | "memory" => Ok(Self::InMemory),
            "redis" => Ok(Self::Redis),
            _ => Err(ConfigurationError::InvalidCacheMode(value.to_string())),
        }
    }
}

/// Configuration for the backend factory.
#[derive(Debug, Clone, Default)]
pub struct BackendConfig {
    /// Where users are read from.
    pub storage_mode: StorageMode,
    /// Where the index, lock and queue live.
    pub cache_mode: CacheMode,
    /// `PostgreSQL` connection URL (required when `storage_mode` is `Postgres`).
    pub database_url: Option<String>,
    /// Redis connection URL (required when `cache_mode` is `Redis`).
    pub redis_url: Option<String>,
    /// Optional prefix for every Redis key.
    pub redis_namespace: Option<String>,
    /// Name this process dequeues under. `None` means [`DEFAULT_CONSUMER`].
    pub consumer_id: Option<String>,
}

/// Reads an optional variable, treating empty/whitespace-only as unset.
fn optional_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl BackendConfig {
    /// Creates a configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if:
    /// - `STORAGE_MODE` or `CACHE_MODE` contains an invalid value
    /// - `DATABASE_URL` is missing when `STORAGE_MODE=postgres`
    /// - `REDIS_URL` is missing when `CACHE_MODE=redis`
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let storage_mode = match env::var("STORAGE_MODE") {
            Ok(value) => value.parse()?,
            Err(env::VarError::NotPresent) => StorageMode::default(),
            Err(env::VarError::NotUnicode(_)) => {
                return Err(ConfigurationError::InvalidStorageMode(
                    "<non-UTF-8 value>".to_string(),
                ));
            }
        };

        let cache_mode = match env::var("CACHE_MODE") {
            Ok(value) => value.parse()?,
            Err(env::VarError::NotPresent) => CacheMode::default(),
            Err(env::VarError::NotUnicode(_)) => {
                return Err(ConfigurationError::InvalidCacheMode(
                    "<non-UTF-8 value>".to_string(),
                ));
            }
        };

        let config = Self {
            storage_mode,
            cache_mode,
            database_url: optional_var("DATABASE_URL"),
            redis_url: optional_var("REDIS_URL"),
            redis_namespace: optional_var("REDIS_NAMESPACE"),
            consumer_id: optional_var("SYNC_CONSUMER_ID").or_else(|| optional_var("HOSTNAME")),
        };

        config.validate()?;
        Ok(config)
    }

    /// The queue consumer name this process uses.
    #[must_use]
    pub fn consumer(&self) -> &str {
        self.consumer_id.as_deref().unwrap_or(DEFAULT_CONSUMER)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if required URLs are missing for the selected modes.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if matches!(self.storage_mode, StorageMode::Postgres) && self.database_url.is_none() {
            return Err(ConfigurationError::MissingDatabaseUrl);
        }

        if matches!(self.cache_mode, CacheMode::Redis) && self.redis_url.is_none() {
            return Err(ConfigurationError::MissingRedisUrl);
        }

        Ok(())
    }
}

// =============================================================================
// Error Types
// =============================================================================

/// Errors in environment configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// Invalid storage mode value.
    #[error("Invalid storage mode: '{0}'. Expected 'in_memory' or 'postgres'")]
    InvalidStorageMode(String),

    /// Invalid cache mode value.
    #[error("Invalid cache mode: '{0}'. Expected 'in_memory' or 'redis'")]
    InvalidCacheMode(String),

    /// Missing `DATABASE_URL` when storage mode is Postgres.
    #[error("DATABASE_URL environment variable is required when STORAGE_MODE=postgres")]
    MissingDatabaseUrl,

    /// Missing `REDIS_URL` when cache mode is Redis.
    #[error("REDIS_URL environment variable is required when CACHE_MODE=redis")]
    MissingRedisUrl,

    /// A numeric setting could not be parsed or is out of range.
    #[error("Invalid value for {name}: '{value}'")]
    InvalidNumber { name: &'static str, value: String },
}

/// Errors that can occur during factory initialization.
#[derive(Debug, Error)]
pub enum FactoryError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Database connection error.
    #[error("Database connection error: {0}")]
    DatabaseConnection(String),

    /// Redis connection error.
    #[error("Redis connection error: {0}")]
    RedisConnection(String),
}

// =============================================================================
// Backend Factory
// =============================================================================

/// The injected clients for the sync subsystem.
#[derive(Clone)]
pub struct Backends {
    /// Sorted email index and records.
    pub index: Arc<dyn EmailIndexBackend>,
    /// Rebuild lock and last-sync timestamp.
    pub lock_store: Arc<dyn SyncLockStore>,
    /// Sync job queue.
    pub queue: Arc<dyn JobQueue>,
    /// Primary user table.
    pub users: Arc<dyn UserSource>,
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Backends")
            .field("index", &"Arc<dyn EmailIndexBackend>")
            .field("lock_store", &"Arc<dyn SyncLockStore>")
            .field("queue", &"Arc<dyn JobQueue>")
            .field("users", &"Arc<dyn UserSource>")
            .finish()
    }
}

impl Backends {
    /// All-in-memory backends.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            index: Arc::new(InMemoryEmailIndex::new()),
            lock_store: Arc::new(InMemorySyncLockStore::new()),
            queue: Arc::new(InMemoryJobQueue::new()),
            users: Arc::new(InMemoryUserSource::new()),
        }
    }
}

/// Factory for creating backends based on configuration.
#[derive(Debug, Clone)]
pub struct BackendFactory {
    config: BackendConfig,
}

impl BackendFactory {
    /// Creates a new factory with the given configuration.
    #[must_use]
    pub const fn new(config: BackendConfig) -> Self {
        Self { config }
    }

    /// Creates a new factory from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `FactoryError::Configuration` if environment configuration is invalid.
    pub fn from_env() -> Result<Self, FactoryError> {
        Ok(Self::new(BackendConfig::from_env()?))
    }

    /// Returns the configuration used by this factory.
    #[must_use]
    pub const fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Creates all backends based on the configuration.
    ///
    /// # Errors
    ///
    /// Returns `FactoryError` if:
    /// - Database connection fails (when `storage_mode` is `Postgres`)
    /// - Redis pool creation fails (when `cache_mode` is `Redis`)
    pub async fn create(&self) -> Result<Backends, FactoryError> {
        let users: Arc<dyn UserSource> = match self.config.storage_mode {
            StorageMode::InMemory => Arc::new(InMemoryUserSource::new()),
            StorageMode::Postgres => {
                let url = self
                    .config
                    .database_url
                    .as_deref()
                    .ok_or(ConfigurationError::MissingDatabaseUrl)?;
                let source = PostgresUserSource::connect(url)
                    .await
                    .map_err(|error| FactoryError::DatabaseConnection(error.to_string()))?;
                Arc::new(source)
            }
        };

        let backends = match self.config.cache_mode {
            CacheMode::InMemory => Backends {
                users,
                ..Backends::in_memory()
            },
            CacheMode::Redis => {
                let url = self
                    .config
                    .redis_url
                    .as_deref()
                    .ok_or(ConfigurationError::MissingRedisUrl)?;
                let pool = create_pool(url)
                    .map_err(|error| FactoryError::RedisConnection(error.to_string()))?;
                let keys = self
                    .config
                    .redis_namespace
                    .clone()
                    .map_or_else(RedisKeys::new, RedisKeys::with_namespace);
                let queue = RedisJobQueue::new(pool.clone(), keys.clone())
                    .with_consumer(self.config.consumer());
                Backends {
                    index: Arc::new(RedisEmailIndex::new(pool.clone(), keys.clone())),
                    lock_store: Arc::new(RedisSyncLockStore::new(pool, keys)),
                    queue: Arc::new(queue),
                    users,
                }
            }
        };

        Ok(backends)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("in_memory", StorageMode::InMemory)]
    #[case("MEMORY", StorageMode::InMemory)]
    #[case("postgres", StorageMode::Postgres)]
    #[case("pg", StorageMode::Postgres)]
    fn test_storage_mode_from_str(#[case] value: &str, #[case] expected: StorageMode) {
        assert_eq!(value.parse::<StorageMode>().unwrap(), expected);
    }

    #[rstest]
    #[case("redis", CacheMode::Redis)]
    #[case("InMemory", CacheMode::InMemory)]
    fn test_cache_mode_from_str(#[case] value: &str, #[case] expected: CacheMode) {
        assert_eq!(value.parse::<CacheMode>().unwrap(), expected);
    }

    #[rstest]
    fn test_invalid_modes() {
        assert_eq!(
            "sqlite".parse::<StorageMode>(),
            Err(ConfigurationError::InvalidStorageMode("sqlite".to_string()))
        );
        assert_eq!(
            "memcached".parse::<CacheMode>(),
            Err(ConfigurationError::InvalidCacheMode("memcached".to_string()))
        );
    }

    #[rstest]
    fn test_validate_requires_urls() {
        let config = BackendConfig {
            storage_mode: StorageMode::Postgres,
            ..BackendConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigurationError::MissingDatabaseUrl));

        let config = BackendConfig {
            cache_mode: CacheMode::Redis,
            ..BackendConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigurationError::MissingRedisUrl));
    }

    #[rstest]
    fn test_validate_full_configuration() {
        let config = BackendConfig {
            storage_mode: StorageMode::Postgres,
            cache_mode: CacheMode::Redis,
            database_url: Some("postgres://localhost/app".to_string()),
            redis_url: Some("redis://localhost:6379".to_string()),
            redis_namespace: Some("staging".to_string()),
            consumer_id: None,
        };
        assert_eq!(config.validate(), Ok(()));
    }

    #[rstest]
    #[case(None, DEFAULT_CONSUMER)]
    #[case(Some("api-1"), "api-1")]
    fn test_consumer_name(#[case] consumer_id: Option<&str>, #[case] expected: &str) {
        let config = BackendConfig {
            consumer_id: consumer_id.map(str::to_string),
            ..BackendConfig::default()
        };
        assert_eq!(config.consumer(), expected);
    }

    #[rstest]
    #[tokio::test]
    async fn test_factory_creates_in_memory_backends() {
        let factory = BackendFactory::new(BackendConfig::default());
        let backends = factory.create().await.unwrap();
        assert!(backends.index.all_emails().run_async().await.unwrap().is_empty());
        assert_eq!(backends.queue.pending().run_async().await.unwrap(), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn test_factory_creates_redis_backends_without_connecting() {
        let config = BackendConfig {
            cache_mode: CacheMode::Redis,
            redis_url: Some("redis://localhost:6379".to_string()),
            consumer_id: Some("api-1".to_string()),
            ..BackendConfig::default()
        };
        let backends = BackendFactory::new(config).create().await.unwrap();
        assert_eq!(backends.queue.consumer(), "api-1");
    }
}
