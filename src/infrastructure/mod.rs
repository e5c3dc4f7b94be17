//! Infrastructure module for external services.
//!
//! This module contains the backend traits and their Redis, `PostgreSQL` and
//! in-memory implementations, plus the factory that wires them from
//! configuration.

pub mod factory;
pub mod in_memory;
pub mod postgres;
pub mod redis;
pub mod repository;

pub use factory::{
    BackendConfig, BackendFactory, Backends, CacheMode, ConfigurationError, FactoryError,
    StorageMode,
};
pub use in_memory::{InMemoryEmailIndex, InMemoryJobQueue, InMemorySyncLockStore, InMemoryUserSource};
pub use postgres::PostgresUserSource;
pub use redis::{RedisEmailIndex, RedisJobQueue, RedisKeys, RedisSyncLockStore};
pub use repository::{
    DEFAULT_CONSUMER, Delivery, EmailIndexBackend, JobQueue, ReconcileBatch, RepositoryError,
    SyncLockStore, UserSource,
};
