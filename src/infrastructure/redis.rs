//! Redis backend implementations.
//!
//! This module provides Redis-based implementations of the index, lock and
//! queue traits using `deadpool-redis` for connection pooling.
//!
//! # Key Design
//!
//! - Email index: `users:emails` -> ZSET, every member scored 0 so members
//!   are ordered lexicographically and `ZRANGEBYLEX` answers prefix queries
//! - Record: `user:email:{email}` -> JSON `UserRecord`
//! - Rebuild lock: `sync:users:lock` -> random token, `SET NX PX`
//! - Last full sync: `sync:users:last_full` -> epoch milliseconds
//! - Pending jobs: `sync:users:jobs` -> LIST (`LPUSH` in, `BLMOVE` out)
//! - In-flight jobs: `sync:users:jobs:processing:{consumer}` -> LIST, one per
//!   consumer so `recover` only touches its own jobs
//!
//! Every key can be placed under a namespace (`{namespace}:{key}`), which the
//! integration tests use for isolation.

use std::time::Duration;

use chrono::{DateTime, Utc};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use lambars::effect::AsyncIO;
use redis::AsyncCommands;

use crate::domain::{PrefixBounds, SyncJob, UserRecord};
use crate::infrastructure::{
    DEFAULT_CONSUMER, Delivery, EmailIndexBackend, JobQueue, ReconcileBatch, RepositoryError,
    SyncLockStore,
};

// =============================================================================
// Redis Keys
// =============================================================================

/// Key for the email index (sorted set).
const EMAIL_INDEX_KEY: &str = "users:emails";

/// Prefix for per-email record keys.
const RECORD_KEY_PREFIX: &str = "user:email:";

/// Key for the rebuild lock.
const LOCK_KEY: &str = "sync:users:lock";

/// Key for the last full-sync timestamp.
const LAST_FULL_SYNC_KEY: &str = "sync:users:last_full";

/// Key for the pending job list.
const JOBS_KEY: &str = "sync:users:jobs";

/// Prefix for per-consumer in-flight job lists.
const PROCESSING_KEY_PREFIX: &str = "sync:users:jobs:processing:";

/// Builds Redis keys, optionally under a namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedisKeys {
    namespace: Option<String>,
}

impl RedisKeys {
    /// Keys without a namespace.
    #[must_use]
    pub const fn new() -> Self {
        Self { namespace: None }
    }

    /// Keys under `namespace`.
    #[must_use]
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
        }
    }

    fn scoped(&self, key: &str) -> String {
        match &self.namespace {
            Some(namespace) => format!("{namespace}:{key}"),
            None => key.to_string(),
        }
    }

    /// Sorted set holding every indexed email.
    #[must_use]
    pub fn email_index(&self) -> String {
        self.scoped(EMAIL_INDEX_KEY)
    }

    /// Record key for `email`.
    #[must_use]
    pub fn record(&self, email: &str) -> String {
        self.scoped(&format!("{RECORD_KEY_PREFIX}{email}"))
    }

    /// Rebuild lock key.
    #[must_use]
    pub fn lock(&self) -> String {
        self.scoped(LOCK_KEY)
    }

    /// Last full-sync timestamp key.
    #[must_use]
    pub fn last_full_sync(&self) -> String {
        self.scoped(LAST_FULL_SYNC_KEY)
    }

    /// Pending job list key.
    #[must_use]
    pub fn jobs(&self) -> String {
        self.scoped(JOBS_KEY)
    }

    /// In-flight job list key for `consumer`.
    #[must_use]
    pub fn processing(&self, consumer: &str) -> String {
        self.scoped(&format!("{PROCESSING_KEY_PREFIX}{consumer}"))
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Creates a connection pool from a Redis URL.
///
/// # Errors
///
/// Returns `RepositoryError::CacheError` if the pool cannot be created.
pub fn create_pool(redis_url: &str) -> Result<Pool, RepositoryError> {
    Config::from_url(redis_url)
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|error| RepositoryError::CacheError(error.to_string()))
}

async fn connect(
    pool: &Pool,
    error: fn(String) -> RepositoryError,
) -> Result<Connection, RepositoryError> {
    pool.get().await.map_err(|e| error(e.to_string()))
}

/// Lower bound argument for `ZRANGEBYLEX`.
fn lex_min(bounds: &PrefixBounds) -> String {
    if bounds.lower.is_empty() {
        "-".to_string()
    } else {
        format!("[{}", bounds.lower)
    }
}

/// Upper bound argument for `ZRANGEBYLEX`.
fn lex_max(bounds: &PrefixBounds) -> String {
    bounds
        .upper
        .as_ref()
        .map_or_else(|| "+".to_string(), |upper| format!("({upper}"))
}

/// Appends the writes for `record` to an atomic pipeline.
fn pipe_upsert(
    pipeline: &mut redis::Pipeline,
    keys: &RedisKeys,
    record: &UserRecord,
) -> Result<(), RepositoryError> {
    let json = serde_json::to_string(record)
        .map_err(|error| RepositoryError::SerializationError(error.to_string()))?;
    pipeline
        .set(keys.record(&record.email), json)
        .ignore()
        .zadd(keys.email_index(), &record.email, 0)
        .ignore();
    Ok(())
}

/// Appends the deletes for `email` to an atomic pipeline.
fn pipe_remove(pipeline: &mut redis::Pipeline, keys: &RedisKeys, email: &str) {
    pipeline
        .del(keys.record(email))
        .ignore()
        .zrem(keys.email_index(), email)
        .ignore();
}

// =============================================================================
// Redis Email Index
// =============================================================================

/// Redis implementation of `EmailIndexBackend`.
///
/// Record and index entry are always written in the same `MULTI/EXEC`.
///
/// # Example
///
/// ```ignore
/// use user_sync_index::infrastructure::RedisEmailIndex;
///
/// let index = RedisEmailIndex::from_url("redis://localhost:6379")?;
/// index
///     .upsert(&UserRecord::new("1", "alice@demo.com", "Alice"))
///     .run_async()
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct RedisEmailIndex {
    pool: Pool,
    keys: RedisKeys,
}

impl RedisEmailIndex {
    /// Creates an index over an existing pool.
    #[must_use]
    pub const fn new(pool: Pool, keys: RedisKeys) -> Self {
        Self { pool, keys }
    }

    /// Creates an index from a Redis URL.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::CacheError` if the pool cannot be created.
    pub fn from_url(redis_url: &str) -> Result<Self, RepositoryError> {
        Ok(Self::new(create_pool(redis_url)?, RedisKeys::new()))
    }
}

impl EmailIndexBackend for RedisEmailIndex {
    fn upsert(&self, record: &UserRecord) -> AsyncIO<Result<(), RepositoryError>> {
        let pool = self.pool.clone();
        let keys = self.keys.clone();
        let record = record.clone();
        AsyncIO::new(move || async move {
            let mut pipeline = redis::pipe();
            pipeline.atomic();
            pipe_upsert(&mut pipeline, &keys, &record)?;

            let mut connection = connect(&pool, RepositoryError::CacheError).await?;
            let (): () = pipeline
                .query_async(&mut *connection)
                .await
                .map_err(|error| RepositoryError::CacheError(error.to_string()))?;
            Ok(())
        })
    }

    fn remove(&self, email: &str) -> AsyncIO<Result<(), RepositoryError>> {
        let pool = self.pool.clone();
        let keys = self.keys.clone();
        let email = email.to_string();
        AsyncIO::new(move || async move {
            let mut pipeline = redis::pipe();
            pipeline.atomic();
            pipe_remove(&mut pipeline, &keys, &email);

            let mut connection = connect(&pool, RepositoryError::CacheError).await?;
            let (): () = pipeline
                .query_async(&mut *connection)
                .await
                .map_err(|error| RepositoryError::CacheError(error.to_string()))?;
            Ok(())
        })
    }

    fn range(
        &self,
        bounds: &PrefixBounds,
        limit: usize,
    ) -> AsyncIO<Result<Vec<String>, RepositoryError>> {
        if limit == 0 {
            return AsyncIO::pure(Ok(Vec::new()));
        }
        let pool = self.pool.clone();
        let index_key = self.keys.email_index();
        let min = lex_min(bounds);
        let max = lex_max(bounds);
        AsyncIO::new(move || async move {
            let mut connection = connect(&pool, RepositoryError::CacheError).await?;
            redis::cmd("ZRANGEBYLEX")
                .arg(index_key)
                .arg(min)
                .arg(max)
                .arg("LIMIT")
                .arg(0)
                .arg(limit)
                .query_async(&mut *connection)
                .await
                .map_err(|error| RepositoryError::CacheError(error.to_string()))
        })
    }

    fn fetch(
        &self,
        emails: &[String],
    ) -> AsyncIO<Result<Vec<Option<UserRecord>>, RepositoryError>> {
        if emails.is_empty() {
            return AsyncIO::pure(Ok(Vec::new()));
        }
        let pool = self.pool.clone();
        let keys: Vec<String> = emails.iter().map(|email| self.keys.record(email)).collect();
        AsyncIO::new(move || async move {
            let mut connection = connect(&pool, RepositoryError::CacheError).await?;
            let jsons: Vec<Option<String>> = redis::cmd("MGET")
                .arg(&keys)
                .query_async(&mut *connection)
                .await
                .map_err(|error| RepositoryError::CacheError(error.to_string()))?;

            // A corrupt record reads as missing; the next rebuild rewrites it.
            let records = jsons
                .into_iter()
                .zip(&keys)
                .map(|(json, key)| {
                    json.and_then(|json| match serde_json::from_str(&json) {
                        Ok(record) => Some(record),
                        Err(error) => {
                            tracing::warn!(%error, %key, "Ignoring corrupt user record");
                            None
                        }
                    })
                })
                .collect();
            Ok(records)
        })
    }

    fn all_emails(&self) -> AsyncIO<Result<Vec<String>, RepositoryError>> {
        let pool = self.pool.clone();
        let index_key = self.keys.email_index();
        AsyncIO::new(move || async move {
            let mut connection = connect(&pool, RepositoryError::CacheError).await?;
            connection
                .zrange(index_key, 0, -1)
                .await
                .map_err(|error| RepositoryError::CacheError(error.to_string()))
        })
    }

    fn apply(&self, batch: &ReconcileBatch) -> AsyncIO<Result<(), RepositoryError>> {
        if batch.is_empty() {
            return AsyncIO::pure(Ok(()));
        }
        let pool = self.pool.clone();
        let keys = self.keys.clone();
        let batch = batch.clone();
        AsyncIO::new(move || async move {
            let mut pipeline = redis::pipe();
            pipeline.atomic();
            for record in &batch.upserts {
                pipe_upsert(&mut pipeline, &keys, record)?;
            }
            for email in &batch.removals {
                pipe_remove(&mut pipeline, &keys, email);
            }

            let mut connection = connect(&pool, RepositoryError::CacheError).await?;
            let (): () = pipeline
                .query_async(&mut *connection)
                .await
                .map_err(|error| RepositoryError::CacheError(error.to_string()))?;
            Ok(())
        })
    }
}

// =============================================================================
// Redis Sync Lock Store
// =============================================================================

/// Redis implementation of `SyncLockStore`.
///
/// The lock is a `SET key token NX PX ttl`; the token is random per attempt
/// and only identifies the holder in `MONITOR` output.
#[derive(Debug, Clone)]
pub struct RedisSyncLockStore {
    pool: Pool,
    keys: RedisKeys,
}

impl RedisSyncLockStore {
    /// Creates a lock store over an existing pool.
    #[must_use]
    pub const fn new(pool: Pool, keys: RedisKeys) -> Self {
        Self { pool, keys }
    }
}

impl SyncLockStore for RedisSyncLockStore {
    fn try_acquire(&self, ttl: Duration) -> AsyncIO<Result<bool, RepositoryError>> {
        let pool = self.pool.clone();
        let lock_key = self.keys.lock();
        let token = uuid::Uuid::new_v4().to_string();
        // PX 0 is rejected by Redis.
        let ttl_millis = u64::try_from(ttl.as_millis().max(1)).unwrap_or(u64::MAX);
        AsyncIO::new(move || async move {
            let mut connection = connect(&pool, RepositoryError::LockError).await?;
            let reply: Option<String> = redis::cmd("SET")
                .arg(lock_key)
                .arg(token)
                .arg("NX")
                .arg("PX")
                .arg(ttl_millis)
                .query_async(&mut *connection)
                .await
                .map_err(|error| RepositoryError::LockError(error.to_string()))?;
            Ok(reply.is_some())
        })
    }

    fn last_sync(&self) -> AsyncIO<Result<Option<DateTime<Utc>>, RepositoryError>> {
        let pool = self.pool.clone();
        let sync_key = self.keys.last_full_sync();
        AsyncIO::new(move || async move {
            let mut connection = connect(&pool, RepositoryError::LockError).await?;
            let millis: Option<i64> = connection
                .get(sync_key)
                .await
                .map_err(|error| RepositoryError::LockError(error.to_string()))?;
            Ok(millis.and_then(DateTime::from_timestamp_millis))
        })
    }

    fn record_sync(&self, at: DateTime<Utc>) -> AsyncIO<Result<(), RepositoryError>> {
        let pool = self.pool.clone();
        let sync_key = self.keys.last_full_sync();
        AsyncIO::new(move || async move {
            let mut connection = connect(&pool, RepositoryError::LockError).await?;
            let (): () = connection
                .set(sync_key, at.timestamp_millis())
                .await
                .map_err(|error| RepositoryError::LockError(error.to_string()))?;
            Ok(())
        })
    }
}

// =============================================================================
// Redis Job Queue
// =============================================================================

/// Redis implementation of `JobQueue`.
///
/// Producers `LPUSH` onto the pending list; a consumer `BLMOVE`s the oldest
/// job onto its own processing list and `LREM`s it once handled. `recover`
/// moves that consumer's leftovers back, so the consumer name must stay the
/// same across restarts and differ between instances.
#[derive(Debug, Clone)]
pub struct RedisJobQueue {
    pool: Pool,
    keys: RedisKeys,
    consumer: String,
}

impl RedisJobQueue {
    /// Creates a queue over an existing pool, consumed as `default`.
    #[must_use]
    pub fn new(pool: Pool, keys: RedisKeys) -> Self {
        Self {
            pool,
            keys,
            consumer: DEFAULT_CONSUMER.to_string(),
        }
    }

    /// Sets the consumer name whose processing list this handle uses.
    #[must_use]
    pub fn with_consumer(mut self, consumer: impl Into<String>) -> Self {
        self.consumer = consumer.into();
        self
    }

    fn processing_key(&self) -> String {
        self.keys.processing(&self.consumer)
    }
}

impl JobQueue for RedisJobQueue {
    fn consumer(&self) -> &str {
        &self.consumer
    }

    fn enqueue(&self, job: &SyncJob) -> AsyncIO<Result<(), RepositoryError>> {
        let pool = self.pool.clone();
        let jobs_key = self.keys.jobs();
        let payload = job.to_payload();
        AsyncIO::new(move || async move {
            let payload =
                payload.map_err(|error| RepositoryError::SerializationError(error.to_string()))?;
            let mut connection = connect(&pool, RepositoryError::QueueError).await?;
            let _: i64 = connection
                .lpush(jobs_key, payload)
                .await
                .map_err(|error| RepositoryError::QueueError(error.to_string()))?;
            Ok(())
        })
    }

    fn dequeue(&self, timeout: Duration) -> AsyncIO<Result<Option<Delivery>, RepositoryError>> {
        let pool = self.pool.clone();
        let jobs_key = self.keys.jobs();
        let processing_key = self.processing_key();
        AsyncIO::new(move || async move {
            let mut connection = connect(&pool, RepositoryError::QueueError).await?;
            let payload: Option<String> = redis::cmd("BLMOVE")
                .arg(&jobs_key)
                .arg(&processing_key)
                .arg("RIGHT")
                .arg("LEFT")
                .arg(timeout.as_secs_f64())
                .query_async(&mut *connection)
                .await
                .map_err(|error| RepositoryError::QueueError(error.to_string()))?;

            let Some(payload) = payload else {
                return Ok(None);
            };

            match SyncJob::from_payload(&payload) {
                Ok(job) => Ok(Some(Delivery { job, payload })),
                Err(error) => {
                    tracing::warn!(%error, %payload, "Dropping malformed sync job payload");
                    let _: i64 = connection
                        .lrem(&processing_key, 1, &payload)
                        .await
                        .map_err(|error| RepositoryError::QueueError(error.to_string()))?;
                    Ok(None)
                }
            }
        })
    }

    fn acknowledge(&self, delivery: &Delivery) -> AsyncIO<Result<(), RepositoryError>> {
        let pool = self.pool.clone();
        let processing_key = self.processing_key();
        let payload = delivery.payload.clone();
        AsyncIO::new(move || async move {
            let mut connection = connect(&pool, RepositoryError::QueueError).await?;
            let _: i64 = connection
                .lrem(processing_key, 1, payload)
                .await
                .map_err(|error| RepositoryError::QueueError(error.to_string()))?;
            Ok(())
        })
    }

    fn recover(&self) -> AsyncIO<Result<usize, RepositoryError>> {
        let pool = self.pool.clone();
        let jobs_key = self.keys.jobs();
        let processing_key = self.processing_key();
        AsyncIO::new(move || async move {
            let mut connection = connect(&pool, RepositoryError::QueueError).await?;
            let mut recovered = 0;
            loop {
                let moved: Option<String> = redis::cmd("LMOVE")
                    .arg(&processing_key)
                    .arg(&jobs_key)
                    .arg("RIGHT")
                    .arg("RIGHT")
                    .query_async(&mut *connection)
                    .await
                    .map_err(|error| RepositoryError::QueueError(error.to_string()))?;
                if moved.is_none() {
                    break;
                }
                recovered += 1;
            }
            Ok(recovered)
        })
    }

    fn pending(&self) -> AsyncIO<Result<usize, RepositoryError>> {
        let pool = self.pool.clone();
        let jobs_key = self.keys.jobs();
        AsyncIO::new(move || async move {
            let mut connection = connect(&pool, RepositoryError::QueueError).await?;
            connection
                .llen(jobs_key)
                .await
                .map_err(|error| RepositoryError::QueueError(error.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn test_keys_without_namespace() {
        let keys = RedisKeys::new();
        assert_eq!(keys.email_index(), "users:emails");
        assert_eq!(keys.record("alice@demo.com"), "user:email:alice@demo.com");
        assert_eq!(keys.lock(), "sync:users:lock");
        assert_eq!(keys.last_full_sync(), "sync:users:last_full");
        assert_eq!(keys.jobs(), "sync:users:jobs");
        assert_eq!(keys.processing("api-1"), "sync:users:jobs:processing:api-1");
    }

    #[rstest]
    fn test_keys_with_namespace() {
        let keys = RedisKeys::with_namespace("test-1");
        assert_eq!(keys.email_index(), "test-1:users:emails");
        assert_eq!(keys.record("a@b.c"), "test-1:user:email:a@b.c");
    }

    #[rstest]
    #[case("al", "[al", "(am")]
    #[case("", "-", "+")]
    #[case("\u{10FFFF}", "[\u{10FFFF}", "+")]
    fn test_lex_arguments(#[case] prefix: &str, #[case] min: &str, #[case] max: &str) {
        let bounds = PrefixBounds::for_prefix(prefix);
        assert_eq!(lex_min(&bounds), min);
        assert_eq!(lex_max(&bounds), max);
    }

    #[rstest]
    fn test_create_pool_from_url() {
        // deadpool-redis defers connecting, so only URL parsing can fail here
        let result = create_pool("redis://localhost:6379");
        assert!(result.is_ok());
    }

    #[rstest]
    fn test_queue_consumers_use_separate_processing_lists() {
        let pool = create_pool("redis://localhost:6379").unwrap();
        let first = RedisJobQueue::new(pool.clone(), RedisKeys::new());
        let second = RedisJobQueue::new(pool, RedisKeys::new()).with_consumer("api-2");

        assert_eq!(first.consumer(), "default");
        assert_eq!(second.consumer(), "api-2");
        assert_ne!(first.processing_key(), second.processing_key());
        assert_eq!(first.keys.jobs(), second.keys.jobs());
    }
}
