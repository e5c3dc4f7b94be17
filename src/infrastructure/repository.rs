//! Infrastructure traits for the email index subsystem.
//!
//! Every backing service sits behind a trait so the scheduler, worker and
//! reader are built from injected `Arc<dyn …>` clients:
//!
//! - [`EmailIndexBackend`]: sorted email index plus per-email records
//! - [`SyncLockStore`]: rebuild lock and last-sync timestamp
//! - [`JobQueue`]: durable sync job queue
//! - [`UserSource`]: access to the primary user table
//!
//! All methods return `AsyncIO` so a call only describes the effect; nothing
//! touches the backing service until the caller runs it with `run_async`.
//!
//! # Example
//!
//! ```ignore
//! let emails = index.range(&PrefixBounds::for_prefix("al"), 10).run_async().await?;
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use lambars::effect::AsyncIO;
use thiserror::Error;

use crate::domain::{PrefixBounds, SyncJob, UserRecord};

// =============================================================================
// Repository Error
// =============================================================================

/// Errors that can occur while talking to a backing service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// Primary datastore error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Cache tier (index) error.
    #[error("Cache error: {0}")]
    CacheError(String),

    /// Job queue error.
    #[error("Queue error: {0}")]
    QueueError(String),

    /// Lock store error.
    #[error("Lock store error: {0}")]
    LockError(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

// =============================================================================
// Reconcile Batch
// =============================================================================

/// A set of index writes that must become visible together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileBatch {
    /// Records to write; each is keyed by its own email.
    pub upserts: Vec<UserRecord>,
    /// Emails to drop from both the sorted index and the record store.
    pub removals: Vec<String>,
}

impl ReconcileBatch {
    /// Returns true if the batch contains no writes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removals.is_empty()
    }
}

// =============================================================================
// Email Index Backend
// =============================================================================

/// Storage for the sorted email index and its denormalized records.
///
/// Implementations must write or delete a record and its index entry
/// together, never one without the other.
pub trait EmailIndexBackend: Send + Sync {
    /// Writes `record` under `record.email`, replacing any existing record.
    fn upsert(&self, record: &UserRecord) -> AsyncIO<Result<(), RepositoryError>>;

    /// Removes the entry and record for `email`. Absent emails are a no-op.
    fn remove(&self, email: &str) -> AsyncIO<Result<(), RepositoryError>>;

    /// Returns up to `limit` emails inside `bounds`, ascending.
    fn range(
        &self,
        bounds: &PrefixBounds,
        limit: usize,
    ) -> AsyncIO<Result<Vec<String>, RepositoryError>>;

    /// Looks up the record for each email; missing records are `None`.
    fn fetch(
        &self,
        emails: &[String],
    ) -> AsyncIO<Result<Vec<Option<UserRecord>>, RepositoryError>>;

    /// Returns every email currently in the index.
    fn all_emails(&self) -> AsyncIO<Result<Vec<String>, RepositoryError>>;

    /// Applies `batch` so readers observe either none or all of it.
    fn apply(&self, batch: &ReconcileBatch) -> AsyncIO<Result<(), RepositoryError>>;
}

// =============================================================================
// Sync Lock Store
// =============================================================================

/// Holder of the rebuild lock and the last full-sync timestamp.
pub trait SyncLockStore: Send + Sync {
    /// Tries to take the rebuild lock for `ttl`.
    ///
    /// Returns `Ok(true)` if this caller now holds it, `Ok(false)` if someone
    /// else does. The lock is never released explicitly; it expires.
    fn try_acquire(&self, ttl: Duration) -> AsyncIO<Result<bool, RepositoryError>>;

    /// Returns the time of the last scheduled full sync, if any.
    fn last_sync(&self) -> AsyncIO<Result<Option<DateTime<Utc>>, RepositoryError>>;

    /// Records `at` as the time of the last full sync.
    fn record_sync(&self, at: DateTime<Utc>) -> AsyncIO<Result<(), RepositoryError>>;
}

// =============================================================================
// Job Queue
// =============================================================================

/// Consumer name used when none is configured.
pub const DEFAULT_CONSUMER: &str = "default";

/// A job handed to a consumer, together with the payload needed to
/// acknowledge it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// The parsed job.
    pub job: SyncJob,
    /// The raw payload as stored in the queue.
    pub payload: String,
}

/// Durable work queue with at-least-once delivery.
///
/// Every queue handle belongs to one named consumer. A dequeued job stays in
/// that consumer's in-flight list until acknowledged, so a consumer restarted
/// under the same name can take back what it held when it died.
pub trait JobQueue: Send + Sync {
    /// Name of the consumer this handle dequeues for.
    fn consumer(&self) -> &str;

    /// Appends `job` to the pending queue.
    fn enqueue(&self, job: &SyncJob) -> AsyncIO<Result<(), RepositoryError>>;

    /// Waits up to `timeout` for the next job.
    ///
    /// Payloads that fail to parse are dropped and logged; the call then
    /// returns `Ok(None)`.
    fn dequeue(&self, timeout: Duration) -> AsyncIO<Result<Option<Delivery>, RepositoryError>>;

    /// Marks `delivery` as done so it is never redelivered.
    fn acknowledge(&self, delivery: &Delivery) -> AsyncIO<Result<(), RepositoryError>>;

    /// Moves this consumer's in-flight jobs back to pending; returns how many
    /// moved.
    ///
    /// Jobs held by other consumers are left alone, so starting a second
    /// instance never replays work a live peer is still processing.
    fn recover(&self) -> AsyncIO<Result<usize, RepositoryError>>;

    /// Number of pending (not in-flight) jobs.
    fn pending(&self) -> AsyncIO<Result<usize, RepositoryError>>;
}

// =============================================================================
// User Source
// =============================================================================

/// Access to the authoritative user table.
pub trait UserSource: Send + Sync {
    /// Stores `user` if this service owns the table.
    ///
    /// Returns `Ok(false)` when the table belongs to another application and
    /// nothing was written.
    fn save(&self, user: &UserRecord) -> AsyncIO<Result<bool, RepositoryError>>;

    /// Loads every user.
    fn load_all(&self) -> AsyncIO<Result<Vec<UserRecord>, RepositoryError>>;

    /// Case-insensitive substring search over email, ascending by email.
    fn search_substring(
        &self,
        query: &str,
        limit: usize,
    ) -> AsyncIO<Result<Vec<UserRecord>, RepositoryError>>;
}
