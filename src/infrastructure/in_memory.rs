//! In-memory backend implementations.
//!
//! These back every infrastructure trait with process-local state. They are
//! used in development mode (`CACHE_MODE=in_memory`, `STORAGE_MODE=in_memory`)
//! and throughout the test suite.
//!
//! # Features
//!
//! - Thread-safe with `Arc<RwLock<...>>` / `Arc<Mutex<...>>`
//! - `PersistentTreeMap` storage, so range scans match Redis' lex order and
//!   a batch swaps in a whole new map under one write lock
//! - Lock TTLs measured with `tokio::time::Instant`, so paused test time
//!   controls expiry
//! - Outage simulation via `set_available(false)`
//! - All operations return `AsyncIO` for effect encapsulation

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lambars::effect::AsyncIO;
use lambars::persistent::PersistentTreeMap;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::Instant;

use crate::domain::{PrefixBounds, SyncJob, UserRecord};
use crate::infrastructure::{
    DEFAULT_CONSUMER, Delivery, EmailIndexBackend, JobQueue, ReconcileBatch, RepositoryError,
    SyncLockStore, UserSource,
};

// =============================================================================
// Availability Switch
// =============================================================================

/// Shared on/off switch used to simulate an unreachable service.
#[derive(Debug, Clone)]
struct Availability {
    available: Arc<AtomicBool>,
}

impl Availability {
    fn new() -> Self {
        Self {
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    fn set(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self, error: fn(String) -> RepositoryError) -> Result<(), RepositoryError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(error("service unavailable".to_string()))
        }
    }
}

// =============================================================================
// In-Memory Email Index
// =============================================================================

/// In-memory implementation of `EmailIndexBackend`.
///
/// A single `PersistentTreeMap` from email to record serves as both the
/// sorted index and the record store, so the two can never disagree.
#[derive(Debug, Clone)]
pub struct InMemoryEmailIndex {
    entries: Arc<RwLock<PersistentTreeMap<String, UserRecord>>>,
    availability: Availability,
}

impl InMemoryEmailIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(PersistentTreeMap::new())),
            availability: Availability::new(),
        }
    }

    /// Makes every subsequent call fail (`false`) or succeed (`true`).
    pub fn set_available(&self, available: bool) {
        self.availability.set(available);
    }

    /// Returns a copy of the stored records, ascending by email.
    pub async fn snapshot(&self) -> Vec<UserRecord> {
        self.entries.read().await.values().cloned().collect()
    }

    /// Writes a record under an arbitrary key, bypassing the email invariant.
    ///
    /// Used to seed drifted state in tests.
    pub async fn insert_raw(&self, key: impl Into<String>, record: UserRecord) {
        let mut guard = self.entries.write().await;
        *guard = guard.insert(key.into(), record);
    }
}

impl Default for InMemoryEmailIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::significant_drop_tightening)]
impl EmailIndexBackend for InMemoryEmailIndex {
    fn upsert(&self, record: &UserRecord) -> AsyncIO<Result<(), RepositoryError>> {
        let entries = Arc::clone(&self.entries);
        let availability = self.availability.clone();
        let record = record.clone();
        AsyncIO::new(move || async move {
            availability.check(RepositoryError::CacheError)?;
            let mut guard = entries.write().await;
            *guard = guard.insert(record.email.clone(), record);
            Ok(())
        })
    }

    fn remove(&self, email: &str) -> AsyncIO<Result<(), RepositoryError>> {
        let entries = Arc::clone(&self.entries);
        let availability = self.availability.clone();
        let email = email.to_string();
        AsyncIO::new(move || async move {
            availability.check(RepositoryError::CacheError)?;
            let mut guard = entries.write().await;
            *guard = guard.remove(&email);
            Ok(())
        })
    }

    fn range(
        &self,
        bounds: &PrefixBounds,
        limit: usize,
    ) -> AsyncIO<Result<Vec<String>, RepositoryError>> {
        let entries = Arc::clone(&self.entries);
        let availability = self.availability.clone();
        let bounds = bounds.clone();
        AsyncIO::new(move || async move {
            availability.check(RepositoryError::CacheError)?;
            let guard = entries.read().await;
            let emails = guard
                .range(bounds.lower.clone()..)
                .map(|(email, _)| email)
                .take_while(|email| bounds.contains(email))
                .take(limit)
                .cloned()
                .collect();
            Ok(emails)
        })
    }

    fn fetch(
        &self,
        emails: &[String],
    ) -> AsyncIO<Result<Vec<Option<UserRecord>>, RepositoryError>> {
        let entries = Arc::clone(&self.entries);
        let availability = self.availability.clone();
        let emails = emails.to_vec();
        AsyncIO::new(move || async move {
            availability.check(RepositoryError::CacheError)?;
            let guard = entries.read().await;
            Ok(emails.iter().map(|email| guard.get(email).cloned()).collect())
        })
    }

    fn all_emails(&self) -> AsyncIO<Result<Vec<String>, RepositoryError>> {
        let entries = Arc::clone(&self.entries);
        let availability = self.availability.clone();
        AsyncIO::new(move || async move {
            availability.check(RepositoryError::CacheError)?;
            Ok(entries.read().await.keys().cloned().collect())
        })
    }

    fn apply(&self, batch: &ReconcileBatch) -> AsyncIO<Result<(), RepositoryError>> {
        let entries = Arc::clone(&self.entries);
        let availability = self.availability.clone();
        let batch = batch.clone();
        AsyncIO::new(move || async move {
            availability.check(RepositoryError::CacheError)?;
            let mut guard = entries.write().await;
            let upserted = batch
                .upserts
                .into_iter()
                .fold(guard.clone(), |map, record| {
                    map.insert(record.email.clone(), record)
                });
            *guard = batch
                .removals
                .iter()
                .fold(upserted, |map, email| map.remove(email));
            Ok(())
        })
    }
}

// =============================================================================
// In-Memory Sync Lock Store
// =============================================================================

#[derive(Debug, Default)]
struct LockState {
    held_until: Option<Instant>,
    last_sync: Option<DateTime<Utc>>,
}

/// In-memory implementation of `SyncLockStore`.
///
/// The lock expires at `acquired_at + ttl` on the tokio clock.
#[derive(Debug, Clone)]
pub struct InMemorySyncLockStore {
    state: Arc<Mutex<LockState>>,
    availability: Availability,
}

impl InMemorySyncLockStore {
    /// Creates a store with no lock held and no recorded sync.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LockState::default())),
            availability: Availability::new(),
        }
    }

    /// Makes every subsequent call fail (`false`) or succeed (`true`).
    pub fn set_available(&self, available: bool) {
        self.availability.set(available);
    }
}

impl Default for InMemorySyncLockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::significant_drop_tightening)]
impl SyncLockStore for InMemorySyncLockStore {
    fn try_acquire(&self, ttl: Duration) -> AsyncIO<Result<bool, RepositoryError>> {
        let state = Arc::clone(&self.state);
        let availability = self.availability.clone();
        AsyncIO::new(move || async move {
            availability.check(RepositoryError::LockError)?;
            let mut state = state.lock().await;
            let now = Instant::now();
            if state.held_until.is_some_and(|deadline| deadline > now) {
                return Ok(false);
            }
            state.held_until = Some(now + ttl);
            Ok(true)
        })
    }

    fn last_sync(&self) -> AsyncIO<Result<Option<DateTime<Utc>>, RepositoryError>> {
        let state = Arc::clone(&self.state);
        let availability = self.availability.clone();
        AsyncIO::new(move || async move {
            availability.check(RepositoryError::LockError)?;
            Ok(state.lock().await.last_sync)
        })
    }

    fn record_sync(&self, at: DateTime<Utc>) -> AsyncIO<Result<(), RepositoryError>> {
        let state = Arc::clone(&self.state);
        let availability = self.availability.clone();
        AsyncIO::new(move || async move {
            availability.check(RepositoryError::LockError)?;
            state.lock().await.last_sync = Some(at);
            Ok(())
        })
    }
}

// =============================================================================
// In-Memory Job Queue
// =============================================================================

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<String>,
    /// In-flight payloads per consumer name.
    in_flight: HashMap<String, Vec<String>>,
}

impl QueueState {
    fn release(&mut self, consumer: &str, payload: &str) {
        if let Some(held) = self.in_flight.get_mut(consumer)
            && let Some(position) = held.iter().position(|p| p == payload)
        {
            held.remove(position);
        }
    }
}

/// In-memory implementation of `JobQueue`.
///
/// Jobs are stored as serialized payloads, FIFO. Handles made with
/// [`InMemoryJobQueue::for_consumer`] share the queue but track their own
/// in-flight jobs.
#[derive(Debug, Clone)]
pub struct InMemoryJobQueue {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
    availability: Availability,
    consumer: String,
}

impl InMemoryJobQueue {
    /// Creates an empty queue consumed as `default`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            notify: Arc::new(Notify::new()),
            availability: Availability::new(),
            consumer: DEFAULT_CONSUMER.to_string(),
        }
    }

    /// Returns a handle on the same queue for another consumer.
    #[must_use]
    pub fn for_consumer(&self, consumer: impl Into<String>) -> Self {
        Self {
            consumer: consumer.into(),
            ..self.clone()
        }
    }

    /// Makes every subsequent call fail (`false`) or succeed (`true`).
    pub fn set_available(&self, available: bool) {
        self.availability.set(available);
    }

    /// Pushes a raw payload, bypassing serialization.
    pub async fn push_raw(&self, payload: impl Into<String>) {
        self.state.lock().await.pending.push_back(payload.into());
        self.notify.notify_one();
    }

    /// Returns the parsed pending jobs in queue order.
    pub async fn pending_jobs(&self) -> Vec<SyncJob> {
        self.state
            .lock()
            .await
            .pending
            .iter()
            .filter_map(|payload| SyncJob::from_payload(payload).ok())
            .collect()
    }

    /// Number of jobs this consumer holds without having acknowledged them.
    pub async fn in_flight(&self) -> usize {
        self.state
            .lock()
            .await
            .in_flight
            .get(&self.consumer)
            .map_or(0, Vec::len)
    }

    async fn pop(&self) -> Option<String> {
        let mut state = self.state.lock().await;
        let payload = state.pending.pop_front()?;
        state
            .in_flight
            .entry(self.consumer.clone())
            .or_default()
            .push(payload.clone());
        Some(payload)
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::significant_drop_tightening)]
impl JobQueue for InMemoryJobQueue {
    fn consumer(&self) -> &str {
        &self.consumer
    }

    fn enqueue(&self, job: &SyncJob) -> AsyncIO<Result<(), RepositoryError>> {
        let queue = self.clone();
        let payload = job.to_payload();
        AsyncIO::new(move || async move {
            queue.availability.check(RepositoryError::QueueError)?;
            let payload =
                payload.map_err(|error| RepositoryError::SerializationError(error.to_string()))?;
            queue.push_raw(payload).await;
            Ok(())
        })
    }

    fn dequeue(&self, timeout: Duration) -> AsyncIO<Result<Option<Delivery>, RepositoryError>> {
        let queue = self.clone();
        AsyncIO::new(move || async move {
            queue.availability.check(RepositoryError::QueueError)?;
            let deadline = Instant::now() + timeout;
            let payload = loop {
                if let Some(payload) = queue.pop().await {
                    break payload;
                }
                if tokio::time::timeout_at(deadline, queue.notify.notified())
                    .await
                    .is_err()
                {
                    return Ok(None);
                }
            };

            match SyncJob::from_payload(&payload) {
                Ok(job) => Ok(Some(Delivery { job, payload })),
                Err(error) => {
                    tracing::warn!(%error, %payload, "Dropping malformed sync job payload");
                    queue.state.lock().await.release(&queue.consumer, &payload);
                    Ok(None)
                }
            }
        })
    }

    fn acknowledge(&self, delivery: &Delivery) -> AsyncIO<Result<(), RepositoryError>> {
        let queue = self.clone();
        let payload = delivery.payload.clone();
        AsyncIO::new(move || async move {
            queue.availability.check(RepositoryError::QueueError)?;
            queue.state.lock().await.release(&queue.consumer, &payload);
            Ok(())
        })
    }

    fn recover(&self) -> AsyncIO<Result<usize, RepositoryError>> {
        let queue = self.clone();
        AsyncIO::new(move || async move {
            queue.availability.check(RepositoryError::QueueError)?;
            let mut state = queue.state.lock().await;
            let recovered = state.in_flight.remove(&queue.consumer).unwrap_or_default();
            let count = recovered.len();
            for payload in recovered.into_iter().rev() {
                state.pending.push_front(payload);
            }
            drop(state);
            if count > 0 {
                queue.notify.notify_one();
            }
            Ok(count)
        })
    }

    fn pending(&self) -> AsyncIO<Result<usize, RepositoryError>> {
        let queue = self.clone();
        AsyncIO::new(move || async move {
            queue.availability.check(RepositoryError::QueueError)?;
            Ok(queue.state.lock().await.pending.len())
        })
    }
}

// =============================================================================
// In-Memory User Source
// =============================================================================

/// In-memory user table, keyed by user id.
///
/// This is the table of record in `STORAGE_MODE=in_memory`, so `save` writes
/// to it.
#[derive(Debug, Clone)]
pub struct InMemoryUserSource {
    users: Arc<RwLock<PersistentTreeMap<String, UserRecord>>>,
    availability: Availability,
}

impl InMemoryUserSource {
    /// Creates an empty user table.
    #[must_use]
    pub fn new() -> Self {
        Self::with_users([])
    }

    /// Creates a user table holding `users`.
    #[must_use]
    pub fn with_users(users: impl IntoIterator<Item = UserRecord>) -> Self {
        let users: PersistentTreeMap<String, UserRecord> = users
            .into_iter()
            .map(|user| (user.id.clone(), user))
            .collect();
        Self {
            users: Arc::new(RwLock::new(users)),
            availability: Availability::new(),
        }
    }

    /// Inserts or replaces a user row.
    pub async fn put(&self, user: UserRecord) {
        let mut guard = self.users.write().await;
        *guard = guard.insert(user.id.clone(), user);
    }

    /// Deletes a user row by id; returns true if it existed.
    pub async fn delete(&self, id: &str) -> bool {
        let mut guard = self.users.write().await;
        if !guard.contains_key(id) {
            return false;
        }
        *guard = guard.remove(id);
        true
    }

    /// Makes every subsequent call fail (`false`) or succeed (`true`).
    pub fn set_available(&self, available: bool) {
        self.availability.set(available);
    }
}

impl Default for InMemoryUserSource {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::significant_drop_tightening)]
impl UserSource for InMemoryUserSource {
    fn save(&self, user: &UserRecord) -> AsyncIO<Result<bool, RepositoryError>> {
        let source = self.clone();
        let user = user.clone();
        AsyncIO::new(move || async move {
            source.availability.check(RepositoryError::DatabaseError)?;
            source.put(user).await;
            Ok(true)
        })
    }

    fn load_all(&self) -> AsyncIO<Result<Vec<UserRecord>, RepositoryError>> {
        let users = Arc::clone(&self.users);
        let availability = self.availability.clone();
        AsyncIO::new(move || async move {
            availability.check(RepositoryError::DatabaseError)?;
            Ok(users.read().await.values().cloned().collect())
        })
    }

    fn search_substring(
        &self,
        query: &str,
        limit: usize,
    ) -> AsyncIO<Result<Vec<UserRecord>, RepositoryError>> {
        let users = Arc::clone(&self.users);
        let availability = self.availability.clone();
        let needle = query.to_lowercase();
        AsyncIO::new(move || async move {
            availability.check(RepositoryError::DatabaseError)?;
            let mut matches: Vec<UserRecord> = users
                .read()
                .await
                .values()
                .filter(|user| user.email.to_lowercase().contains(&needle))
                .cloned()
                .collect();
            matches.sort_by(|left, right| left.email.cmp(&right.email));
            matches.truncate(limit);
            Ok(matches)
        })
    }
}
