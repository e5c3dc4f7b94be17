//! Common test helpers for integration tests.
//!
//! Builds the whole sync pipeline over in-memory backends so a test can
//! seed the user table, drift the index, run jobs and search.
//!
//! # Note
//!
//! `#![allow(dead_code)]` is needed because every integration test file is
//! compiled as its own crate and uses a different subset of these helpers.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;

use user_sync_index::api::AppState;
use user_sync_index::domain::{ManualClock, SyncJob, UserRecord};
use user_sync_index::infrastructure::{
    Backends, InMemoryEmailIndex, InMemoryJobQueue, InMemorySyncLockStore, InMemoryUserSource,
    JobQueue,
};
use user_sync_index::sync::{
    EmailIndexStore, JobOutcome, PrefixSearchReader, SyncConfig, SyncScheduler, SyncWorker,
};

/// Fixed start time for manual clocks.
pub const START_MILLIS: i64 = 1_700_000_000_000;

pub fn alice() -> UserRecord {
    UserRecord::new("1", "alice@demo.com", "Alice")
}

pub fn alan() -> UserRecord {
    UserRecord::new("2", "alan@demo.com", "Alan")
}

pub fn bob() -> UserRecord {
    UserRecord::new("3", "bob@demo.com", "Bob")
}

/// Every component wired over shared in-memory backends.
pub struct Harness {
    pub index: InMemoryEmailIndex,
    pub users: InMemoryUserSource,
    pub queue: InMemoryJobQueue,
    pub lock_store: InMemorySyncLockStore,
    pub clock: Arc<ManualClock>,
    pub config: SyncConfig,
    pub store: EmailIndexStore,
    pub worker: SyncWorker,
    pub scheduler: SyncScheduler,
    pub reader: PrefixSearchReader,
}

impl Harness {
    pub fn new(users: impl IntoIterator<Item = UserRecord>) -> Self {
        Self::with_config(users, SyncConfig::default())
    }

    pub fn with_config(users: impl IntoIterator<Item = UserRecord>, config: SyncConfig) -> Self {
        let index = InMemoryEmailIndex::new();
        let users = InMemoryUserSource::with_users(users);
        let queue = InMemoryJobQueue::new();
        let lock_store = InMemorySyncLockStore::new();
        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp_millis(START_MILLIS).expect("valid timestamp"),
        ));

        let store = EmailIndexStore::new(Arc::new(index.clone()));
        let worker = SyncWorker::new(
            store.clone(),
            Arc::new(users.clone()),
            Arc::new(queue.clone()),
            Duration::from_millis(20),
        );
        let scheduler = SyncScheduler::new(
            Arc::new(lock_store.clone()),
            Arc::new(queue.clone()),
            clock.clone(),
            config.min_interval,
            config.lock_ttl,
        );
        let reader = PrefixSearchReader::new(store.clone());

        Self {
            index,
            users,
            queue,
            lock_store,
            clock,
            config,
            store,
            worker,
            scheduler,
            reader,
        }
    }

    /// Backends sharing this harness' state, for building an `AppState`.
    pub fn backends(&self) -> Backends {
        Backends {
            index: Arc::new(self.index.clone()),
            lock_store: Arc::new(self.lock_store.clone()),
            queue: Arc::new(self.queue.clone()),
            users: Arc::new(self.users.clone()),
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState::from_backends(&self.backends(), &self.config, self.clock.clone())
    }

    pub async fn full_rebuild(&self) -> JobOutcome {
        self.worker.process(&SyncJob::FullRebuild).await
    }

    pub async fn upsert_one(&self, record: UserRecord) -> JobOutcome {
        self.worker.process(&SyncJob::UpsertOne(record)).await
    }

    /// Runs every queued job to completion and acknowledges it.
    pub async fn drain_queue(&self) -> Vec<JobOutcome> {
        let mut outcomes = Vec::new();
        while let Some(delivery) = self
            .queue
            .dequeue(Duration::from_millis(10))
            .run_async()
            .await
            .expect("queue available")
        {
            outcomes.push(self.worker.process(&delivery.job).await);
            self.queue
                .acknowledge(&delivery)
                .run_async()
                .await
                .expect("queue available");
        }
        outcomes
    }

    /// Advances the manual clock and the tokio clock together.
    ///
    /// Only valid inside a test with paused tokio time.
    pub async fn advance(&self, by: Duration) {
        tokio::time::advance(by).await;
        self.clock
            .advance(chrono::Duration::from_std(by).expect("duration in range"));
    }
}
