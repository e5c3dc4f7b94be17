//! Redis integration tests for the index, lock store and job queue.
//!
//! All tests are `#[ignore]`d and need Redis on `localhost:6379`. Each test
//! works under its own random key namespace and deletes it afterwards.
//!
//! # Running the tests
//!
//! ```bash
//! docker run -d -p 6379:6379 redis:7-alpine
//! cargo test --test redis_integration -- --ignored
//! ```

use std::sync::Arc;
use std::time::Duration;

use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use rstest::rstest;

use user_sync_index::domain::{JobState, ManualClock, PrefixBounds, SyncJob, UserRecord};
use user_sync_index::infrastructure::{
    EmailIndexBackend, InMemoryUserSource, JobQueue, RedisEmailIndex, RedisJobQueue, RedisKeys,
    RedisSyncLockStore, SyncLockStore,
};
use user_sync_index::sync::{
    EmailIndexStore, PrefixSearchReader, ScheduleOutcome, SyncScheduler, SyncWorker,
};

// =============================================================================
// Test Fixtures
// =============================================================================

const REDIS_URL: &str = "redis://localhost:6379";

fn create_test_pool() -> Pool {
    Config::from_url(REDIS_URL)
        .create_pool(Some(Runtime::Tokio1))
        .expect("Failed to create Redis pool")
}

/// A pool plus a namespace unique to one test.
struct RedisFixture {
    pool: Pool,
    namespace: String,
}

impl RedisFixture {
    fn new() -> Self {
        Self {
            pool: create_test_pool(),
            namespace: format!("test-{}", uuid::Uuid::new_v4()),
        }
    }

    fn keys(&self) -> RedisKeys {
        RedisKeys::with_namespace(self.namespace.clone())
    }

    fn index(&self) -> RedisEmailIndex {
        RedisEmailIndex::new(self.pool.clone(), self.keys())
    }

    fn lock_store(&self) -> RedisSyncLockStore {
        RedisSyncLockStore::new(self.pool.clone(), self.keys())
    }

    fn queue(&self) -> RedisJobQueue {
        RedisJobQueue::new(self.pool.clone(), self.keys())
    }

    async fn cleanup(&self) {
        let mut connection = self.pool.get().await.expect("Failed to get connection");
        let keys: Vec<String> = connection
            .keys(format!("{}:*", self.namespace))
            .await
            .unwrap_or_default();
        for key in keys {
            let _: () = connection.del(&key).await.unwrap_or_default();
        }
    }
}

fn alice() -> UserRecord {
    UserRecord::new("1", "alice@demo.com", "Alice")
}

fn alan() -> UserRecord {
    UserRecord::new("2", "alan@demo.com", "Alan")
}

// =============================================================================
// Email Index
// =============================================================================

#[rstest]
#[tokio::test]
#[ignore = "requires Redis running on localhost:6379"]
async fn redis_index_upsert_range_fetch() {
    let fixture = RedisFixture::new();
    let index = fixture.index();

    index.upsert(&alice()).run_async().await.unwrap();
    index.upsert(&alice()).run_async().await.unwrap();
    index.upsert(&alan()).run_async().await.unwrap();
    index
        .upsert(&UserRecord::new("3", "bob@demo.com", "Bob"))
        .run_async()
        .await
        .unwrap();

    let emails = index
        .range(&PrefixBounds::for_prefix("al"), 10)
        .run_async()
        .await
        .unwrap();
    assert_eq!(emails, vec!["alan@demo.com", "alice@demo.com"]);

    let records = index.fetch(&emails).run_async().await.unwrap();
    assert_eq!(records, vec![Some(alan()), Some(alice())]);

    index.remove("alan@demo.com").run_async().await.unwrap();
    assert_eq!(
        index.all_emails().run_async().await.unwrap(),
        vec!["alice@demo.com", "bob@demo.com"]
    );

    fixture.cleanup().await;
}

#[rstest]
#[tokio::test]
#[ignore = "requires Redis running on localhost:6379"]
async fn redis_index_corrupt_record_reads_as_missing() {
    let fixture = RedisFixture::new();
    let index = fixture.index();
    index.upsert(&alice()).run_async().await.unwrap();

    let mut connection = fixture.pool.get().await.unwrap();
    let (): () = connection
        .set(fixture.keys().record("alice@demo.com"), "{not json")
        .await
        .unwrap();

    let records = index.fetch(&["alice@demo.com".to_string()]).run_async().await.unwrap();
    assert_eq!(records, vec![None]);

    fixture.cleanup().await;
}

#[rstest]
#[tokio::test]
#[ignore = "requires Redis running on localhost:6379"]
async fn redis_full_rebuild_end_to_end() {
    let fixture = RedisFixture::new();
    let store = EmailIndexStore::new(Arc::new(fixture.index()));
    let users = InMemoryUserSource::with_users([alice(), alan()]);
    store
        .upsert(&UserRecord::new("9", "ghost@demo.com", "Ghost"))
        .await;

    let worker = SyncWorker::new(
        store.clone(),
        Arc::new(users.clone()),
        Arc::new(fixture.queue()),
        Duration::from_secs(1),
    );
    assert_eq!(
        worker.process(&SyncJob::FullRebuild).await.state,
        JobState::Completed
    );

    let reader = PrefixSearchReader::new(store.clone());
    assert_eq!(reader.search("al", 10).await, vec![alan(), alice()]);
    assert!(reader.search("ghost", 10).await.is_empty());

    users.delete("2").await;
    worker.process(&SyncJob::FullRebuild).await;
    assert_eq!(reader.search("al", 10).await, vec![alice()]);

    fixture.cleanup().await;
}

// =============================================================================
// Lock Store
// =============================================================================

#[rstest]
#[tokio::test]
#[ignore = "requires Redis running on localhost:6379"]
async fn redis_lock_is_exclusive_and_expires() {
    let fixture = RedisFixture::new();
    let lock_store = fixture.lock_store();
    let ttl = Duration::from_millis(300);

    assert!(lock_store.try_acquire(ttl).run_async().await.unwrap());
    assert!(!lock_store.try_acquire(ttl).run_async().await.unwrap());

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(lock_store.try_acquire(ttl).run_async().await.unwrap());

    fixture.cleanup().await;
}

#[rstest]
#[tokio::test]
#[ignore = "requires Redis running on localhost:6379"]
async fn redis_scheduler_concurrent_callers() {
    let fixture = RedisFixture::new();
    let clock = Arc::new(ManualClock::default());

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let scheduler = SyncScheduler::new(
                Arc::new(fixture.lock_store()),
                Arc::new(fixture.queue()),
                clock.clone(),
                Duration::from_secs(300),
                Duration::from_secs(30),
            );
            tokio::spawn(async move { scheduler.schedule().await })
        })
        .collect();

    let mut enqueued = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() == ScheduleOutcome::Enqueued {
            enqueued += 1;
        }
    }
    assert_eq!(enqueued, 1);
    assert_eq!(fixture.queue().pending().run_async().await.unwrap(), 1);

    fixture.cleanup().await;
}

// =============================================================================
// Job Queue
// =============================================================================

#[rstest]
#[tokio::test]
#[ignore = "requires Redis running on localhost:6379"]
async fn redis_queue_delivers_fifo_and_recovers() {
    let fixture = RedisFixture::new();
    let queue = fixture.queue();

    queue.enqueue(&SyncJob::FullRebuild).run_async().await.unwrap();
    queue.enqueue(&SyncJob::UpsertOne(alice())).run_async().await.unwrap();

    let first = queue
        .dequeue(Duration::from_secs(1))
        .run_async()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.job, SyncJob::FullRebuild);
    queue.acknowledge(&first).run_async().await.unwrap();

    // Dequeued but never acknowledged, as if the consumer crashed.
    let lost = queue
        .dequeue(Duration::from_secs(1))
        .run_async()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(lost.job, SyncJob::UpsertOne(alice()));
    assert_eq!(queue.pending().run_async().await.unwrap(), 0);

    assert_eq!(queue.recover().run_async().await.unwrap(), 1);
    let redelivered = queue
        .dequeue(Duration::from_secs(1))
        .run_async()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(redelivered.job, SyncJob::UpsertOne(alice()));
    queue.acknowledge(&redelivered).run_async().await.unwrap();

    assert!(queue.dequeue(Duration::from_secs(1)).run_async().await.unwrap().is_none());

    fixture.cleanup().await;
}

#[rstest]
#[tokio::test]
#[ignore = "requires Redis running on localhost:6379"]
async fn redis_queue_drops_malformed_payload() {
    let fixture = RedisFixture::new();
    let queue = fixture.queue();

    let mut connection = fixture.pool.get().await.unwrap();
    let _: i64 = connection
        .lpush(fixture.keys().jobs(), "{\"kind\":\"nonsense\"}")
        .await
        .unwrap();

    assert!(queue.dequeue(Duration::from_secs(1)).run_async().await.unwrap().is_none());
    let processing: i64 = connection.llen(fixture.keys().processing(queue.consumer())).await.unwrap();
    assert_eq!(processing, 0);

    fixture.cleanup().await;
}

#[rstest]
#[tokio::test]
#[ignore = "requires Redis running on localhost:6379"]
async fn redis_queue_recover_leaves_peer_in_flight_jobs() {
    let fixture = RedisFixture::new();
    let first = fixture.queue().with_consumer("api-1");
    let second = fixture.queue().with_consumer("api-2");

    first.enqueue(&SyncJob::FullRebuild).run_async().await.unwrap();
    let delivery = second
        .dequeue(Duration::from_secs(1))
        .run_async()
        .await
        .unwrap()
        .unwrap();

    // A restarted peer must not pull back a job another consumer is running.
    assert_eq!(first.recover().run_async().await.unwrap(), 0);
    assert_eq!(first.pending().run_async().await.unwrap(), 0);

    let mut connection = fixture.pool.get().await.unwrap();
    let held: i64 = connection.llen(fixture.keys().processing("api-2")).await.unwrap();
    assert_eq!(held, 1);

    second.acknowledge(&delivery).run_async().await.unwrap();
    let held: i64 = connection.llen(fixture.keys().processing("api-2")).await.unwrap();
    assert_eq!(held, 0);

    fixture.cleanup().await;
}
