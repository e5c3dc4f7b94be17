//! Sync Worker.
//!
//! Consumes [`SyncJob`]s one at a time and applies them to the email index.
//!
//! - `full-rebuild` diffs the primary datastore against the index and applies
//!   every upsert and removal as a single atomic batch.
//! - `upsert-one` validates the payload and writes one record.
//!
//! Jobs run `received -> processing -> completed | failed`. Failed jobs are
//! logged with their payload and acknowledged; nothing retries them. A failed
//! rebuild is repaired by the next scheduled rebuild.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::{JobState, SyncJob, UserRecord, UserValidationError};
use crate::infrastructure::{JobQueue, ReconcileBatch, RepositoryError, UserSource};

use super::store::EmailIndexStore;

/// How long `stop` waits for the consume loop to finish.
const STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause after a queue error before polling again.
const QUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

// =============================================================================
// Errors and Outcomes
// =============================================================================

/// Reasons a job ends in `Failed`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    /// The job payload is unusable; this is a producer bug.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] UserValidationError),

    /// The primary datastore could not be read.
    #[error("user source failed: {0}")]
    Source(#[source] RepositoryError),

    /// The index rejected the write.
    #[error("index write failed: {0}")]
    Index(#[source] RepositoryError),
}

/// Summary of a full reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileSummary {
    /// Records written.
    pub upserted: usize,
    /// Stale entries removed.
    pub removed: usize,
}

/// Result of processing a single job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    /// Terminal state of the job.
    pub state: JobState,
    /// Every state the job passed through, starting at `Received`.
    pub trail: Vec<JobState>,
    /// Reconciliation counts for a completed full rebuild.
    pub summary: Option<ReconcileSummary>,
    /// Why the job failed, if it did.
    pub error: Option<JobError>,
}

/// Walks one job through its states.
struct Lifecycle {
    kind: &'static str,
    trail: Vec<JobState>,
}

impl Lifecycle {
    fn received(kind: &'static str) -> Self {
        debug!(kind, state = %JobState::Received, "Sync job state");
        Self {
            kind,
            trail: vec![JobState::Received],
        }
    }

    fn current(&self) -> JobState {
        self.trail.last().copied().unwrap_or(JobState::Received)
    }

    fn step(&mut self, succeeded: bool) {
        let from = self.current();
        match from.advance(succeeded) {
            Some(next) => {
                debug!(kind = self.kind, %from, state = %next, "Sync job state");
                self.trail.push(next);
            }
            None => warn!(kind = self.kind, %from, succeeded, "Ignoring step from terminal state"),
        }
    }

    fn finish(self, summary: Option<ReconcileSummary>, error: Option<JobError>) -> JobOutcome {
        JobOutcome {
            state: self.current(),
            trail: self.trail,
            summary,
            error,
        }
    }
}

/// Counters shared between the worker handle and its consume loop.
#[derive(Debug, Default)]
pub struct WorkerStats {
    completed: AtomicU64,
    failed: AtomicU64,
}

impl WorkerStats {
    /// Jobs that reached `Completed`.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Jobs that reached `Failed`.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    fn record(&self, state: JobState) {
        match state {
            JobState::Completed => self.completed.fetch_add(1, Ordering::Relaxed),
            JobState::Failed => self.failed.fetch_add(1, Ordering::Relaxed),
            JobState::Received | JobState::Processing => return,
        };
    }
}

fn report_failure(job: &SyncJob, lifecycle: Lifecycle, job_error: JobError) -> JobOutcome {
    let payload = job.to_payload().unwrap_or_else(|_| format!("{job:?}"));
    error!(kind = job.kind(), %payload, error = %job_error, "Sync job failed");
    lifecycle.finish(None, Some(job_error))
}

// =============================================================================
// Reconciliation
// =============================================================================

/// Computes the batch that makes the index equal to `users`.
///
/// Every user is upserted unconditionally, which also repairs stale names.
/// Emails in the index with no backing user are removed. When two users share
/// an email the first one wins.
#[must_use]
pub fn plan_reconcile(users: Vec<UserRecord>, indexed: Vec<String>) -> ReconcileBatch {
    let mut seen: HashSet<String> = HashSet::with_capacity(users.len());
    let mut upserts = Vec::with_capacity(users.len());
    for user in users {
        if user.validate().is_err() {
            warn!(id = %user.id, email = %user.email, "Skipping user row with blank id or email");
            continue;
        }
        if !seen.insert(user.email.clone()) {
            warn!(id = %user.id, email = %user.email, "Duplicate email in user table, keeping first row");
            continue;
        }
        upserts.push(user);
    }

    let removals = indexed
        .into_iter()
        .filter(|email| !seen.contains(email))
        .collect();

    ReconcileBatch { upserts, removals }
}

// =============================================================================
// Sync Worker
// =============================================================================

/// Applies sync jobs to the email index.
///
/// # Example
///
/// ```ignore
/// let mut worker = SyncWorker::new(store, users, queue, Duration::from_secs(1));
/// worker.start();
/// // ...
/// worker.stop().await;
/// ```
pub struct SyncWorker {
    store: EmailIndexStore,
    users: Arc<dyn UserSource>,
    queue: Arc<dyn JobQueue>,
    poll_timeout: Duration,
    stats: Arc<WorkerStats>,
    cancellation_token: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for SyncWorker {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncWorker")
            .field("poll_timeout", &self.poll_timeout)
            .field("stats", &self.stats)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// The parts of the worker the consume loop needs.
#[derive(Clone)]
struct JobProcessor {
    store: EmailIndexStore,
    users: Arc<dyn UserSource>,
}

impl JobProcessor {
    async fn process(&self, job: &SyncJob) -> JobOutcome {
        let mut lifecycle = Lifecycle::received(job.kind());

        // A malformed payload never reaches processing.
        if let Err(invalid) = job.validate() {
            lifecycle.step(false);
            return report_failure(job, lifecycle, JobError::InvalidPayload(invalid));
        }
        lifecycle.step(true);

        let result = match job {
            SyncJob::FullRebuild => self.full_rebuild().await.map(Some),
            SyncJob::UpsertOne(record) => self.upsert_one(record).await.map(|()| None),
        };

        lifecycle.step(result.is_ok());
        match result {
            Ok(summary) => {
                info!(kind = job.kind(), ?summary, "Sync job completed");
                lifecycle.finish(summary, None)
            }
            Err(job_error) => report_failure(job, lifecycle, job_error),
        }
    }

    async fn full_rebuild(&self) -> Result<ReconcileSummary, JobError> {
        let users = self
            .users
            .load_all()
            .run_async()
            .await
            .map_err(JobError::Source)?;
        let indexed = self.store.try_all_emails().await.map_err(JobError::Index)?;

        let batch = plan_reconcile(users, indexed);
        let summary = ReconcileSummary {
            upserted: batch.upserts.len(),
            removed: batch.removals.len(),
        };
        self.store.try_apply(&batch).await.map_err(JobError::Index)?;
        Ok(summary)
    }

    async fn upsert_one(&self, record: &UserRecord) -> Result<(), JobError> {
        self.store.try_upsert(record).await.map_err(JobError::Index)
    }
}

impl SyncWorker {
    /// Creates a stopped worker.
    #[must_use]
    pub fn new(
        store: EmailIndexStore,
        users: Arc<dyn UserSource>,
        queue: Arc<dyn JobQueue>,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            store,
            users,
            queue,
            poll_timeout,
            stats: Arc::new(WorkerStats::default()),
            cancellation_token: CancellationToken::new(),
            task_handle: None,
        }
    }

    fn processor(&self) -> JobProcessor {
        JobProcessor {
            store: self.store.clone(),
            users: Arc::clone(&self.users),
        }
    }

    /// Processes one job to a terminal state.
    pub async fn process(&self, job: &SyncJob) -> JobOutcome {
        let outcome = self.processor().process(job).await;
        self.stats.record(outcome.state);
        outcome
    }

    /// Returns the shared job counters.
    #[must_use]
    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// Returns true while the consume loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Spawns the consume loop. Calling it twice is a no-op.
    pub fn start(&mut self) {
        if self.task_handle.is_some() {
            warn!("Sync worker is already running");
            return;
        }

        let processor = self.processor();
        let queue = Arc::clone(&self.queue);
        let stats = Arc::clone(&self.stats);
        let token = self.cancellation_token.clone();
        let poll_timeout = self.poll_timeout;

        info!(
            consumer = queue.consumer(),
            poll_timeout_ms = poll_timeout.as_millis(),
            "Starting sync worker"
        );
        self.task_handle = Some(tokio::spawn(async move {
            Self::consume_loop(processor, queue, stats, token, poll_timeout).await;
            info!("Sync worker stopped");
        }));
    }

    /// Cancels the consume loop and waits for it to finish.
    ///
    /// A job already being processed runs to completion first.
    pub async fn stop(&mut self) {
        self.cancellation_token.cancel();

        if let Some(handle) = self.task_handle.take() {
            match tokio::time::timeout(STOP_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(join_error)) => error!(%join_error, "Sync worker task panicked"),
                Err(_) => warn!("Sync worker did not stop within timeout"),
            }
        }
    }

    async fn consume_loop(
        processor: JobProcessor,
        queue: Arc<dyn JobQueue>,
        stats: Arc<WorkerStats>,
        token: CancellationToken,
        poll_timeout: Duration,
    ) {
        match queue.recover().run_async().await {
            Ok(0) => {}
            Ok(count) => info!(count, consumer = queue.consumer(), "Recovered in-flight sync jobs"),
            Err(error) => warn!(%error, "Failed to recover in-flight sync jobs"),
        }

        loop {
            let delivery = tokio::select! {
                () = token.cancelled() => break,
                delivery = queue.dequeue(poll_timeout).run_async() => delivery,
            };

            let delivery = match delivery {
                Ok(Some(delivery)) => delivery,
                Ok(None) => continue,
                Err(error) => {
                    warn!(%error, "Failed to dequeue sync job");
                    tokio::select! {
                        () = token.cancelled() => break,
                        () = tokio::time::sleep(QUEUE_ERROR_BACKOFF) => continue,
                    }
                }
            };

            let outcome = processor.process(&delivery.job).await;
            stats.record(outcome.state);

            if let Err(error) = queue.acknowledge(&delivery).run_async().await {
                warn!(%error, kind = delivery.job.kind(), "Failed to acknowledge sync job");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::{
        EmailIndexBackend, InMemoryEmailIndex, InMemoryJobQueue, InMemoryUserSource,
    };
    use rstest::rstest;

    fn alice() -> UserRecord {
        UserRecord::new("1", "alice@demo.com", "Alice")
    }

    fn alan() -> UserRecord {
        UserRecord::new("2", "alan@demo.com", "Alan")
    }

    struct Fixture {
        index: InMemoryEmailIndex,
        users: InMemoryUserSource,
        queue: InMemoryJobQueue,
        worker: SyncWorker,
    }

    fn fixture(users: Vec<UserRecord>) -> Fixture {
        let index = InMemoryEmailIndex::new();
        let users = InMemoryUserSource::with_users(users);
        let queue = InMemoryJobQueue::new();
        let worker = SyncWorker::new(
            EmailIndexStore::new(Arc::new(index.clone())),
            Arc::new(users.clone()),
            Arc::new(queue.clone()),
            Duration::from_millis(20),
        );
        Fixture {
            index,
            users,
            queue,
            worker,
        }
    }

    // -------------------------------------------------------------------------
    // plan_reconcile
    // -------------------------------------------------------------------------

    #[rstest]
    fn test_plan_removes_only_stale_emails() {
        let batch = plan_reconcile(
            vec![alice(), alan()],
            vec!["alice@demo.com".to_string(), "gone@demo.com".to_string()],
        );
        assert_eq!(batch.upserts, vec![alice(), alan()]);
        assert_eq!(batch.removals, vec!["gone@demo.com".to_string()]);
    }

    #[rstest]
    fn test_plan_keeps_first_duplicate_email() {
        let twin = UserRecord::new("9", "alice@demo.com", "Other Alice");
        let batch = plan_reconcile(vec![alice(), twin], vec![]);
        assert_eq!(batch.upserts, vec![alice()]);
    }

    #[rstest]
    fn test_plan_skips_blank_rows() {
        let blank = UserRecord::new("3", "", "Nobody");
        let batch = plan_reconcile(vec![blank, alan()], vec![]);
        assert_eq!(batch.upserts, vec![alan()]);
    }

    // -------------------------------------------------------------------------
    // process
    // -------------------------------------------------------------------------

    #[rstest]
    #[tokio::test]
    async fn test_full_rebuild_reports_summary() {
        let fixture = fixture(vec![alice(), alan()]);
        fixture
            .index
            .upsert(&UserRecord::new("8", "stale@demo.com", "Stale"))
            .run_async()
            .await
            .unwrap();

        let outcome = fixture.worker.process(&SyncJob::FullRebuild).await;

        assert_eq!(outcome.state, JobState::Completed);
        assert_eq!(
            outcome.trail,
            vec![JobState::Received, JobState::Processing, JobState::Completed]
        );
        assert_eq!(
            outcome.summary,
            Some(ReconcileSummary {
                upserted: 2,
                removed: 1
            })
        );
        assert_eq!(fixture.index.snapshot().await, vec![alan(), alice()]);
    }

    #[rstest]
    #[case(UserRecord::new("", "alice@demo.com", "Alice"), UserValidationError::EmptyId)]
    #[case(UserRecord::new("1", " ", "Alice"), UserValidationError::EmptyEmail)]
    #[tokio::test]
    async fn test_upsert_one_rejects_invalid_payload(
        #[case] record: UserRecord,
        #[case] expected: UserValidationError,
    ) {
        let fixture = fixture(vec![]);

        let outcome = fixture.worker.process(&SyncJob::UpsertOne(record)).await;

        assert_eq!(outcome.state, JobState::Failed);
        assert_eq!(outcome.trail, vec![JobState::Received, JobState::Failed]);
        assert_eq!(outcome.error, Some(JobError::InvalidPayload(expected)));
        assert!(fixture.index.snapshot().await.is_empty());
        assert_eq!(fixture.worker.stats().failed(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn test_rebuild_fails_when_source_is_down() {
        let fixture = fixture(vec![alice()]);
        fixture.users.set_available(false);

        let outcome = fixture.worker.process(&SyncJob::FullRebuild).await;

        assert_eq!(outcome.state, JobState::Failed);
        assert_eq!(
            outcome.trail,
            vec![JobState::Received, JobState::Processing, JobState::Failed]
        );
        assert!(matches!(outcome.error, Some(JobError::Source(_))));
    }

    #[rstest]
    #[tokio::test]
    async fn test_rebuild_fails_when_index_is_down() {
        let fixture = fixture(vec![alice()]);
        fixture.index.set_available(false);

        let outcome = fixture.worker.process(&SyncJob::FullRebuild).await;

        assert!(matches!(outcome.error, Some(JobError::Index(_))));
    }

    // -------------------------------------------------------------------------
    // consume loop
    // -------------------------------------------------------------------------

    #[rstest]
    #[tokio::test]
    async fn test_consume_loop_processes_and_acknowledges() {
        let mut fixture = fixture(vec![alice()]);
        fixture.queue.enqueue(&SyncJob::FullRebuild).run_async().await.unwrap();
        fixture
            .queue
            .enqueue(&SyncJob::UpsertOne(UserRecord::new("", "bad@demo.com", "")))
            .run_async()
            .await
            .unwrap();
        fixture
            .queue
            .enqueue(&SyncJob::UpsertOne(alan()))
            .run_async()
            .await
            .unwrap();

        fixture.worker.start();
        assert!(fixture.worker.is_running());

        let stats = fixture.worker.stats();
        for _ in 0..200 {
            if stats.completed() + stats.failed() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        fixture.worker.stop().await;

        assert_eq!(stats.completed(), 2);
        assert_eq!(stats.failed(), 1);
        assert_eq!(fixture.queue.in_flight().await, 0);
        assert_eq!(fixture.queue.pending().run_async().await.unwrap(), 0);
        assert_eq!(fixture.index.snapshot().await, vec![alan(), alice()]);
        assert!(!fixture.worker.is_running());
    }

    #[rstest]
    #[tokio::test]
    async fn test_consume_loop_recovers_in_flight_jobs() {
        let mut fixture = fixture(vec![alice()]);
        fixture.queue.enqueue(&SyncJob::FullRebuild).run_async().await.unwrap();
        // Simulate a consumer that died after dequeueing.
        let _lost = fixture
            .queue
            .dequeue(Duration::from_millis(10))
            .run_async()
            .await
            .unwrap();

        fixture.worker.start();
        let stats = fixture.worker.stats();
        for _ in 0..200 {
            if stats.completed() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        fixture.worker.stop().await;

        assert_eq!(stats.completed(), 1);
        assert_eq!(fixture.index.snapshot().await, vec![alice()]);
    }

    #[rstest]
    #[tokio::test]
    async fn test_stop_without_start_is_harmless() {
        let mut fixture = fixture(vec![]);
        fixture.worker.stop().await;
        assert!(!fixture.worker.is_running());
    }
}
