//! Sync Scheduler.
//!
//! Decides whether a full rebuild should be enqueued. Two guards keep
//! concurrent callers from piling up rebuilds:
//!
//! 1. A debounce window: nothing happens if the last scheduled rebuild is
//!    younger than `min_interval`.
//! 2. A distributed lock with a short TTL, taken with set-if-not-exists.
//!    Losing the race is the normal case and is not an error.
//!
//! The lock is never released; it expires. A crash between acquiring the
//! lock and enqueueing therefore delays the next rebuild by at most one TTL.
//!
//! A busy lock is reported as [`ScheduleOutcome::Busy`], while an unreachable
//! lock store is an error. Skipping silently on a broken store would let the
//! index drift without bound.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::domain::{Clock, SyncJob};
use crate::infrastructure::{JobQueue, RepositoryError, SyncLockStore};

/// What a call to [`SyncScheduler::schedule`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// The last rebuild is inside the debounce window.
    Debounced,
    /// Another caller holds the rebuild lock.
    Busy,
    /// A full-rebuild job was enqueued.
    Enqueued,
}

impl ScheduleOutcome {
    /// Returns the wire name of the outcome.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debounced => "debounced",
            Self::Busy => "busy",
            Self::Enqueued => "enqueued",
        }
    }
}

/// Failures the scheduler surfaces to its caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The lock store could not be read or written.
    #[error("lock store unavailable: {0}")]
    LockStore(#[source] RepositoryError),

    /// The rebuild job could not be enqueued.
    #[error("failed to enqueue full rebuild: {0}")]
    Enqueue(#[source] RepositoryError),
}

/// Schedules full-rebuild jobs under a lock and a debounce window.
#[derive(Clone)]
pub struct SyncScheduler {
    lock_store: Arc<dyn SyncLockStore>,
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
    min_interval: Duration,
    lock_ttl: Duration,
}

impl std::fmt::Debug for SyncScheduler {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncScheduler")
            .field("clock", &self.clock)
            .field("min_interval", &self.min_interval)
            .field("lock_ttl", &self.lock_ttl)
            .finish_non_exhaustive()
    }
}

impl SyncScheduler {
    /// Creates a scheduler.
    #[must_use]
    pub fn new(
        lock_store: Arc<dyn SyncLockStore>,
        queue: Arc<dyn JobQueue>,
        clock: Arc<dyn Clock>,
        min_interval: Duration,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            lock_store,
            queue,
            clock,
            min_interval,
            lock_ttl,
        }
    }

    /// Returns the debounce window.
    #[must_use]
    pub const fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Returns the lock lifetime.
    #[must_use]
    pub const fn lock_ttl(&self) -> Duration {
        self.lock_ttl
    }

    /// Enqueues a full rebuild unless one was scheduled recently or another
    /// caller is scheduling one right now.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::LockStore` if the lock store is unreachable
    /// and `SchedulerError::Enqueue` if the job could not be queued.
    pub async fn schedule(&self) -> Result<ScheduleOutcome, SchedulerError> {
        let now = self.clock.now();

        let last_sync = self
            .lock_store
            .last_sync()
            .run_async()
            .await
            .map_err(SchedulerError::LockStore)?;
        if let Some(last_sync) = last_sync {
            let elapsed = now.signed_duration_since(last_sync);
            // A timestamp from the future (clock skew) counts as recent.
            let within_window = elapsed
                .to_std()
                .map_or(true, |elapsed| elapsed < self.min_interval);
            if within_window {
                tracing::debug!(%last_sync, "Full rebuild debounced");
                return Ok(ScheduleOutcome::Debounced);
            }
        }

        let acquired = self
            .lock_store
            .try_acquire(self.lock_ttl)
            .run_async()
            .await
            .map_err(SchedulerError::LockStore)?;
        if !acquired {
            tracing::debug!("Rebuild lock held elsewhere, skipping");
            return Ok(ScheduleOutcome::Busy);
        }

        self.queue
            .enqueue(&SyncJob::FullRebuild)
            .run_async()
            .await
            .map_err(SchedulerError::Enqueue)?;
        self.lock_store
            .record_sync(now)
            .run_async()
            .await
            .map_err(SchedulerError::LockStore)?;

        tracing::info!(at = %now, "Full rebuild enqueued");
        Ok(ScheduleOutcome::Enqueued)
    }
}
