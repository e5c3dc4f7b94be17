//! Write-path hook.
//!
//! Called after a user row is created or updated in the primary datastore.
//! The hook only enqueues an `upsert-one` job and returns; the index catches
//! up when the worker gets to it. Callers get no read-after-write guarantee
//! against the index.

use std::sync::Arc;

use crate::domain::{SyncJob, UserRecord};
use crate::infrastructure::JobQueue;

/// Enqueues incremental index updates.
#[derive(Clone)]
pub struct SyncHook {
    queue: Arc<dyn JobQueue>,
}

impl std::fmt::Debug for SyncHook {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("SyncHook").finish_non_exhaustive()
    }
}

impl SyncHook {
    /// Creates a hook that enqueues onto `queue`.
    #[must_use]
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    /// Schedules `user` for an index upsert.
    ///
    /// Enqueue failures are logged and swallowed; the next full rebuild
    /// picks the change up.
    pub async fn user_changed(&self, user: &UserRecord) {
        let job = SyncJob::UpsertOne(user.clone());
        match self.queue.enqueue(&job).run_async().await {
            Ok(()) => tracing::debug!(id = %user.id, email = %user.email, "Queued index upsert"),
            Err(error) => {
                tracing::warn!(%error, id = %user.id, email = %user.email, "Failed to queue index upsert");
            }
        }
    }
}
