//! Rebuild ticker.
//!
//! Calls the scheduler on a fixed cadence. The scheduler's debounce and lock
//! keep the cadence cheap when many instances run the same ticker.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::scheduler::{ScheduleOutcome, SyncScheduler};

/// Spawns a task that calls `scheduler.schedule()` every `interval` until
/// `token` is cancelled. The first call happens immediately.
pub fn spawn_rebuild_ticker(
    scheduler: SyncScheduler,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), "Rebuild ticker started");

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match scheduler.schedule().await {
                Ok(ScheduleOutcome::Enqueued) => info!("Scheduled full rebuild"),
                Ok(outcome) => debug!(outcome = outcome.as_str(), "Full rebuild not scheduled"),
                Err(schedule_error) => error!(error = %schedule_error, "Rebuild scheduling failed"),
            }
        }

        info!("Rebuild ticker stopped");
    })
}
