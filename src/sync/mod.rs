//! Index synchronisation.
//!
//! The pieces that keep the email index in step with the user table and read
//! from it:
//!
//! - [`EmailIndexStore`]: best-effort facade over the index backend
//! - [`SyncScheduler`]: lock- and debounce-guarded full rebuild scheduling
//! - [`SyncWorker`]: job consumer for full rebuilds and single upserts
//! - [`PrefixSearchReader`]: autocomplete lookups
//! - [`SyncHook`]: write-path enqueue of single upserts
//! - [`spawn_rebuild_ticker`]: periodic scheduling

pub mod config;
pub mod hook;
pub mod scheduler;
pub mod search;
pub mod store;
pub mod ticker;
pub mod worker;

pub use config::SyncConfig;
pub use hook::SyncHook;
pub use scheduler::{ScheduleOutcome, SchedulerError, SyncScheduler};
pub use search::PrefixSearchReader;
pub use store::EmailIndexStore;
pub use ticker::spawn_rebuild_ticker;
pub use worker::{JobError, JobOutcome, ReconcileSummary, SyncWorker, WorkerStats, plan_reconcile};
