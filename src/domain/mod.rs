//! Domain module for the user email index.
//!
//! This module contains the user record, sync job model, prefix bound
//! computation and the clock abstraction.

pub mod clock;
pub mod job;
pub mod prefix;
pub mod user;

pub use clock::{Clock, ManualClock, SystemClock};
pub use job::{JobState, SyncJob};
pub use prefix::PrefixBounds;
pub use user::{UserRecord, UserValidationError};
