//! Sync job model.
//!
//! Jobs travel through the queue as JSON with a `kind` discriminator:
//!
//! - `{"kind":"full-rebuild"}`
//! - `{"kind":"upsert-one","id":"…","email":"…","name":"…"}`

use serde::{Deserialize, Serialize};

use super::{UserRecord, UserValidationError};

// =============================================================================
// SyncJob
// =============================================================================

/// A unit of work for the sync worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SyncJob {
    /// Reconcile the whole index against the primary datastore.
    FullRebuild,
    /// Write a single user into the index.
    UpsertOne(UserRecord),
}

impl SyncJob {
    /// Returns the wire name of the job kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::FullRebuild => "full-rebuild",
            Self::UpsertOne(_) => "upsert-one",
        }
    }

    /// Checks that the job carries a usable payload.
    ///
    /// # Errors
    ///
    /// Returns the `UserValidationError` of an `upsert-one` record with a
    /// blank id or email.
    pub fn validate(&self) -> Result<(), UserValidationError> {
        match self {
            Self::FullRebuild => Ok(()),
            Self::UpsertOne(record) => record.validate(),
        }
    }

    /// Serializes the job to its queue payload.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json::Error` if serialization fails.
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses a queue payload.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json::Error` for malformed payloads or unknown kinds.
    pub fn from_payload(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

// =============================================================================
// Job State
// =============================================================================

/// Lifecycle of a job inside the worker.
///
/// `Received -> Processing -> Completed | Failed`. Nothing moves a job out of
/// `Failed`; failed jobs are logged with their payload and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Taken off the queue.
    Received,
    /// Being applied to the index.
    Processing,
    /// Applied.
    Completed,
    /// Rejected or errored; terminal.
    Failed,
}

impl JobState {
    /// Returns true for `Completed` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns the next state for a successful or failed step, or `None` if
    /// the transition is not allowed.
    #[must_use]
    pub const fn advance(self, succeeded: bool) -> Option<Self> {
        match (self, succeeded) {
            (Self::Received, true) => Some(Self::Processing),
            (Self::Received | Self::Processing, false) => Some(Self::Failed),
            (Self::Processing, true) => Some(Self::Completed),
            (Self::Completed | Self::Failed, _) => None,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Received => write!(formatter, "received"),
            Self::Processing => write!(formatter, "processing"),
            Self::Completed => write!(formatter, "completed"),
            Self::Failed => write!(formatter, "failed"),
        }
    }
}
