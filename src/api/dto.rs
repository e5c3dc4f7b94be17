//! Data Transfer Objects for the HTTP API.

use serde::{Deserialize, Serialize};

use super::error::ValidationError;
use crate::domain::UserRecord;

/// Results returned when `limit` is not given.
pub const DEFAULT_SEARCH_LIMIT: u32 = 10;

/// Upper bound on `limit`; larger values are clamped.
pub const MAX_SEARCH_LIMIT: u32 = 100;

// =============================================================================
// Search
// =============================================================================

/// Query parameters for `GET /users/search`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchUsersQuery {
    /// Email prefix; case-sensitive. Empty matches every user.
    #[serde(default)]
    pub prefix: String,
    /// Maximum number of results (default: 10, clamped to 100, 0 is rejected).
    pub limit: Option<u32>,
}

impl SearchUsersQuery {
    /// Returns the effective limit.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` when `limit` is zero.
    pub fn resolved_limit(&self) -> Result<usize, ValidationError> {
        match self.limit {
            Some(0) => Err(ValidationError::single("limit", "limit must be at least 1")),
            Some(limit) => Ok(limit.min(MAX_SEARCH_LIMIT) as usize),
            None => Ok(DEFAULT_SEARCH_LIMIT as usize),
        }
    }
}

/// Where search results came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchSource {
    /// The email prefix index.
    Index,
    /// The substring fallback against the primary datastore.
    Database,
}

/// A user as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserResponse {
    /// User id.
    pub id: String,
    /// Email address.
    pub email: String,
    /// Display name; empty when unknown.
    pub name: String,
}

impl From<UserRecord> for UserResponse {
    fn from(record: UserRecord) -> Self {
        Self {
            id: record.id,
            email: record.email,
            name: record.name,
        }
    }
}

/// Response body for `GET /users/search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchUsersResponse {
    /// Matching users, ascending by email.
    pub users: Vec<UserResponse>,
    /// Which tier answered the query.
    pub source: SearchSource,
}

// =============================================================================
// Sync
// =============================================================================

/// Request body for `POST /sync/users`.
#[derive(Debug, Clone, Deserialize)]
pub struct UserSyncRequest {
    /// User id; must not be blank.
    pub id: String,
    /// Email address; must not be blank.
    pub email: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
}

impl UserSyncRequest {
    /// Converts the request into a validated record.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` naming the blank field.
    pub fn into_record(self) -> Result<UserRecord, ValidationError> {
        let record = UserRecord::new(self.id, self.email, self.name);
        record.validate()?;
        Ok(record)
    }
}

/// Response body for `POST /sync/rebuild`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebuildResponse {
    /// `enqueued`, `busy` or `debounced`.
    pub outcome: String,
}

/// Response body for `POST /sync/users`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSyncResponse {
    /// Always `queued`; the index is updated asynchronously.
    pub status: String,
}
