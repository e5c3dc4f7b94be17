//! User record domain model.
//!
//! A `UserRecord` is the denormalized copy of a user row that the email index
//! keeps next to each sort key. The email doubles as the sort key, so a record
//! can never be stored under a key other than its own email.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Validation Error
// =============================================================================

/// Reasons a user record cannot be written to the index.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UserValidationError {
    /// The `id` field is empty or whitespace.
    #[error("user id must not be empty")]
    EmptyId,

    /// The `email` field is empty or whitespace.
    #[error("user email must not be empty")]
    EmptyEmail,
}

impl UserValidationError {
    /// Returns the name of the offending field.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::EmptyId => "id",
            Self::EmptyEmail => "email",
        }
    }
}

// =============================================================================
// UserRecord
// =============================================================================

/// Denormalized user fields cached per email.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserRecord {
    /// Primary key of the backing user row.
    pub id: String,
    /// Display name. Missing names are stored as an empty string.
    #[serde(default)]
    pub name: String,
    /// Email address; also the sort key in the index.
    pub email: String,
}

impl UserRecord {
    /// Creates a new record.
    #[must_use]
    pub fn new(id: impl Into<String>, email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
        }
    }

    /// Returns the sort key this record is stored under.
    #[must_use]
    pub fn sort_key(&self) -> &str {
        &self.email
    }

    /// Checks that the record can be written to the index.
    ///
    /// # Errors
    ///
    /// Returns `UserValidationError` when `id` or `email` is blank.
    pub fn validate(&self) -> Result<(), UserValidationError> {
        if self.id.trim().is_empty() {
            return Err(UserValidationError::EmptyId);
        }
        if self.email.trim().is_empty() {
            return Err(UserValidationError::EmptyEmail);
        }
        Ok(())
    }
}
