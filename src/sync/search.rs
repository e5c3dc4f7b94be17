//! Prefix Search Reader.
//!
//! Serves autocomplete: a prefix becomes a lexicographic range query on the
//! email index, and the matching emails are resolved to their records in one
//! batch lookup.

use crate::domain::UserRecord;

use super::store::EmailIndexStore;

/// Read-only prefix search over the email index.
#[derive(Debug, Clone)]
pub struct PrefixSearchReader {
    store: EmailIndexStore,
}

impl PrefixSearchReader {
    /// Creates a reader over `store`.
    #[must_use]
    pub const fn new(store: EmailIndexStore) -> Self {
        Self { store }
    }

    /// Returns up to `limit` records whose email starts with `prefix`,
    /// ascending by email.
    ///
    /// An email whose record is gone (removed between the range query and the
    /// lookup) is skipped, so the result may be shorter than `limit`. A cache
    /// outage yields an empty list.
    pub async fn search(&self, prefix: &str, limit: usize) -> Vec<UserRecord> {
        let emails = self.store.range_by_prefix(prefix, limit).await;
        if emails.is_empty() {
            return Vec::new();
        }

        let records = self.store.fetch_records(&emails).await;
        let found: Vec<UserRecord> = records.into_iter().flatten().collect();
        if found.len() < emails.len() {
            tracing::debug!(
                prefix,
                missing = emails.len() - found.len(),
                "Skipped index entries without a record"
            );
        }
        found
    }
}
