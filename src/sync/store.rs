//! Email Index Store.
//!
//! Wraps an [`EmailIndexBackend`] with the store contract: the plain
//! operations are best-effort and degrade to a no-op or an empty result when
//! the cache tier fails, because the index only accelerates lookups and is
//! never the source of truth. The `try_*` operations return the error for
//! callers (the worker) that must know whether a write landed.

use std::sync::Arc;

use crate::domain::{PrefixBounds, UserRecord};
use crate::infrastructure::{EmailIndexBackend, ReconcileBatch, RepositoryError};

/// Best-effort facade over the email index backend.
#[derive(Clone)]
pub struct EmailIndexStore {
    backend: Arc<dyn EmailIndexBackend>,
}

impl std::fmt::Debug for EmailIndexStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("EmailIndexStore")
            .field("backend", &"Arc<dyn EmailIndexBackend>")
            .finish()
    }
}

impl EmailIndexStore {
    /// Creates a store over `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn EmailIndexBackend>) -> Self {
        Self { backend }
    }

    /// Writes `record` under its email. Idempotent; errors are logged.
    pub async fn upsert(&self, record: &UserRecord) {
        if let Err(error) = self.try_upsert(record).await {
            tracing::warn!(%error, email = %record.email, "Index upsert skipped");
        }
    }

    /// Removes `email` and its record. Idempotent; errors are logged.
    pub async fn remove(&self, email: &str) {
        if let Err(error) = self.backend.remove(email).run_async().await {
            tracing::warn!(%error, email, "Index remove skipped");
        }
    }

    /// Returns up to `limit` emails starting with `prefix`, ascending.
    ///
    /// Returns an empty list if the cache tier fails.
    pub async fn range_by_prefix(&self, prefix: &str, limit: usize) -> Vec<String> {
        if limit == 0 {
            return Vec::new();
        }
        let bounds = PrefixBounds::for_prefix(prefix);
        match self.backend.range(&bounds, limit).run_async().await {
            Ok(emails) => emails,
            Err(error) => {
                tracing::warn!(%error, prefix, "Index range query failed");
                Vec::new()
            }
        }
    }

    /// Looks up the records for `emails`, positionally.
    ///
    /// Returns all-`None` if the cache tier fails.
    pub async fn fetch_records(&self, emails: &[String]) -> Vec<Option<UserRecord>> {
        if emails.is_empty() {
            return Vec::new();
        }
        match self.backend.fetch(emails).run_async().await {
            Ok(records) => records,
            Err(error) => {
                tracing::warn!(%error, count = emails.len(), "Index record lookup failed");
                vec![None; emails.len()]
            }
        }
    }

    /// Writes `record`, returning any backend error.
    ///
    /// # Errors
    ///
    /// Returns the backend's `RepositoryError`.
    pub async fn try_upsert(&self, record: &UserRecord) -> Result<(), RepositoryError> {
        self.backend.upsert(record).run_async().await
    }

    /// Returns every indexed email, or the backend error.
    ///
    /// # Errors
    ///
    /// Returns the backend's `RepositoryError`.
    pub async fn try_all_emails(&self) -> Result<Vec<String>, RepositoryError> {
        self.backend.all_emails().run_async().await
    }

    /// Applies `batch` atomically, or returns the backend error.
    ///
    /// # Errors
    ///
    /// Returns the backend's `RepositoryError`.
    pub async fn try_apply(&self, batch: &ReconcileBatch) -> Result<(), RepositoryError> {
        self.backend.apply(batch).run_async().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::InMemoryEmailIndex;
    use rstest::rstest;

    fn store_with(index: &InMemoryEmailIndex) -> EmailIndexStore {
        EmailIndexStore::new(Arc::new(index.clone()))
    }

    #[rstest]
    #[tokio::test]
    async fn test_upsert_twice_is_same_as_once() {
        let index = InMemoryEmailIndex::new();
        let store = store_with(&index);
        let record = UserRecord::new("1", "alice@demo.com", "Alice");

        store.upsert(&record).await;
        let once = index.snapshot().await;
        store.upsert(&record).await;

        assert_eq!(index.snapshot().await, once);
        assert_eq!(store.range_by_prefix("", 10).await, vec!["alice@demo.com"]);
    }

    #[rstest]
    #[tokio::test]
    async fn test_upsert_overwrites_record() {
        let index = InMemoryEmailIndex::new();
        let store = store_with(&index);

        store
            .upsert(&UserRecord::new("1", "alice@demo.com", "Alice"))
            .await;
        store
            .upsert(&UserRecord::new("1", "alice@demo.com", "Alice Liddell"))
            .await;

        let records = store.fetch_records(&["alice@demo.com".to_string()]).await;
        assert_eq!(
            records,
            vec![Some(UserRecord::new("1", "alice@demo.com", "Alice Liddell"))]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn test_outage_degrades_to_empty() {
        let index = InMemoryEmailIndex::new();
        let store = store_with(&index);
        store
            .upsert(&UserRecord::new("1", "alice@demo.com", "Alice"))
            .await;

        index.set_available(false);

        store.remove("alice@demo.com").await;
        assert!(store.range_by_prefix("al", 10).await.is_empty());
        assert_eq!(
            store.fetch_records(&["alice@demo.com".to_string()]).await,
            vec![None]
        );
        assert!(store.try_all_emails().await.is_err());

        index.set_available(true);
        assert_eq!(store.range_by_prefix("al", 10).await, vec!["alice@demo.com"]);
    }

    #[rstest]
    #[tokio::test]
    async fn test_zero_limit_returns_nothing() {
        let index = InMemoryEmailIndex::new();
        let store = store_with(&index);
        store
            .upsert(&UserRecord::new("1", "alice@demo.com", "Alice"))
            .await;
        assert!(store.range_by_prefix("", 0).await.is_empty());
    }
}
