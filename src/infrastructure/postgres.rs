//! `PostgreSQL` user source.
//!
//! Reads the authoritative user table with `sqlx`. The table belongs to the
//! primary application, so `save` leaves it alone.
//!
//! # Table Schema
//!
//! ```sql
//! CREATE TABLE users (
//!     id TEXT PRIMARY KEY,          -- UUID columns work too; read as text
//!     email TEXT NOT NULL UNIQUE,
//!     name TEXT
//! );
//! ```

use lambars::effect::AsyncIO;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::domain::UserRecord;
use crate::infrastructure::{RepositoryError, UserSource};

/// Default maximum pool size.
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Row shape shared by both queries.
type UserRow = (String, String, Option<String>);

fn row_to_record((id, email, name): UserRow) -> UserRecord {
    UserRecord::new(id, email, name.unwrap_or_default())
}

/// Escapes `LIKE` metacharacters and wraps the query in `%…%`.
fn like_pattern(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    escaped.push('%');
    for character in query.chars() {
        if matches!(character, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(character);
    }
    escaped.push('%');
    escaped
}

// =============================================================================
// PostgreSQL User Source
// =============================================================================

/// `PostgreSQL` implementation of `UserSource`.
///
/// # Example
///
/// ```ignore
/// use user_sync_index::infrastructure::PostgresUserSource;
///
/// let source = PostgresUserSource::connect("postgres://localhost/app").await?;
/// let users = source.load_all().run_async().await?;
/// ```
#[derive(Debug, Clone)]
pub struct PostgresUserSource {
    /// Connection pool for `PostgreSQL`.
    pool: PgPool,
}

impl PostgresUserSource {
    /// Creates a source over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a new pool to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::DatabaseError` if the connection fails.
    pub async fn connect(database_url: &str) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(database_url)
            .await
            .map_err(|error| RepositoryError::DatabaseError(error.to_string()))?;
        Ok(Self::new(pool))
    }

    /// Returns the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl UserSource for PostgresUserSource {
    fn save(&self, _user: &UserRecord) -> AsyncIO<Result<bool, RepositoryError>> {
        AsyncIO::pure(Ok(false))
    }

    fn load_all(&self) -> AsyncIO<Result<Vec<UserRecord>, RepositoryError>> {
        let pool = self.pool.clone();
        AsyncIO::new(move || async move {
            let rows: Vec<UserRow> =
                sqlx::query_as("SELECT id::text, email, name FROM users ORDER BY email")
                    .fetch_all(&pool)
                    .await
                    .map_err(|error| RepositoryError::DatabaseError(error.to_string()))?;
            Ok(rows.into_iter().map(row_to_record).collect())
        })
    }

    fn search_substring(
        &self,
        query: &str,
        limit: usize,
    ) -> AsyncIO<Result<Vec<UserRecord>, RepositoryError>> {
        let pool = self.pool.clone();
        let pattern = like_pattern(query);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        AsyncIO::new(move || async move {
            let rows: Vec<UserRow> = sqlx::query_as(
                "SELECT id::text, email, name FROM users \
                 WHERE email ILIKE $1 ORDER BY email LIMIT $2",
            )
            .bind(pattern)
            .bind(limit)
            .fetch_all(&pool)
            .await
            .map_err(|error| RepositoryError::DatabaseError(error.to_string()))?;
            Ok(rows.into_iter().map(row_to_record).collect())
        })
    }
}
