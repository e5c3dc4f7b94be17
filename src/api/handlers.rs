//! HTTP handlers for the user email index service.
//!
//! - `GET /health`
//! - `GET /users/search?prefix=&limit=`
//! - `POST /sync/rebuild`
//! - `POST /sync/users`

use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};

use super::dto::{
    RebuildResponse, SearchSource, SearchUsersQuery, SearchUsersResponse, UserResponse,
    UserSyncRequest, UserSyncResponse,
};
use super::error::ApiErrorResponse;
use crate::domain::Clock;
use crate::infrastructure::{Backends, UserSource};
use crate::sync::{EmailIndexStore, PrefixSearchReader, SyncConfig, SyncHook, SyncScheduler};

// =============================================================================
// Application State
// =============================================================================

/// Shared handler dependencies.
#[derive(Clone)]
pub struct AppState {
    /// Prefix search over the email index.
    pub reader: PrefixSearchReader,
    /// Primary datastore, used when the index has no match.
    pub users: Arc<dyn UserSource>,
    /// Full rebuild scheduler.
    pub scheduler: SyncScheduler,
    /// Write-path hook for single-user updates.
    pub hook: SyncHook,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("AppState")
            .field("reader", &self.reader)
            .field("scheduler", &self.scheduler)
            .field("hook", &self.hook)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Wires handler dependencies from the injected backends.
    #[must_use]
    pub fn from_backends(backends: &Backends, config: &SyncConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            reader: PrefixSearchReader::new(EmailIndexStore::new(Arc::clone(&backends.index))),
            users: Arc::clone(&backends.users),
            scheduler: SyncScheduler::new(
                Arc::clone(&backends.lock_store),
                Arc::clone(&backends.queue),
                clock,
                config.min_interval,
                config.lock_ttl,
            ),
            hook: SyncHook::new(Arc::clone(&backends.queue)),
        }
    }
}

// =============================================================================
// GET /health
// =============================================================================

/// Health check response body.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
}

/// Reports that the process is up.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// =============================================================================
// GET /users/search
// =============================================================================

/// Autocomplete by email prefix.
///
/// Answers from the index. When the index has nothing for the prefix (cold
/// cache, outage, or not yet synced) the handler falls back to a substring
/// search against the primary datastore.
///
/// # Errors
///
/// - 400 when `limit` is zero
/// - 500 when the fallback query fails
pub async fn search_users(
    State(state): State<AppState>,
    Query(query): Query<SearchUsersQuery>,
) -> Result<Json<SearchUsersResponse>, ApiErrorResponse> {
    let limit = query.resolved_limit()?;

    let indexed = state.reader.search(&query.prefix, limit).await;
    if !indexed.is_empty() {
        return Ok(Json(SearchUsersResponse {
            users: indexed.into_iter().map(UserResponse::from).collect(),
            source: SearchSource::Index,
        }));
    }

    tracing::debug!(prefix = %query.prefix, "Index miss, falling back to user table");
    let fallback = state
        .users
        .search_substring(&query.prefix, limit)
        .run_async()
        .await
        .map_err(ApiErrorResponse::from)?;

    Ok(Json(SearchUsersResponse {
        users: fallback.into_iter().map(UserResponse::from).collect(),
        source: SearchSource::Database,
    }))
}

// =============================================================================
// POST /sync/rebuild
// =============================================================================

/// Asks the scheduler for a full rebuild.
///
/// Always 202 when the scheduler answers; the body says whether a job was
/// enqueued or why not.
///
/// # Errors
///
/// 503 when the lock store or the job queue is unreachable.
pub async fn trigger_rebuild(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<RebuildResponse>), ApiErrorResponse> {
    let outcome = state.scheduler.schedule().await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(RebuildResponse {
            outcome: outcome.as_str().to_string(),
        }),
    ))
}

// =============================================================================
// POST /sync/users
// =============================================================================

/// Records a changed user and queues it for an index upsert.
///
/// The row is written to the user table first when this service owns it, so
/// a later full rebuild keeps the user instead of removing it.
///
/// # Errors
///
/// - 400 when `id` or `email` is blank
/// - 500 when the user table rejects the write
pub async fn sync_user(
    State(state): State<AppState>,
    Json(request): Json<UserSyncRequest>,
) -> Result<(StatusCode, Json<UserSyncResponse>), ApiErrorResponse> {
    let record = request.into_record()?;
    let saved = state
        .users
        .save(&record)
        .run_async()
        .await
        .map_err(ApiErrorResponse::from)?;
    if !saved {
        tracing::debug!(id = %record.id, "User table is external, queueing index upsert only");
    }
    state.hook.user_changed(&record).await;
    Ok((
        StatusCode::ACCEPTED,
        Json(UserSyncResponse {
            status: "queued".to_string(),
        }),
    ))
}
