//! API module for HTTP handlers.
//!
//! This module contains the route table and the request/response handlers.

pub mod dto;
pub mod error;
pub mod handlers;

use axum::Router;
use axum::routing::{get, post};

pub use dto::{
    RebuildResponse, SearchSource, SearchUsersQuery, SearchUsersResponse, UserResponse,
    UserSyncRequest, UserSyncResponse,
};
pub use error::{ApiError, ApiErrorResponse, FieldError, ValidationError};
pub use handlers::{AppState, HealthResponse, health_check, search_users, sync_user, trigger_rebuild};

/// Builds the application router over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/users/search", get(search_users))
        .route("/sync/rebuild", post(trigger_rebuild))
        .route("/sync/users", post(sync_user))
        .with_state(state)
}
