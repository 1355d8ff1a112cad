//! Admin API for key pool management
//!
//! Operator surface for the rotation pool. Keys are only ever shown
//! redacted, so mutating endpoints address keys by pool index.
//!
//! Endpoints:
//! - GET  /admin/keys               — per-key stats (redacted)
//! - POST /admin/keys/{index}/reset — reset one key's counters
//! - POST /admin/reset              — reset the whole pool and discard state
//! - GET  /admin/pool               — pool status summary

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use tracing::info;

use key_pool::RotationManager;

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    manager: Arc<RotationManager>,
}

impl AdminState {
    pub fn new(manager: Arc<RotationManager>) -> Self {
        Self { manager }
    }
}

/// Build the admin axum router with all pool management endpoints.
pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/keys", get(list_keys))
        .route("/admin/keys/{index}/reset", post(reset_key))
        .route("/admin/reset", post(reset_all))
        .route("/admin/pool", get(pool_status))
        .with_state(state)
}

/// GET /admin/keys — per-key usage, error, and eligibility summary.
///
/// Never exposes full keys; identifiers are clipped to a short prefix.
async fn list_keys(State(state): State<AdminState>) -> impl IntoResponse {
    let stats = state.manager.stats().await;

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        serde_json::json!({ "keys": stats }).to_string(),
    )
}

/// POST /admin/keys/{index}/reset — reset one key's counters.
async fn reset_key(
    State(state): State<AdminState>,
    Path(index): Path<usize>,
) -> impl IntoResponse {
    match state.manager.reset_key_at(index).await {
        Ok(()) => {
            info!(index, "key reset via admin API");
            (
                StatusCode::OK,
                [(axum::http::header::CONTENT_TYPE, "application/json")],
                serde_json::json!({ "index": index, "status": "reset" }).to_string(),
            )
        }
        Err(e) => (
            StatusCode::NOT_FOUND,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            serde_json::json!({ "error": e.to_string() }).to_string(),
        ),
    }
}

/// POST /admin/reset — reset every key and discard persisted state.
async fn reset_all(State(state): State<AdminState>) -> impl IntoResponse {
    state.manager.reset_all().await;
    info!("pool reset via admin API");

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        serde_json::json!({ "status": "reset" }).to_string(),
    )
}

/// GET /admin/pool — pool status summary (same shape as the health endpoint).
async fn pool_status(State(state): State<AdminState>) -> impl IntoResponse {
    let health = state.manager.health().await;

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        health.to_string(),
    )
}
