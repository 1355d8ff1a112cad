//! Request forwarding with key rotation
//!
//! Accepts generate-content style JSON requests, runs them through the
//! rotation manager, and maps terminal failures to HTTP responses. The
//! upstream's own error status passes through; pool exhaustion becomes 503
//! with the structured pool summary.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{error, instrument, warn};

use key_pool::{Error as PoolError, RotationManager};
use upstream::GenerateClient;

/// Shared state for the forwarding path.
#[derive(Clone)]
pub struct GatewayState {
    pub manager: Arc<RotationManager>,
    pub client: GenerateClient,
}

/// JSON error response: {"error":{"type":"gateway_error","message":"...","request_id":"req_..."}}
fn error_response(status: StatusCode, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": "gateway_error",
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Handle one inbound request end to end.
///
/// Only POST with a JSON body is accepted; the request path (with query) is
/// forwarded verbatim to the upstream.
#[instrument(skip_all, fields(request_id = %request_id, path = %request.uri().path()))]
pub async fn handle(
    state: &GatewayState,
    request: axum::http::Request<axum::body::Body>,
    request_id: String,
) -> Response {
    if request.method() != axum::http::Method::POST {
        return error_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "only POST is supported",
            &request_id,
        );
    }

    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.to_string())
        .unwrap_or_else(|| "/".to_string());

    let body_bytes = match axum::body::to_bytes(request.into_body(), 10 * 1024 * 1024).await {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, "failed to read request body");
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("invalid request body: {e}"),
                &request_id,
            );
        }
    };

    let payload: serde_json::Value = match serde_json::from_slice(&body_bytes) {
        Ok(v) => v,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("request body is not valid JSON: {e}"),
                &request_id,
            );
        }
    };

    forward_request(state, &path_and_query, &payload, &request_id).await
}

/// Run the upstream call through the rotation manager and map the outcome.
async fn forward_request(
    state: &GatewayState,
    path: &str,
    payload: &serde_json::Value,
    request_id: &str,
) -> Response {
    let client = &state.client;
    let result = state
        .manager
        .run_with_rotation(move |key| async move { client.post_json(path, &key, payload).await })
        .await;

    match result {
        Ok(value) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            value.to_string(),
        )
            .into_response(),
        Err(PoolError::PoolExhausted(body)) => {
            warn!("key pool exhausted");
            crate::metrics::record_upstream_error("exhausted");
            // The exhausted message is already the structured JSON summary
            let payload = serde_json::from_str::<serde_json::Value>(&body).unwrap_or_else(|_| {
                serde_json::json!({
                    "error": {
                        "type": "pool_exhausted",
                        "message": body,
                        "request_id": request_id,
                    }
                })
            });
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [(axum::http::header::CONTENT_TYPE, "application/json")],
                payload.to_string(),
            )
                .into_response()
        }
        Err(PoolError::Upstream(e)) => {
            error!(error = %e, status = ?e.status, "upstream call failed terminally");
            crate::metrics::record_upstream_error(if e.status == Some(429) {
                "rate_limited"
            } else {
                "upstream"
            });
            let status = e
                .status
                .and_then(|s| StatusCode::from_u16(s).ok())
                .unwrap_or(StatusCode::BAD_GATEWAY);
            error_response(status, &e.message, request_id)
        }
        Err(e) => {
            error!(error = %e, "rotation error");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string(), request_id)
        }
    }
}
