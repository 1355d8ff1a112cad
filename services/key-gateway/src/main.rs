//! Gemini key rotation gateway
//!
//! Single-binary Rust service that:
//! 1. Loads a fixed pool of API keys from the environment or a keys file
//! 2. Listens for generate-content style requests
//! 3. Forwards each request upstream with automatic key rotation and retry
//! 4. Exposes pool health, Prometheus metrics, and an admin reset surface

mod admin;
mod config;
mod metrics;
mod proxy;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use key_pool::{JsonFileStore, NullStore, RotationManager, StateStore};
use upstream::GenerateClient;

use crate::config::Config;
use crate::proxy::GatewayState;

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    gateway: GatewayState,
    prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// Applies a concurrency limit layer based on `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(proxy_handler)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting gemini-key-gateway");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.gateway.listen_addr,
        upstream_url = %config.gateway.upstream_url,
        keys = config.gateway.keys.len(),
        exhaustion = ?config.rotation.exhaustion,
        "configuration loaded"
    );

    let store: Box<dyn StateStore> = match &config.rotation.state_path {
        Some(path) => {
            info!(path = %path.display(), "rotation state persistence enabled");
            Box::new(JsonFileStore::new(path.clone()))
        }
        None => Box::new(NullStore),
    };

    let manager = Arc::new(
        RotationManager::with_store(config.api_keys(), config.rotation.rotation_config(), store)
            .await,
    );

    let client = GenerateClient::new(
        reqwest::Client::new(),
        config.gateway.upstream_url.clone(),
        Duration::from_secs(config.gateway.timeout_secs),
    );

    let state = AppState {
        gateway: GatewayState {
            manager: manager.clone(),
            client,
        },
        prometheus,
    };

    let app = build_router(state, config.gateway.max_connections)
        .merge(admin::build_admin_router(admin::AdminState::new(manager)));

    let listener = TcpListener::bind(config.gateway.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.gateway.listen_addr))?;
    info!(addr = %config.gateway.listen_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    info!("shutdown signal received, draining");
}

/// GET /health — pool health; 503 once no key is eligible.
async fn health_handler(State(state): State<AppState>) -> Response {
    let health = state.gateway.manager.health().await;
    let status = if health["status"] == "unhealthy" {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    } else {
        axum::http::StatusCode::OK
    };
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        health.to_string(),
    )
        .into_response()
}

/// GET /metrics — Prometheus text exposition.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    state.prometheus.render().into_response()
}

/// Fallback: every other route is forwarded upstream with rotation.
async fn proxy_handler(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().simple());
    let method = request.method().clone();
    let start = std::time::Instant::now();

    let response = proxy::handle(&state.gateway, request, request_id).await;

    metrics::record_request(
        response.status().as_u16(),
        method.as_str(),
        start.elapsed().as_secs_f64(),
    );
    response
}
