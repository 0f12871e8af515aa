//! Banner, health, and metrics endpoints
//!
//! - `/` - Exporter name, version, and commit
//! - `/healthz` - Upstream Jolokia reachability (200 or 503)
//! - `/metrics` - Prometheus metrics in text format

use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::jolokia::JolokiaClient;
use crate::server::metrics::SharedMetrics;
use crate::BuildInfo;

/// Shared state for all handlers
#[derive(Clone)]
pub struct ServerState {
    build: Arc<BuildInfo>,
    client: Arc<dyn JolokiaClient>,
    metrics: SharedMetrics,
}

impl ServerState {
    /// Create new server state
    pub fn new(build: BuildInfo, client: Arc<dyn JolokiaClient>, metrics: SharedMetrics) -> Self {
        Self {
            build: Arc::new(build),
            client,
            metrics,
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthyBody {
    jolokia: String,
    seastat: String,
}

#[derive(Debug, Serialize)]
struct UnhealthyBody {
    error: String,
}

/// Root handler
///
/// Always returns 200 with the build banner.
async fn root(State(state): State<ServerState>) -> (StatusCode, String) {
    (StatusCode::OK, state.build.banner())
}

/// Health handler
///
/// Queries the agent once per request. 200 with both versions when the
/// agent answers, 503 with the error message otherwise.
async fn healthz(State(state): State<ServerState>) -> Response {
    match state.client.version().await {
        Ok(jolokia) => {
            state.metrics.record_health_check(true);
            let body = HealthyBody {
                jolokia,
                seastat: state.build.version.clone(),
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => {
            warn!(error = %e, "Health check failed");
            state.metrics.record_health_check(false);
            let body = UnhealthyBody {
                error: e.to_string(),
            };
            (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
        }
    }
}

/// Prometheus metrics handler
///
/// Returns metrics in Prometheus text format for scraping.
async fn metrics(State(state): State<ServerState>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

/// Build the router for the banner, health, and metrics endpoints
pub fn build_router(state: ServerState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/metrics", get(self::metrics))
        .with_state(state)
}
