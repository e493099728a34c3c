//! Health check endpoints.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
};
use serde::Serialize;

use crate::metrics::MetricsSnapshot;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Basic health check (is the server running?)
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct ReadyResponse {
    status: &'static str,
    redis: Option<bool>,
    live_machines: usize,
}

/// Readiness check (are all dependencies healthy?)
pub async fn ready_check(
    State(state): State<AppState>,
) -> Result<Json<ReadyResponse>, StatusCode> {
    let redis = match &state.store {
        Some(store) => Some(store.ping().await),
        None => None,
    };

    if redis == Some(false) {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(Json(ReadyResponse {
        status: "ready",
        redis,
        live_machines: state.heartbeats.live_machines().await.len(),
    }))
}

#[derive(Serialize)]
pub struct MetricsResponse {
    instance_id: String,
    uptime_secs: u64,
    #[serde(flatten)]
    counters: MetricsSnapshot,
}

/// Metrics endpoint (for monitoring)
pub async fn metrics(
    State(state): State<AppState>,
) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        instance_id: state.config.instance_id.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        counters: state.metrics.snapshot(),
    })
}
