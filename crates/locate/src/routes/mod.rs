//! HTTP route handlers for the locate service.

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::get,
};
use locate_api::constants::paths;
use tower_http::trace::TraceLayer;

use crate::access::{limit_by_identity, require_monitoring_token};
use crate::state::AppState;

mod health;
mod heartbeat;
mod keys;
mod nearest;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready_check))
        .route("/metrics", get(health::metrics))

        // Public queries
        .route(paths::NEAREST, get(nearest::nearest))
        .route(paths::PRIORITY_NEAREST, get(nearest::nearest))
        .route(paths::BETA_QUERY, get(nearest::nearest))

        // Platform
        .route(paths::HEARTBEAT, get(heartbeat::heartbeat))
        .route(paths::KEYS, get(keys::keys))

        .merge(monitoring_routes(state.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Monitoring queries: token verification runs first, then the rate limiter.
fn monitoring_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(paths::MONITORING, get(nearest::monitoring))
        .route(paths::LEGACY_MONITORING, get(nearest::monitoring))
        // Layers wrap outward: the last one added sees the request first.
        .route_layer(from_fn_with_state(state.clone(), limit_by_identity))
        .route_layer(from_fn_with_state(state, require_monitoring_token))
}
