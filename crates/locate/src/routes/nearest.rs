//! Nearest-server query endpoints.

use axum::{
    Extension, Json,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::StatusCode,
};
use locate_api::{FilterParams, LocateError, NearestResult};
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;

use crate::access::MonitoringIdentity;
use crate::state::AppState;

pub type NearestReply = (StatusCode, Json<NearestResult>);

/// Public query: `GET /v2/nearest/{service}?site=|country=|region=`
///
/// Returns:
/// - 200: `{results: [...]}`
/// - 400: invalid filter
/// - 502: the ranking backend failed
/// - 503: no live servers matched
/// - 504: the query timed out
pub async fn nearest(
    State(state): State<AppState>,
    Path(service): Path<String>,
    params: Result<Query<FilterParams>, QueryRejection>,
) -> NearestReply {
    answer(&state, &service, params).await
}

/// Monitoring query. Reached only through token verification and the rate limiter.
pub async fn monitoring(
    State(state): State<AppState>,
    Extension(MonitoringIdentity(identity)): Extension<MonitoringIdentity>,
    Path(service): Path<String>,
    params: Result<Query<FilterParams>, QueryRejection>,
) -> NearestReply {
    tracing::debug!(identity = %identity, service = %service, "Monitoring query");
    answer(&state, &service, params).await
}

async fn answer(
    state: &AppState,
    service: &str,
    params: Result<Query<FilterParams>, QueryRejection>,
) -> NearestReply {
    // Undecodable query strings (repeated keys, bad encoding) are filter errors.
    let params = match params {
        Ok(Query(params)) => params,
        Err(rejection) => return failed(state, service, LocateError::InvalidFilter(rejection.body_text())),
    };

    // Dropping the handler future (client gone) cancels too.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    spawn_deadline(cancel.clone(), state.config.request_timeout());

    match state.resolver.resolve_params(&params, service, &cancel).await {
        Ok(targets) => {
            state.metrics.queries_served.fetch_add(1, Ordering::Relaxed);
            (StatusCode::OK, Json(NearestResult::ok(targets)))
        }
        Err(e) => failed(state, service, e),
    }
}

fn failed(state: &AppState, service: &str, err: LocateError) -> NearestReply {
    state.metrics.queries_failed.fetch_add(1, Ordering::Relaxed);
    log_failure(service, &err);
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(NearestResult::err(&err)))
}

/// Cancel `cancel` once `timeout` elapses, unless it is cancelled first.
fn spawn_deadline(cancel: CancellationToken, timeout: std::time::Duration) {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => cancel.cancel(),
            _ = cancel.cancelled() => {}
        }
    });
}

fn log_failure(service: &str, err: &LocateError) {
    match err {
        LocateError::InvalidFilter(_) | LocateError::NoAvailableServers => {
            tracing::debug!(service = service, error = %err, "Query not answered")
        }
        LocateError::Canceled => tracing::info!(service = service, "Query timed out"),
        _ => tracing::warn!(service = service, error = %err, "Query failed"),
    }
}
