//! Request interceptors for the monitoring routes.
//!
//! Applied in order: [`require_monitoring_token`] then [`limit_by_identity`].
//! Each may end the request with a bare status code; an admitted request
//! reaches the wrapped handler unchanged.

use axum::{
    extract::{Query, Request, State},
    http::{HeaderMap, StatusCode, Uri, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::atomic::Ordering;

use crate::state::AppState;

/// Token carried as a query parameter instead of a bearer header
#[derive(Debug, Deserialize)]
struct TokenParam {
    access_token: Option<String>,
}

/// Identity taken from a verified monitoring token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoringIdentity(pub String);

/// Reject requests without a valid monitoring token (401).
pub async fn require_monitoring_token(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = bearer_token(req.headers()).or_else(|| query_token(req.uri()));

    let Some(token) = token else {
        state.metrics.unauthorized.fetch_add(1, Ordering::Relaxed);
        return StatusCode::UNAUTHORIZED.into_response();
    };

    match state.verifier.verify_monitoring(&token) {
        Ok(identity) => {
            req.extensions_mut().insert(MonitoringIdentity(identity));
            next.run(req).await
        }
        Err(e) => {
            // Logged here only; the response never says which check failed.
            tracing::debug!(error = %e, "Monitoring token rejected");
            state.metrics.unauthorized.fetch_add(1, Ordering::Relaxed);
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}

/// Apply the per-identity budget (429 when exhausted).
pub async fn limit_by_identity(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(MonitoringIdentity(identity)) = req.extensions().get::<MonitoringIdentity>().cloned() else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    if !state.limiter.admit(&identity).await {
        state.metrics.rate_limited.fetch_add(1, Ordering::Relaxed);
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }

    next.run(req).await
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))?;
    Some(token.trim().to_string()).filter(|t| !t.is_empty())
}

fn query_token(uri: &Uri) -> Option<String> {
    let Query(param) = Query::<TokenParam>::try_from_uri(uri).ok()?;
    param.access_token.filter(|t| !t.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc.def.ghi"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(bearer_token(&headers), None);
    }

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[test]
    fn test_query_token() {
        assert_eq!(
            query_token(&uri("/v2/monitoring/ndt?country=US&access_token=abc.def.ghi")).as_deref(),
            Some("abc.def.ghi")
        );
        assert_eq!(
            query_token(&uri("/v2/monitoring/ndt?access_token=a%2Eb.c")).as_deref(),
            Some("a.b.c")
        );
        assert_eq!(query_token(&uri("/v2/monitoring/ndt?country=US")), None);
        assert_eq!(query_token(&uri("/v2/monitoring/ndt?access_token=")), None);
        assert_eq!(query_token(&uri("/v2/monitoring/ndt")), None);
    }
}
