//! Client for the Locate API v2.
//!
//! ```no_run
//! # async fn run() -> Result<(), locate_api::LocateError> {
//! use locate_api::{LocateClient, QueryFilter};
//!
//! let client = LocateClient::new("my-measurement-tool/1.0")?;
//! let filter = QueryFilter::Country("US".to_string());
//! let targets = client.nearest("ndt/ndt7", &filter).await?;
//! # Ok(())
//! # }
//! ```

use reqwest::Url;
use reqwest::header::USER_AGENT;

use crate::constants::{DEFAULT_LOCATE_URL, LOCATE_URL_ENV};
use crate::error::LocateError;
use crate::types::{NearestResult, QueryFilter, Target};

/// Client for contacting a deployed locate service.
///
/// Dropping the future returned by [`LocateClient::nearest`] abandons the
/// in-flight request.
#[derive(Debug, Clone)]
pub struct LocateClient {
    http: reqwest::Client,
    user_agent: String,
    base_url: Url,
}

impl LocateClient {
    /// Create a client using `LOCATE_URL` from the environment, or the public
    /// endpoint when unset. The user agent is mandatory; an empty one makes
    /// every query fail with [`LocateError::NoUserAgent`].
    pub fn new(user_agent: impl Into<String>) -> Result<Self, LocateError> {
        let base = std::env::var(LOCATE_URL_ENV).unwrap_or_else(|_| DEFAULT_LOCATE_URL.to_string());
        Self::with_base_url(user_agent, &base)
    }

    /// Create a client for an explicit base URL
    pub fn with_base_url(user_agent: impl Into<String>, base_url: &str) -> Result<Self, LocateError> {
        let base_url =
            Url::parse(base_url).map_err(|e| LocateError::InvalidBaseUrl(format!("{base_url}: {e}")))?;

        Ok(Self {
            http: reqwest::Client::new(),
            user_agent: user_agent.into(),
            base_url,
        })
    }

    /// Replace the underlying HTTP client (timeouts, proxies, TLS settings)
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Return the nearest servers for `service` inside `filter`.
    ///
    /// [`LocateError::NoAvailableServers`] means the service answered but had
    /// nothing to offer. Batch clients should pause before asking again.
    pub async fn nearest(&self, service: &str, filter: &QueryFilter) -> Result<Vec<Target>, LocateError> {
        if self.user_agent.is_empty() {
            return Err(LocateError::NoUserAgent);
        }

        let url = nearest_url(&self.base_url, service, filter);
        tracing::debug!(url = %url, "Querying locate service");

        let response = self
            .http
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(transport_error)?;

        parse_nearest_reply(status, &body)
    }
}

/// Join `service` onto `base` and set the filter as the only query parameter
pub fn nearest_url(base: &Url, service: &str, filter: &QueryFilter) -> Url {
    let mut url = base.clone();
    let path = format!(
        "{}/{}",
        url.path().trim_end_matches('/'),
        service.trim_start_matches('/')
    );
    url.set_path(&path);
    url.query_pairs_mut()
        .clear()
        .append_pair(filter.key(), filter.value());
    url
}

fn transport_error(err: reqwest::Error) -> LocateError {
    if err.is_timeout() {
        LocateError::Canceled
    } else {
        LocateError::Transport(err.to_string())
    }
}

/// Classify a nearest reply from its status code and raw body.
///
/// - non-2xx with a structured `error` → [`LocateError::RemoteError`]
/// - any body that is not a v2 result, or non-2xx without `error` →
///   [`LocateError::MalformedUpstreamResponse`]
/// - 2xx without results → [`LocateError::NoAvailableServers`]
pub fn parse_nearest_reply(status: u16, body: &[u8]) -> Result<Vec<Target>, LocateError> {
    let malformed = || LocateError::MalformedUpstreamResponse {
        status,
        body: String::from_utf8_lossy(body).into_owned(),
    };

    let reply: NearestResult = match serde_json::from_slice(body) {
        Ok(reply) => reply,
        Err(e) => {
            // Gateway failures and foreign error schemas both land here.
            tracing::warn!(
                status = status,
                error = %e,
                body = %String::from_utf8_lossy(body),
                "Unparsable nearest reply"
            );
            return Err(malformed());
        }
    };

    let success = (200..300).contains(&status);
    match (success, reply.results, reply.error) {
        (false, _, Some(err)) | (true, None, Some(err)) => Err(LocateError::RemoteError {
            title: err.title,
            detail: err.detail,
        }),
        (false, _, None) => {
            tracing::warn!(status = status, "Failed nearest reply without error object");
            Err(malformed())
        }
        (true, Some(results), _) if !results.is_empty() => Ok(results),
        (true, _, _) => Err(LocateError::NoAvailableServers),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, extract::Query, http::HeaderMap, routing::get};
    use std::collections::HashMap;
    use tokio_test::assert_err;

    fn target(machine: &str) -> Target {
        Target {
            machine: machine.to_string(),
            urls: vec![format!("wss://{machine}/ndt/v7/download")],
            site: "lga03".to_string(),
            country: "US".to_string(),
            region: "US-NY".to_string(),
            score: 1.0,
        }
    }

    #[test]
    fn test_structured_error_is_remote_error() {
        let body = br#"{"results":null,"error":{"title":"bad request","detail":"unknown service","status":400}}"#;
        assert_eq!(
            parse_nearest_reply(400, body),
            Err(LocateError::RemoteError {
                title: "bad request".to_string(),
                detail: "unknown service".to_string(),
            })
        );
    }

    #[test]
    fn test_gateway_failure_is_malformed() {
        let result = parse_nearest_reply(502, b"<html>Bad Gateway</html>");
        assert!(matches!(
            result,
            Err(LocateError::MalformedUpstreamResponse { status: 502, .. })
        ));

        // Non-success without an error object is not a remote error either.
        let result = parse_nearest_reply(500, br#"{"results":null,"error":null}"#);
        assert!(matches!(result, Err(LocateError::MalformedUpstreamResponse { .. })));
    }

    #[test]
    fn test_empty_success_is_no_available_servers() {
        assert_eq!(parse_nearest_reply(200, b"{}"), Err(LocateError::NoAvailableServers));
        assert_eq!(
            parse_nearest_reply(200, br#"{"results":[],"error":null}"#),
            Err(LocateError::NoAvailableServers)
        );
    }

    #[test]
    fn test_success_returns_results() {
        let body = serde_json::to_vec(&NearestResult::ok(vec![target("mlab1-lga03")])).unwrap();
        let results = parse_nearest_reply(200, &body).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].machine, "mlab1-lga03");
    }

    #[tokio::test]
    async fn test_empty_user_agent_fails_before_request() {
        // Nothing listens on port 1; reaching the network would be a transport error.
        let client = LocateClient::with_base_url("", "http://127.0.0.1:1/v2/nearest/").unwrap();
        let result = client.nearest("ndt/ndt7", &QueryFilter::Country("US".into())).await;
        assert_eq!(assert_err!(result), LocateError::NoUserAgent);
    }

    #[test]
    fn test_invalid_base_url() {
        let result = LocateClient::with_base_url("agent/1.0", "not a url");
        assert!(matches!(result, Err(LocateError::InvalidBaseUrl(_))));
    }

    #[test]
    fn test_nearest_url_joins_service_and_filter() {
        let client = LocateClient::with_base_url("agent/1.0", "http://locate.test/v2/nearest/").unwrap();
        let url = nearest_url(client.base_url(), "ndt/ndt7", &QueryFilter::Region("US-NY".into()));
        assert_eq!(url.as_str(), "http://locate.test/v2/nearest/ndt/ndt7?region=US-NY");
    }

    #[tokio::test]
    async fn test_nearest_against_live_server() {
        async fn nearest(
            headers: HeaderMap,
            Query(params): Query<HashMap<String, String>>,
        ) -> Json<NearestResult> {
            assert_eq!(headers.get("user-agent").unwrap(), "agent/1.0");
            assert_eq!(params.get("site").map(String::as_str), Some("lga03"));
            Json(NearestResult::ok(vec![target("mlab1-lga03"), target("mlab2-lga03")]))
        }

        let app = Router::new().route("/v2/nearest/{*service}", get(nearest));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let client = LocateClient::with_base_url("agent/1.0", &format!("http://{addr}/v2/nearest/")).unwrap();
        let targets = client
            .nearest("ndt/ndt7", &QueryFilter::Site("lga03".into()))
            .await
            .unwrap();

        let machines: Vec<_> = targets.iter().map(|t| t.machine.as_str()).collect();
        assert_eq!(machines, ["mlab1-lga03", "mlab2-lga03"]);
    }
}
