//! Ranking backends.
//!
//! A backend turns (service, filter) into candidate targets, best first. It
//! knows nothing about liveness or tokens.

use async_trait::async_trait;
use locate_api::{LocateError, QueryFilter, Target, nearest_url, parse_nearest_reply};
use reqwest::Url;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Source of ranked candidates for a query
#[async_trait]
pub trait RankingBackend: Send + Sync {
    async fn rank(&self, service: &str, filter: &QueryFilter) -> Result<Vec<Target>, LocateError>;
}

/// A machine entry in the static ranking table
#[derive(Debug, Clone, Deserialize)]
pub struct MachineEntry {
    pub machine: String,
    pub site: String,
    pub country: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub score: f64,
    /// Service name → URLs offered by this machine
    #[serde(default)]
    pub services: BTreeMap<String, Vec<String>>,
}

/// Ranking from a fixed machine table, ordered by descending score
pub struct StaticRanking {
    machines: Vec<MachineEntry>,
}

impl StaticRanking {
    pub fn new(machines: Vec<MachineEntry>) -> Self {
        Self { machines }
    }
}

#[async_trait]
impl RankingBackend for StaticRanking {
    async fn rank(&self, service: &str, filter: &QueryFilter) -> Result<Vec<Target>, LocateError> {
        let mut targets: Vec<Target> = self
            .machines
            .iter()
            .filter_map(|entry| {
                let urls = entry.services.get(service)?;
                let target = Target {
                    machine: entry.machine.clone(),
                    urls: urls.clone(),
                    site: entry.site.clone(),
                    country: entry.country.clone(),
                    region: entry.region.clone(),
                    score: entry.score,
                };
                filter.matches(&target).then_some(target)
            })
            .collect();

        // Stable, so equal scores keep table order.
        targets.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(targets)
    }
}

/// Ranking delegated to an upstream service speaking the v2 nearest protocol
pub struct HttpRanking {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpRanking {
    pub fn new(base_url: &str, timeout: std::time::Duration) -> anyhow::Result<Self> {
        use anyhow::Context;

        let base_url = Url::parse(base_url).context("Invalid ranking backend URL")?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("locate/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("Failed to build ranking backend client")?;

        Ok(Self { http, base_url })
    }
}

#[async_trait]
impl RankingBackend for HttpRanking {
    async fn rank(&self, service: &str, filter: &QueryFilter) -> Result<Vec<Target>, LocateError> {
        let url = nearest_url(&self.base_url, service, filter);

        let response = self.http.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                LocateError::Canceled
            } else {
                LocateError::Transport(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| LocateError::Transport(e.to_string()))?;

        parse_nearest_reply(status, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode, routing::get};
    use locate_api::{ErrorObject, NearestResult};

    fn entry(machine: &str, site: &str, region: &str, score: f64, service: &str) -> MachineEntry {
        MachineEntry {
            machine: machine.to_string(),
            site: site.to_string(),
            country: "US".to_string(),
            region: region.to_string(),
            score,
            services: BTreeMap::from([(
                service.to_string(),
                vec![format!("wss://{machine}/ndt/v7/download")],
            )]),
        }
    }

    #[tokio::test]
    async fn test_static_ranking_filters_and_orders() {
        let ranking = StaticRanking::new(vec![
            entry("mlab1-lga03", "lga03", "US-NY", 0.5, "ndt/ndt7"),
            entry("mlab1-sea07", "sea07", "US-WA", 0.9, "ndt/ndt7"),
            entry("mlab2-lga03", "lga03", "US-NY", 0.7, "ndt/ndt7"),
            entry("mlab3-lga03", "lga03", "US-NY", 0.8, "wehe/replay"),
        ]);

        let us = ranking
            .rank("ndt/ndt7", &QueryFilter::Country("us".into()))
            .await
            .unwrap();
        let machines: Vec<_> = us.iter().map(|t| t.machine.as_str()).collect();
        assert_eq!(machines, ["mlab1-sea07", "mlab2-lga03", "mlab1-lga03"]);

        let lga = ranking
            .rank("ndt/ndt7", &QueryFilter::Site("lga03".into()))
            .await
            .unwrap();
        assert_eq!(lga.len(), 2);
        assert_eq!(lga[0].urls, vec!["wss://mlab2-lga03/ndt/v7/download".to_string()]);

        let none = ranking
            .rank("ndt/ndt7", &QueryFilter::Region("US-CA".into()))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}/v2/nearest/")
    }

    #[tokio::test]
    async fn test_http_ranking_structured_error() {
        let app = Router::new().route(
            "/v2/nearest/{*service}",
            get(|| async {
                let body = NearestResult {
                    results: None,
                    error: Some(ErrorObject {
                        title: "unsupported service".to_string(),
                        detail: "no such service".to_string(),
                        status: 400,
                    }),
                };
                (StatusCode::BAD_REQUEST, Json(body))
            }),
        );
        let base = serve(app).await;

        let ranking = HttpRanking::new(&base, std::time::Duration::from_secs(5)).unwrap();
        let result = ranking.rank("bogus", &QueryFilter::Country("US".into())).await;
        assert_eq!(
            result,
            Err(LocateError::RemoteError {
                title: "unsupported service".to_string(),
                detail: "no such service".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_http_ranking_gateway_failure() {
        let app = Router::new().route(
            "/v2/nearest/{*service}",
            get(|| async { (StatusCode::BAD_GATEWAY, "<html>502 Bad Gateway</html>") }),
        );
        let base = serve(app).await;

        let ranking = HttpRanking::new(&base, std::time::Duration::from_secs(5)).unwrap();
        let result = ranking.rank("ndt/ndt7", &QueryFilter::Country("US".into())).await;
        assert!(matches!(
            result,
            Err(LocateError::MalformedUpstreamResponse { status: 502, .. })
        ));
    }
}
