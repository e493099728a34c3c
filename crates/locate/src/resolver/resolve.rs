//! Query resolution: rank, filter by liveness, attach access tokens.

use locate_api::constants::ACCESS_TOKEN_PARAM;
use locate_api::{FilterParams, LocateError, QueryFilter, Target};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;

use super::ranking::RankingBackend;
use crate::heartbeat::HeartbeatManager;
use crate::metrics::Metrics;
use crate::token::TokenIssuer;

/// Turns a filter and a service name into live, token-bearing targets
pub struct QueryResolver {
    backend: Arc<dyn RankingBackend>,
    heartbeats: Arc<HeartbeatManager>,
    issuer: Arc<TokenIssuer>,
    metrics: Arc<Metrics>,
}

impl QueryResolver {
    pub fn new(
        backend: Arc<dyn RankingBackend>,
        heartbeats: Arc<HeartbeatManager>,
        issuer: Arc<TokenIssuer>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            backend,
            heartbeats,
            issuer,
            metrics,
        }
    }

    /// Validate raw query parameters, then resolve.
    ///
    /// An invalid filter fails before the ranking backend is contacted.
    pub async fn resolve_params(
        &self,
        params: &FilterParams,
        service: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Target>, LocateError> {
        let filter = QueryFilter::try_from(params)?;
        self.resolve(&filter, service, cancel).await
    }

    /// Resolve `service` inside `filter`.
    ///
    /// Returns targets in backend order, restricted to live machines, each
    /// URL carrying an access token scoped to `service`. Cancelling `cancel`
    /// abandons the backend call and fails with [`LocateError::Canceled`].
    pub async fn resolve(
        &self,
        filter: &QueryFilter,
        service: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Target>, LocateError> {
        let ranked = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(service = service, filter = %filter, "Resolution canceled");
                return Err(LocateError::Canceled);
            }
            ranked = self.backend.rank(service, filter) => ranked?,
        };

        // Liveness filters, it never reorders.
        let mut candidates = Vec::with_capacity(ranked.len());
        for target in ranked {
            if self.heartbeats.is_live(&target.machine).await {
                candidates.push(target);
            }
        }

        if candidates.is_empty() {
            tracing::info!(service = service, filter = %filter, "No live candidates");
            return Err(LocateError::NoAvailableServers);
        }

        let total = candidates.len();
        let issued: Vec<Target> = candidates
            .into_iter()
            .filter_map(|target| self.with_token(service, target))
            .collect();

        if issued.is_empty() {
            tracing::error!(service = service, candidates = total, "Token issuance failed for every candidate");
            return Err(LocateError::IssuanceFailed(total));
        }

        tracing::debug!(
            service = service,
            filter = %filter,
            returned = issued.len(),
            dropped = total - issued.len(),
            "Query resolved"
        );

        Ok(issued)
    }

    fn with_token(&self, service: &str, mut target: Target) -> Option<Target> {
        match self.issuer.issue(service, &target) {
            Ok((_, token)) => {
                target.urls = target
                    .urls
                    .iter()
                    .map(|url| append_token(url, &token))
                    .collect();
                Some(target)
            }
            Err(e) => {
                self.metrics.issuance_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(machine = %target.machine, error = %e, "Dropping target after issuance failure");
                None
            }
        }
    }
}

fn append_token(url: &str, token: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!(
        "{url}{separator}{ACCESS_TOKEN_PARAM}={}",
        urlencoding::encode(token)
    )
}
