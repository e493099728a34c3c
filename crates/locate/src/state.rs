//! Application state and shared resources.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::access::RateLimiter;
use crate::config::AppConfig;
use crate::heartbeat::{HeartbeatConfig, HeartbeatManager, HeartbeatStore, RedisStore};
use crate::metrics::Metrics;
use crate::resolver::{HttpRanking, QueryResolver, RankingBackend, StaticRanking};
use crate::token::{ClaimSigner, Ed25519Signer, TokenIssuer, TokenVerifier, TrustedKey};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<AppConfig>,

    /// Monitoring token verifier
    pub verifier: Arc<TokenVerifier>,

    /// Per-identity monitoring budget
    pub limiter: Arc<RateLimiter>,

    /// Heartbeat sessions and liveness
    pub heartbeats: Arc<HeartbeatManager>,

    /// Query resolution
    pub resolver: Arc<QueryResolver>,

    /// Public half of the access token signer, served on the keys endpoint
    pub signer_key: TrustedKey,

    /// Heartbeat mirror, when Redis is configured
    pub store: Option<Arc<dyn HeartbeatStore>>,

    pub metrics: Arc<Metrics>,

    pub started_at: Instant,
}

impl AppState {
    /// Create application state, loading keys and connecting to Redis if configured
    pub async fn new(config: AppConfig) -> Result<Self> {
        let signer = Arc::new(load_signer(&config)?);

        let store: Option<Arc<dyn HeartbeatStore>> = match &config.redis_url {
            Some(url) => Some(Arc::new(RedisStore::connect(url).await?)),
            None => None,
        };

        Self::build(config, signer, store)
    }

    /// Assemble state from an already loaded signer and store
    pub fn build(
        config: AppConfig,
        signer: Arc<Ed25519Signer>,
        store: Option<Arc<dyn HeartbeatStore>>,
    ) -> Result<Self> {
        let metrics = Arc::new(Metrics::default());

        let trusted = config
            .monitoring
            .verify_keys
            .iter()
            .map(|key| TrustedKey::from_b64(key))
            .collect::<Result<Vec<_>>>()
            .context("Failed to load monitoring verify keys")?;
        let verifier = Arc::new(TokenVerifier::new(
            trusted,
            config.monitoring.issuer.clone(),
            config.monitoring.audience.clone(),
        ));
        tracing::info!(keys = verifier.key_count(), "Monitoring verifier ready");

        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit.burst,
            config.rate_limit.max_requests_per_minute,
        ));

        let heartbeats = Arc::new(HeartbeatManager::new(
            HeartbeatConfig {
                read_timeout: Duration::from_secs(config.heartbeat.read_timeout_secs),
                write_deadline: Duration::from_millis(config.heartbeat.pong_deadline_ms),
            },
            store.clone(),
            metrics.clone(),
        ));

        let signer_key = signer.trusted_key();
        let issuer = Arc::new(TokenIssuer::new(
            signer as Arc<dyn ClaimSigner>,
            config.access.issuer.clone(),
            config.access.audience.clone(),
            Duration::from_secs(config.access.ttl_secs),
        ));

        let backend: Arc<dyn RankingBackend> = match &config.ranking.url {
            Some(url) => Arc::new(HttpRanking::new(url, config.request_timeout())?),
            None => {
                if config.ranking.machines.is_empty() {
                    tracing::warn!("No ranking machines configured; every query will find no servers");
                }
                Arc::new(StaticRanking::new(config.ranking.machines.clone()))
            }
        };

        let resolver = Arc::new(QueryResolver::new(
            backend,
            heartbeats.clone(),
            issuer,
            metrics.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            verifier,
            limiter,
            heartbeats,
            resolver,
            signer_key,
            store,
            metrics,
            started_at: Instant::now(),
        })
    }
}

fn load_signer(config: &AppConfig) -> Result<Ed25519Signer> {
    if let Some(name) = config.signer.kms_key_name() {
        tracing::info!(key = %name, "Signer key provisioned from KMS");
    }

    let signer = match (&config.signer.key_path, &config.signer.key_b64) {
        (Some(path), _) => Ed25519Signer::from_file(path)
            .with_context(|| format!("Failed to load signer key from {path}"))?,
        (None, Some(seed)) => Ed25519Signer::from_b64(seed)?,
        (None, None) => {
            tracing::warn!("No signer key configured, generating an ephemeral key");
            Ed25519Signer::generate()
        }
    };

    tracing::info!(kid = signer.key_id(), "Access token signer loaded");
    Ok(signer)
}
