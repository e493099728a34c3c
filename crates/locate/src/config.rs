//! Configuration management for the locate service.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use locate_api::constants::{
    DEFAULT_ACCESS_TOKEN_TTL_SECS, DEFAULT_HEARTBEAT_READ_TIMEOUT_SECS, DEFAULT_LISTEN_ADDR,
    DEFAULT_PONG_DEADLINE_MS, DEFAULT_REQUEST_TIMEOUT_SECS, claims,
};

use crate::resolver::MachineEntry;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// This instance's ID (auto-generated if not set)
    #[serde(default = "generate_instance_id")]
    pub instance_id: String,

    /// Redis URL for mirroring heartbeat state. Disabled when unset.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Upper bound for one query, ranking backend call included
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Access token signing key
    #[serde(default)]
    pub signer: SignerConfig,

    /// Access tokens minted for clients
    #[serde(default)]
    pub access: AccessConfig,

    /// Monitoring token verification
    #[serde(default)]
    pub monitoring: MonitoringConfig,

    /// Heartbeat connection timing
    #[serde(default)]
    pub heartbeat: HeartbeatSettings,

    /// Monitoring rate limits
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Ranking backend selection
    #[serde(default)]
    pub ranking: RankingConfig,
}

/// Signing key location.
///
/// The KMS identifiers name the key for an external loader that decrypts it
/// into `key_path`; they are logged at startup and not dereferenced here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignerConfig {
    /// File holding the raw 32-byte Ed25519 seed
    #[serde(default)]
    pub key_path: Option<String>,

    /// Inline base64url Ed25519 seed
    #[serde(default)]
    pub key_b64: Option<String>,

    #[serde(default)]
    pub kms_project: Option<String>,
    #[serde(default)]
    pub kms_location: Option<String>,
    #[serde(default)]
    pub kms_keyring: Option<String>,
    #[serde(default)]
    pub kms_key: Option<String>,
}

impl SignerConfig {
    /// Full KMS key name, when every component is configured
    pub fn kms_key_name(&self) -> Option<String> {
        match (&self.kms_project, &self.kms_location, &self.kms_keyring, &self.kms_key) {
            (Some(project), Some(location), Some(keyring), Some(key)) => Some(format!(
                "projects/{project}/locations/{location}/keyRings/{keyring}/cryptoKeys/{key}"
            )),
            _ => None,
        }
    }
}

/// Access token claims
#[derive(Debug, Clone, Deserialize)]
pub struct AccessConfig {
    #[serde(default = "default_access_issuer")]
    pub issuer: String,

    #[serde(default = "default_access_audience")]
    pub audience: String,

    /// Token validity in seconds
    #[serde(default = "default_access_ttl")]
    pub ttl_secs: u64,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            issuer: default_access_issuer(),
            audience: default_access_audience(),
            ttl_secs: default_access_ttl(),
        }
    }
}

/// Monitoring token verification
#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_monitoring_issuer")]
    pub issuer: String,

    #[serde(default = "default_monitoring_audience")]
    pub audience: String,

    /// Trusted public keys (base64url). Several may be valid during rotation.
    #[serde(default)]
    pub verify_keys: Vec<String>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            issuer: default_monitoring_issuer(),
            audience: default_monitoring_audience(),
            verify_keys: Vec::new(),
        }
    }
}

/// Heartbeat connection timing
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatSettings {
    /// Silence after which a platform server is considered dead
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Send deadline for each pong
    #[serde(default = "default_pong_deadline")]
    pub pong_deadline_ms: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            read_timeout_secs: default_read_timeout(),
            pong_deadline_ms: default_pong_deadline(),
        }
    }
}

/// Monitoring rate limits
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Requests an identity may make at once
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Sustained requests per minute per identity
    #[serde(default = "default_max_requests")]
    pub max_requests_per_minute: u32,

    /// Buckets untouched for this long are dropped
    #[serde(default = "default_idle_prune")]
    pub idle_prune_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst: default_burst(),
            max_requests_per_minute: default_max_requests(),
            idle_prune_secs: default_idle_prune(),
        }
    }
}

/// Ranking backend: an upstream URL, or the static machine table when unset
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RankingConfig {
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub machines: Vec<MachineEntry>,
}

// Default value functions
fn default_listen_addr() -> String { DEFAULT_LISTEN_ADDR.to_string() }
fn default_request_timeout() -> u64 { DEFAULT_REQUEST_TIMEOUT_SECS }
fn default_access_issuer() -> String { claims::ISSUER_LOCATE.to_string() }
fn default_access_audience() -> String { claims::AUDIENCE_PLATFORM.to_string() }
fn default_access_ttl() -> u64 { DEFAULT_ACCESS_TOKEN_TTL_SECS }
fn default_monitoring_issuer() -> String { claims::ISSUER_MONITORING.to_string() }
fn default_monitoring_audience() -> String { claims::AUDIENCE_LOCATE.to_string() }
fn default_read_timeout() -> u64 { DEFAULT_HEARTBEAT_READ_TIMEOUT_SECS }
fn default_pong_deadline() -> u64 { DEFAULT_PONG_DEADLINE_MS }
fn default_burst() -> u32 { 10 }
fn default_max_requests() -> u32 { 60 }
fn default_idle_prune() -> u64 { 600 } // 10 minutes

fn generate_instance_id() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    format!("locate-{:08x}", rng.random::<u32>())
}

impl AppConfig {
    /// Load configuration from file, with CLI overrides
    pub fn load(config_path: &str, args: &super::Args) -> Result<Self> {
        let mut config = if Path::new(config_path).exists() {
            let settings = config::Config::builder()
                .add_source(config::File::with_name(config_path))
                .build()
                .context("Failed to load config file")?;

            settings
                .try_deserialize()
                .context("Failed to parse config")?
        } else {
            tracing::warn!(path = config_path, "Config file not found, using defaults");
            Self::default()
        };

        // Apply CLI overrides
        if let Some(ref listen) = args.listen {
            config.listen_addr = listen.clone();
        }
        if let Some(ref redis_url) = args.redis_url {
            config.redis_url = Some(redis_url.clone());
        }
        if let Some(ref key_path) = args.signer_key {
            config.signer.key_path = Some(key_path.clone());
        }
        if !args.monitoring_keys.is_empty() {
            config.monitoring.verify_keys = args.monitoring_keys.clone();
        }

        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            instance_id: generate_instance_id(),
            redis_url: None,
            request_timeout_secs: default_request_timeout(),
            signer: SignerConfig::default(),
            access: AccessConfig::default(),
            monitoring: MonitoringConfig::default(),
            heartbeat: HeartbeatSettings::default(),
            rate_limit: RateLimitConfig::default(),
            ranking: RankingConfig::default(),
        }
    }
}
