//! Shared constants for locate components.

/// Default locate service HTTP listen address
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Default base URL used by [`crate::LocateClient`]
pub const DEFAULT_LOCATE_URL: &str = "https://locate.measurementlab.net/v2/nearest/";

/// Environment variable overriding the client base URL
pub const LOCATE_URL_ENV: &str = "LOCATE_URL";

/// Default access token validity (1 minute)
pub const DEFAULT_ACCESS_TOKEN_TTL_SECS: u64 = 60;

/// Default heartbeat read timeout (30 seconds)
pub const DEFAULT_HEARTBEAT_READ_TIMEOUT_SECS: u64 = 30;

/// Send deadline for the pong written after each heartbeat message
pub const DEFAULT_PONG_DEADLINE_MS: u64 = 1000;

/// Default heartbeat agent send period (seconds)
pub const DEFAULT_HEARTBEAT_PERIOD_SECS: u64 = 10;

/// Default upper bound for a single query, including the ranking backend call
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Query parameter carrying an access token
pub const ACCESS_TOKEN_PARAM: &str = "access_token";

/// Claim issuer and audience identifiers
pub mod claims {
    /// Issuer of monitoring tokens
    pub const ISSUER_MONITORING: &str = "monitoring";

    /// Issuer of access tokens minted by this service
    pub const ISSUER_LOCATE: &str = "locate";

    /// Audience of monitoring tokens (this service)
    pub const AUDIENCE_LOCATE: &str = "locate";

    /// Audience of access tokens (platform servers)
    pub const AUDIENCE_PLATFORM: &str = "platform";
}

/// Redis key prefixes
pub mod redis_keys {
    /// Last heartbeat message: heartbeat:{machine}
    pub const HEARTBEAT_PREFIX: &str = "heartbeat:";
}

/// HTTP route paths
pub mod paths {
    /// Public nearest query
    pub const NEAREST: &str = "/v2/nearest/{*service}";

    /// Priority nearest query (same contract as NEAREST)
    pub const PRIORITY_NEAREST: &str = "/v2/priority/nearest/{*service}";

    /// Deprecated beta query path
    pub const BETA_QUERY: &str = "/v2beta1/query/{*service}";

    /// Monitoring query, gated by token verification and rate limiting
    pub const MONITORING: &str = "/v2/platform/monitoring/{*service}";

    /// Deprecated monitoring path
    pub const LEGACY_MONITORING: &str = "/v2/monitoring/{*service}";

    /// Heartbeat WebSocket upgrade
    pub const HEARTBEAT: &str = "/v2/platform/heartbeat/{machine}";

    /// Access token signer public keys
    pub const KEYS: &str = "/v2/platform/keys";
}
