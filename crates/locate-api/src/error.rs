//! Error taxonomy shared by the locate service and its client.

use thiserror::Error;

/// Errors surfaced by a nearest-server query
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocateError {
    /// Zero or more than one of site/country/region was given
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// No live server matched the query. Callers should back off and retry.
    #[error("no available servers")]
    NoAvailableServers,

    /// The upstream reported a structured failure
    #[error("{title}: {detail}")]
    RemoteError { title: String, detail: String },

    /// The upstream reply did not follow the v2 result schema
    #[error("malformed upstream response (status {status})")]
    MalformedUpstreamResponse { status: u16, body: String },

    /// Every candidate failed token issuance
    #[error("access token issuance failed for all {0} candidates")]
    IssuanceFailed(usize),

    /// The caller canceled or the request deadline elapsed
    #[error("request canceled")]
    Canceled,

    /// The client was built with an empty user agent
    #[error("client has no user-agent specified")]
    NoUserAgent,

    /// Connection-level failure talking to the upstream
    #[error("transport error: {0}")]
    Transport(String),

    /// The configured base URL could not be parsed
    #[error("invalid base url: {0}")]
    InvalidBaseUrl(String),
}

impl LocateError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidFilter(_) => 400,
            Self::NoAvailableServers => 503,
            Self::RemoteError { .. } => 502,
            Self::MalformedUpstreamResponse { .. } => 502,
            Self::IssuanceFailed(_) => 500,
            Self::Canceled => 504,
            Self::NoUserAgent => 400,
            Self::Transport(_) => 502,
            Self::InvalidBaseUrl(_) => 500,
        }
    }

    /// Short human-readable title for the error body
    pub fn title(&self) -> &'static str {
        match self {
            Self::InvalidFilter(_) => "invalid filter",
            Self::NoAvailableServers => "no available servers",
            Self::RemoteError { .. } => "upstream error",
            Self::MalformedUpstreamResponse { .. } => "malformed upstream response",
            Self::IssuanceFailed(_) => "token issuance failed",
            Self::Canceled => "request canceled",
            Self::NoUserAgent => "missing user agent",
            Self::Transport(_) => "upstream unreachable",
            Self::InvalidBaseUrl(_) => "invalid base url",
        }
    }

    /// Returns true if the caller may retry later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NoAvailableServers
                | Self::MalformedUpstreamResponse { .. }
                | Self::Canceled
                | Self::Transport(_)
        )
    }
}
