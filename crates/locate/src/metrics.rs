//! Runtime counters exported on `/metrics`.

use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Service-wide counters
#[derive(Default)]
pub struct Metrics {
    /// Queries answered with at least one target
    pub queries_served: AtomicU64,
    /// Queries that ended in an error reply
    pub queries_failed: AtomicU64,
    /// Monitoring requests rejected for a missing or invalid token
    pub unauthorized: AtomicU64,
    /// Monitoring requests rejected by the rate limiter
    pub rate_limited: AtomicU64,
    /// Targets dropped because token issuance failed
    pub issuance_failures: AtomicU64,
    /// Currently open heartbeat connections
    pub heartbeat_connections: AtomicI64,
    /// Heartbeat sessions closed by read deadline expiry
    pub heartbeat_timeouts: AtomicU64,
}

/// Point-in-time copy of [`Metrics`]
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub queries_served: u64,
    pub queries_failed: u64,
    pub unauthorized: u64,
    pub rate_limited: u64,
    pub issuance_failures: u64,
    pub heartbeat_connections: i64,
    pub heartbeat_timeouts: u64,
}

impl Metrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queries_served: self.queries_served.load(Ordering::Relaxed),
            queries_failed: self.queries_failed.load(Ordering::Relaxed),
            unauthorized: self.unauthorized.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            issuance_failures: self.issuance_failures.load(Ordering::Relaxed),
            heartbeat_connections: self.heartbeat_connections.load(Ordering::Relaxed),
            heartbeat_timeouts: self.heartbeat_timeouts.load(Ordering::Relaxed),
        }
    }
}
