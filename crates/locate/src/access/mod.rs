//! Admission control for the monitoring routes.
//!
//! Token verification and per-identity rate limiting, composed as axum
//! interceptors.

mod limiter;
mod middleware;

pub use limiter::{RateLimiter, prune_worker};
pub use middleware::{MonitoringIdentity, limit_by_identity, require_monitoring_token};
