//! Token bucket admission control keyed by verified identity.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

struct Bucket {
    tokens: f64,
    updated: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant, rate_per_sec: f64, capacity: f64) {
        let elapsed = now.saturating_duration_since(self.updated).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate_per_sec).min(capacity);
        self.updated = now;
    }
}

/// Per-identity token buckets.
///
/// Each identity has its own mutex, so admissions for different identities do
/// not contend. The map lock is taken for writing only when a new identity
/// shows up or during pruning.
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    buckets: RwLock<HashMap<String, Arc<Mutex<Bucket>>>>,
}

impl RateLimiter {
    /// `burst` requests may arrive at once; the budget then refills at
    /// `max_requests_per_minute`.
    pub fn new(burst: u32, max_requests_per_minute: u32) -> Self {
        Self {
            capacity: f64::from(burst.max(1)),
            refill_per_sec: f64::from(max_requests_per_minute) / 60.0,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Spend one token for `identity`. Returns false when the budget is exhausted.
    pub async fn admit(&self, identity: &str) -> bool {
        let bucket = self.bucket(identity).await;
        let mut bucket = bucket.lock().await;

        bucket.refill(Instant::now(), self.refill_per_sec, self.capacity);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            tracing::debug!(identity = identity, "Rate limit budget exhausted");
            false
        }
    }

    /// Current budget for `identity`, or None if it has never been charged
    #[cfg(test)]
    pub async fn remaining(&self, identity: &str) -> Option<f64> {
        let bucket = self.buckets.read().await.get(identity).cloned()?;
        let bucket = bucket.lock().await;
        Some(bucket.tokens)
    }

    /// Drop buckets untouched for `idle`. Returns how many were removed.
    pub async fn prune_idle(&self, idle: Duration) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.write().await;
        let before = buckets.len();

        buckets.retain(|_, bucket| match bucket.try_lock() {
            Ok(b) => now.saturating_duration_since(b.updated) < idle,
            // In use right now, so not idle.
            Err(_) => true,
        });

        before - buckets.len()
    }

    async fn bucket(&self, identity: &str) -> Arc<Mutex<Bucket>> {
        if let Some(bucket) = self.buckets.read().await.get(identity) {
            return bucket.clone();
        }

        let mut buckets = self.buckets.write().await;
        buckets
            .entry(identity.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Bucket {
                    tokens: self.capacity,
                    updated: Instant::now(),
                }))
            })
            .clone()
    }
}

/// Background worker that prunes idle buckets
pub async fn prune_worker(
    limiter: Arc<RateLimiter>,
    idle: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    tracing::info!(idle = ?idle, "Rate limit pruner started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(idle) => {
                let removed = limiter.prune_idle(idle).await;
                if removed > 0 {
                    tracing::debug!(removed = removed, "Pruned idle rate limit buckets");
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Rate limit pruner shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhausts_and_refills() {
        let limiter = RateLimiter::new(2, 60);

        assert!(limiter.admit("prober").await);
        assert!(limiter.admit("prober").await);
        assert!(!limiter.admit("prober").await);

        // 60 per minute refills one token per second.
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.admit("prober").await);
        assert!(!limiter.admit("prober").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identities_have_independent_budgets() {
        let limiter = RateLimiter::new(1, 60);

        assert!(limiter.admit("a").await);
        assert!(!limiter.admit("a").await);
        assert!(limiter.admit("b").await);
        assert_eq!(limiter.remaining("c").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_caps_at_burst() {
        let limiter = RateLimiter::new(3, 600);
        assert!(limiter.admit("a").await);

        tokio::time::advance(Duration::from_secs(3600)).await;
        for _ in 0..3 {
            assert!(limiter.admit("a").await);
        }
        assert!(!limiter.admit("a").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_idle() {
        let limiter = RateLimiter::new(5, 60);
        limiter.admit("old").await;

        tokio::time::advance(Duration::from_secs(120)).await;
        limiter.admit("fresh").await;

        assert_eq!(limiter.prune_idle(Duration::from_secs(60)).await, 1);
        assert_eq!(limiter.remaining("old").await, None);
        assert!(limiter.remaining("fresh").await.is_some());
    }
}
