//! External persistence for heartbeat messages.

use anyhow::{Context, Result};
use async_trait::async_trait;
use locate_api::constants::redis_keys::HEARTBEAT_PREFIX;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;

/// Sink for the last heartbeat message of each machine.
///
/// Failures never affect liveness; the manager only logs them.
#[async_trait]
pub trait HeartbeatStore: Send + Sync {
    /// Save the latest message for `machine`, expiring after `ttl`
    async fn record(&self, machine: &str, message: &str, ttl: Duration) -> Result<()>;

    /// Forget `machine` once its session closes
    async fn remove(&self, machine: &str) -> Result<()>;

    /// Whether the backing store is reachable
    async fn ping(&self) -> bool;
}

/// Redis-backed heartbeat store
pub struct RedisStore {
    /// Redis connection manager (auto-reconnecting)
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        Ok(Self { conn })
    }
}

#[async_trait]
impl HeartbeatStore for RedisStore {
    async fn record(&self, machine: &str, message: &str, ttl: Duration) -> Result<()> {
        let key = format!("{}{}", HEARTBEAT_PREFIX, machine);
        let mut conn = self.conn.clone();

        conn.set_ex::<_, _, ()>(&key, message, ttl.as_secs().max(1))
            .await
            .context("Failed to save heartbeat")?;

        Ok(())
    }

    async fn remove(&self, machine: &str) -> Result<()> {
        let key = format!("{}{}", HEARTBEAT_PREFIX, machine);
        let mut conn = self.conn.clone();

        conn.del::<_, ()>(&key)
            .await
            .context("Failed to delete heartbeat")?;

        Ok(())
    }

    async fn ping(&self) -> bool {
        let mut conn = self.conn.clone();
        let result: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
        result.is_ok()
    }
}
