//! Platform server liveness via persistent heartbeat connections.

mod manager;
mod store;

pub use manager::{HeartbeatConfig, HeartbeatManager};
pub use store::{HeartbeatStore, RedisStore};
