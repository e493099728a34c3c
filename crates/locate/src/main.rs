//! # Locate - nearest-server resolution service
//!
//! Answers "which measurement servers should I use?" with live servers only,
//! each paired with a short-lived access token.
//!
//! ## Architecture
//! ```text
//! Client ──► /v2/nearest ──► QueryResolver ──► RankingBackend
//!                                 │
//!                                 ├──► HeartbeatManager ◄── platform heartbeats (ws)
//!                                 └──► TokenIssuer
//!
//! Monitoring ──► verify token ──► rate limit ──► QueryResolver
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod access;
mod config;
mod heartbeat;
mod metrics;
mod resolver;
mod routes;
mod state;
mod token;

use access::prune_worker;
use config::AppConfig;
use state::AppState;

/// Locate - nearest-server resolution service
#[derive(Parser, Debug)]
#[command(name = "locate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/locate.toml")]
    config: String,

    /// Listen address (overrides config)
    #[arg(short, long, env = "LISTEN_ADDR")]
    listen: Option<String>,

    /// Redis URL for heartbeat state (overrides config)
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Access token signer key file (overrides config)
    #[arg(long, env = "LOCATE_SIGNER_KEY")]
    signer_key: Option<String>,

    /// Trusted monitoring public keys, comma separated (overrides config)
    #[arg(long, env = "MONITORING_VERIFY_KEYS", value_delimiter = ',')]
    monitoring_keys: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    init_logging(&args.log_level, args.json_logs)?;

    info!("Starting locate v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load(&args.config, &args)?;
    info!(instance = %config.instance_id, "Configuration loaded from {}", args.config);

    // Create shutdown broadcast channel
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    let listen_addr = config.listen_addr.clone();
    let idle_prune = Duration::from_secs(config.rate_limit.idle_prune_secs.max(1));
    let redis_enabled = config.redis_url.is_some();

    let state = AppState::new(config).await?;
    if redis_enabled {
        info!("Redis connected for heartbeat state");
    }

    // Spawn rate limit pruner
    let limiter = state.limiter.clone();
    let prune_shutdown = shutdown_tx.subscribe();
    tokio::spawn(async move {
        prune_worker(limiter, idle_prune, prune_shutdown).await;
    });

    let app = routes::create_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("Failed to bind {listen_addr}"))?;
    info!("Locate listening on {}", listen_addr);

    // Handle graceful shutdown
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    info!(
        live_machines = state.heartbeats.live_machines().await.len(),
        "Locate shutdown complete"
    );
    Ok(())
}

/// Initialize structured logging with tracing
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }

    Ok(())
}
