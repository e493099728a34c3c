//! # Heartbeat agent
//!
//! Runs on a platform server and keeps it registered as live with the locate
//! service: one WebSocket to `{url}/{hostname}`, one message every period.
//! The service answers each message with a pong.
//!
//! ## Usage
//! ```bash
//! heartbeat --url wss://locate.example.org/v2/platform/heartbeat --hostname mlab1-lga03
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use locate_api::constants::DEFAULT_HEARTBEAT_PERIOD_SECS;

/// Locate heartbeat agent
#[derive(Parser, Debug)]
#[command(name = "heartbeat")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Heartbeat endpoint; the hostname is appended as the last path segment
    #[arg(long, env = "LOCATE_HEARTBEAT_URL", default_value = "ws://localhost:8080/v2/platform/heartbeat")]
    url: String,

    /// Machine identity reported to the locate service
    #[arg(long, env = "HOSTNAME")]
    hostname: String,

    /// Seconds between heartbeat messages
    #[arg(long, default_value_t = DEFAULT_HEARTBEAT_PERIOD_SECS)]
    period: u64,

    /// Upper bound for the reconnect delay in seconds
    #[arg(long, default_value = "60")]
    max_backoff: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false")]
    json_logs: bool,
}

/// Message sent every period
#[derive(Debug, Serialize)]
struct Beat<'a> {
    hostname: &'a str,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct AgentConfig {
    endpoint: String,
    hostname: String,
    period: Duration,
    max_backoff: Duration,
}

/// How a connection ended
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    /// Local shutdown requested
    Shutdown,
    /// The service closed the connection
    Closed,
}

/// Capped exponential reconnect delay
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level, args.json_logs)?;

    let config = AgentConfig {
        endpoint: format!("{}/{}", args.url.trim_end_matches('/'), args.hostname),
        hostname: args.hostname.clone(),
        period: Duration::from_secs(args.period.max(1)),
        max_backoff: Duration::from_secs(args.max_backoff.max(1)),
    };
    info!(endpoint = %config.endpoint, period = ?config.period, "Starting heartbeat agent");

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(());
        }
    });

    run(&config, shutdown_rx).await;

    info!("Heartbeat agent stopped");
    Ok(())
}

/// Keep a session open until shutdown, reconnecting after failures
async fn run(config: &AgentConfig, mut shutdown: broadcast::Receiver<()>) {
    let mut backoff = Backoff::new(Duration::from_secs(1), config.max_backoff);

    loop {
        let started = Instant::now();
        match session(config, &mut shutdown).await {
            Ok(SessionEnd::Shutdown) => return,
            Ok(SessionEnd::Closed) => info!("Heartbeat connection closed by service"),
            Err(e) => tracing::warn!(error = %e, "Heartbeat connection failed"),
        }

        // A connection that held for a few periods counts as healthy.
        if started.elapsed() > config.period * 3 {
            backoff.reset();
        }
        let delay = backoff.next_delay();
        info!(delay = ?delay, "Reconnecting");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.recv() => return,
        }
    }
}

/// One connection: send a beat every period, log pongs, stop on close or shutdown
async fn session(config: &AgentConfig, shutdown: &mut broadcast::Receiver<()>) -> Result<SessionEnd> {
    let (socket, _) = tokio_tungstenite::connect_async(config.endpoint.as_str())
        .await
        .context("Failed to connect")?;
    let (mut tx, mut rx) = socket.split();
    info!(hostname = %config.hostname, "Heartbeat connection established");

    let mut ticker = tokio::time::interval(config.period);
    let mut sent_at: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let beat = Beat {
                    hostname: &config.hostname,
                    timestamp: Utc::now(),
                };
                let body = serde_json::to_string(&beat).context("Failed to encode heartbeat")?;
                tx.send(Message::Text(body.into())).await.context("Failed to send heartbeat")?;
                sent_at = Some(Instant::now());
            }
            message = rx.next() => match message {
                Some(Ok(Message::Pong(_))) => {
                    let rtt = sent_at.take().map(|at| at.elapsed());
                    tracing::debug!(rtt = ?rtt, "Pong received");
                }
                Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Closed),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e).context("Heartbeat read failed"),
            },
            _ = shutdown.recv() => {
                let _ = tx.send(Message::Close(None)).await;
                return Ok(SessionEnd::Shutdown);
            }
        }
    }
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
            .with(fmt::layer().with_target(true))
            .init();
    }

    Ok(())
}
