//! Heartbeat sessions and the liveness predicate.
//!
//! One read loop per connection. The loop waits for the next message or the
//! session's read deadline; every message pushes the deadline forward and is
//! answered with a pong. A read error, a close frame, or an expired deadline
//! ends the session and the machine stops being live.

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::store::HeartbeatStore;
use crate::metrics::Metrics;

/// Heartbeat timing configuration
#[derive(Clone, Debug)]
pub struct HeartbeatConfig {
    /// Silence after which a session is dead
    pub read_timeout: Duration,
    /// Upper bound for writing a pong (and the store update)
    pub write_deadline: Duration,
}

/// Server-side state of one heartbeat connection
pub struct Session {
    id: u64,
    machine: String,
    /// Read deadline as nanoseconds past the manager epoch. Only grows.
    deadline: AtomicU64,
    closed: AtomicBool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Timeout,
    PeerClosed,
    ReadError,
}

/// Owns all heartbeat sessions, keyed by machine.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    epoch: Instant,
    next_id: AtomicU64,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    store: Option<Arc<dyn HeartbeatStore>>,
    metrics: Arc<Metrics>,
}

impl HeartbeatManager {
    pub fn new(
        config: HeartbeatConfig,
        store: Option<Arc<dyn HeartbeatStore>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            epoch: Instant::now(),
            next_id: AtomicU64::new(1),
            sessions: RwLock::new(HashMap::new()),
            store,
            metrics,
        }
    }

    /// Register a freshly upgraded connection for `machine`.
    ///
    /// A newer session for the same machine replaces the older one.
    pub async fn open(&self, machine: &str) -> Arc<Session> {
        let session = Arc::new(Session {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            machine: machine.to_string(),
            deadline: AtomicU64::new(self.offset(Instant::now() + self.config.read_timeout)),
            closed: AtomicBool::new(false),
        });

        let previous = self
            .sessions
            .write()
            .await
            .insert(machine.to_string(), session.clone());

        if previous.is_some() {
            tracing::debug!(machine = machine, "Heartbeat session replaced by reconnect");
        }

        self.metrics.heartbeat_connections.fetch_add(1, Ordering::Relaxed);
        tracing::info!(machine = machine, session = session.id, "Heartbeat session opened");

        session
    }

    /// Whether `machine` has an open session whose deadline has not passed
    pub async fn is_live(&self, machine: &str) -> bool {
        let now = Instant::now();
        let sessions = self.sessions.read().await;
        sessions
            .get(machine)
            .is_some_and(|session| self.session_live(session, now))
    }

    /// Machines that are live right now, sorted
    pub async fn live_machines(&self) -> Vec<String> {
        let now = Instant::now();
        let sessions = self.sessions.read().await;
        let mut live: Vec<String> = sessions
            .values()
            .filter(|session| self.session_live(session, now))
            .map(|session| session.machine.clone())
            .collect();
        live.sort();
        live
    }

    /// Read loop for one session. Returns once the session is closed.
    pub async fn serve<R, W, E>(&self, session: Arc<Session>, mut rx: R, mut tx: W)
    where
        R: Stream<Item = Result<Message, E>> + Unpin,
        W: Sink<Message> + Unpin,
        W::Error: Display,
        E: Display,
    {
        let reason = loop {
            let deadline = self.deadline(&session);

            let message = match tokio::time::timeout_at(deadline, rx.next()).await {
                Err(_) => break CloseReason::Timeout,
                Ok(None) => break CloseReason::PeerClosed,
                Ok(Some(Err(e))) => {
                    tracing::warn!(machine = %session.machine, error = %e, "Heartbeat read error");
                    break CloseReason::ReadError;
                }
                Ok(Some(Ok(message))) => message,
            };

            // A message seen at the deadline instant is already too late.
            let now = Instant::now();
            if now >= deadline {
                break CloseReason::Timeout;
            }
            if let Message::Close(_) = message {
                break CloseReason::PeerClosed;
            }

            self.extend(&session, now + self.config.read_timeout);

            let pong = tx.send(Message::Pong(Default::default()));
            match tokio::time::timeout(self.config.write_deadline, pong).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::debug!(machine = %session.machine, error = %e, "Failed to send pong")
                }
                Err(_) => tracing::debug!(machine = %session.machine, "Pong send deadline exceeded"),
            }

            if let (Some(store), Some(payload)) = (&self.store, payload(&message)) {
                let record = store.record(&session.machine, &payload, self.config.read_timeout);
                match tokio::time::timeout(self.config.write_deadline, record).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(machine = %session.machine, error = %e, "Heartbeat store update failed")
                    }
                    Err(_) => tracing::warn!(machine = %session.machine, "Heartbeat store update timed out"),
                }
            }
        };

        self.close(&session, reason).await;
    }

    async fn close(&self, session: &Session, reason: CloseReason) {
        session.closed.store(true, Ordering::Release);

        let owned = {
            let mut sessions = self.sessions.write().await;
            let owned = sessions
                .get(&session.machine)
                .is_some_and(|current| current.id == session.id);
            if owned {
                sessions.remove(&session.machine);
            }
            owned
        };

        self.metrics.heartbeat_connections.fetch_sub(1, Ordering::Relaxed);

        match reason {
            CloseReason::Timeout => {
                self.metrics.heartbeat_timeouts.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(machine = %session.machine, session = session.id, "Heartbeat read deadline expired");
            }
            CloseReason::PeerClosed | CloseReason::ReadError => {
                tracing::info!(machine = %session.machine, session = session.id, reason = ?reason, "Heartbeat session closed");
            }
        }

        if let (true, Some(store)) = (owned, &self.store) {
            if let Err(e) = store.remove(&session.machine).await {
                tracing::warn!(machine = %session.machine, error = %e, "Failed to clear stored heartbeat");
            }
        }
    }

    fn session_live(&self, session: &Session, now: Instant) -> bool {
        !session.closed.load(Ordering::Acquire) && now < self.deadline(session)
    }

    fn deadline(&self, session: &Session) -> Instant {
        self.epoch + Duration::from_nanos(session.deadline.load(Ordering::Acquire))
    }

    fn extend(&self, session: &Session, until: Instant) {
        session.deadline.fetch_max(self.offset(until), Ordering::AcqRel);
    }

    fn offset(&self, instant: Instant) -> u64 {
        instant.saturating_duration_since(self.epoch).as_nanos() as u64
    }
}

fn payload(message: &Message) -> Option<String> {
    match message {
        Message::Text(text) => Some(text.as_str().to_string()),
        Message::Binary(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;

    type Inbound = mpsc::UnboundedSender<Result<Message, axum::Error>>;
    type Outbound = mpsc::UnboundedReceiver<Message>;

    fn manager(read_timeout_secs: u64) -> Arc<HeartbeatManager> {
        let config = HeartbeatConfig {
            read_timeout: Duration::from_secs(read_timeout_secs),
            write_deadline: Duration::from_secs(1),
        };
        Arc::new(HeartbeatManager::new(config, None, Arc::new(Metrics::default())))
    }

    async fn connect(
        manager: &Arc<HeartbeatManager>,
        machine: &str,
    ) -> (Inbound, Outbound, tokio::task::JoinHandle<()>) {
        let session = manager.open(machine).await;
        let (in_tx, in_rx) = mpsc::unbounded();
        let (out_tx, out_rx) = mpsc::unbounded();

        let m = manager.clone();
        let task = tokio::spawn(async move { m.serve(session, in_rx, out_tx).await });
        (in_tx, out_rx, task)
    }

    fn text(body: &str) -> Result<Message, axum::Error> {
        Ok(Message::Text(body.into()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_closes_session() {
        let manager = manager(30);
        let (in_tx, mut out_rx, task) = connect(&manager, "mlab1-lga03").await;

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_secs(5)).await;
            in_tx.unbounded_send(text("alive")).unwrap();
            assert!(matches!(out_rx.next().await, Some(Message::Pong(_))));
            assert!(manager.is_live("mlab1-lga03").await);
        }

        tokio::time::sleep(Duration::from_secs(40)).await;
        assert!(!manager.is_live("mlab1-lga03").await);

        task.await.unwrap();
        assert!(manager.live_machines().await.is_empty());
        assert_eq!(manager.metrics.heartbeat_timeouts.load(Ordering::Relaxed), 1);
        assert_eq!(manager.metrics.heartbeat_connections.load(Ordering::Relaxed), 0);
        drop(in_tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_ends_exactly_at_deadline() {
        let manager = manager(30);
        let session = manager.open("mlab1-lga03").await;

        tokio::time::advance(Duration::from_millis(29_999)).await;
        assert!(manager.is_live("mlab1-lga03").await);
        assert!(manager.is_live("mlab1-lga03").await);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!manager.is_live("mlab1-lga03").await);
        drop(session);
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_at_deadline_is_timeout() {
        let manager = manager(30);
        let (in_tx, mut out_rx, task) = connect(&manager, "mlab1-lga03").await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        let _ = in_tx.unbounded_send(text("late"));

        task.await.unwrap();
        assert!(out_rx.next().await.is_none(), "no pong for a late message");
        assert!(!manager.is_live("mlab1-lga03").await);
        assert_eq!(manager.metrics.heartbeat_timeouts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_never_shortens() {
        let manager = manager(30);
        let session = manager.open("mlab1-lga03").await;
        let original = manager.deadline(&session);

        manager.extend(&session, original - Duration::from_secs(10));
        assert_eq!(manager.deadline(&session), original);

        manager.extend(&session, original + Duration::from_secs(10));
        assert_eq!(manager.deadline(&session), original + Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_error_closes_session() {
        let manager = manager(30);
        let (in_tx, _out_rx, task) = connect(&manager, "mlab1-lga03").await;

        in_tx
            .unbounded_send(Err(axum::Error::new(std::io::Error::other("connection reset"))))
            .unwrap();
        task.await.unwrap();

        assert!(!manager.is_live("mlab1-lga03").await);
        assert_eq!(manager.metrics.heartbeat_timeouts.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_frame_ends_session() {
        let manager = manager(30);
        let (in_tx, mut out_rx, task) = connect(&manager, "mlab1-lga03").await;

        in_tx.unbounded_send(Ok(Message::Close(None))).unwrap();
        task.await.unwrap();

        assert!(out_rx.next().await.is_none());
        assert!(!manager.is_live("mlab1-lga03").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_keeps_newer_session() {
        let manager = manager(30);
        let (old_tx, _old_rx, old_task) = connect(&manager, "mlab1-lga03").await;
        let (new_tx, _new_rx, _new_task) = connect(&manager, "mlab1-lga03").await;

        // Peer drops the old connection after reconnecting.
        drop(old_tx);
        old_task.await.unwrap();

        assert!(manager.is_live("mlab1-lga03").await);
        assert_eq!(manager.live_machines().await, vec!["mlab1-lga03".to_string()]);
        drop(new_tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sessions_are_independent() {
        let manager = manager(30);
        let (a_tx, mut a_rx, _a) = connect(&manager, "mlab1-lga03").await;
        let (_b_tx, _b_rx, b_task) = connect(&manager, "mlab2-lga03").await;

        tokio::time::sleep(Duration::from_secs(20)).await;
        a_tx.unbounded_send(text("alive")).unwrap();
        assert!(a_rx.next().await.is_some());

        tokio::time::sleep(Duration::from_secs(15)).await;
        b_task.await.unwrap();

        assert!(manager.is_live("mlab1-lga03").await);
        assert!(!manager.is_live("mlab2-lga03").await);
    }
}
