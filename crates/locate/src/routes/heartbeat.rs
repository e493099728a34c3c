//! Heartbeat WebSocket endpoint for platform servers.

use axum::{
    extract::{Path, State, WebSocketUpgrade, ws::WebSocket},
    response::Response,
};
use futures::StreamExt;

use crate::state::AppState;

/// Upgrade `GET /v2/platform/heartbeat/{machine}` and run the session.
///
/// The machine identity comes from the path. A failed upgrade is logged and
/// creates no session.
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(machine): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let failed_machine = machine.clone();
    ws.on_failed_upgrade(move |e| {
        tracing::warn!(machine = %failed_machine, error = %e, "Heartbeat upgrade failed");
    })
    .on_upgrade(move |socket| run_session(state, machine, socket))
}

async fn run_session(state: AppState, machine: String, socket: WebSocket) {
    let (tx, rx) = socket.split();
    let session = state.heartbeats.open(&machine).await;
    state.heartbeats.serve(session, rx, tx).await;
}
