// =============================================================================
// WebSocket Handler — snapshot subscription feed
// =============================================================================
//
// Clients connect to `/api/v1/ws` and receive:
//   1. An immediate full snapshot on connect.
//   2. A fresh snapshot on every snapshot tick whose state_version changed
//      since the last push.
//
// Abuse control:
//   - At most 5 concurrent connections per client IP.
//   - At most 30 inbound client messages per minute; excess disconnects.
//   - Outbound documents above 1 MB are dropped with a warning, never sent.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use crate::app_state::AppState;

/// Concurrent connections allowed per client IP.
const MAX_CONNECTIONS_PER_IP: u32 = 5;
/// Inbound client messages allowed per rolling minute.
const MAX_CLIENT_MESSAGES_PER_MIN: u32 = 30;
/// Outbound message size cap in bytes.
const MAX_MESSAGE_BYTES: usize = 1_000_000;

// =============================================================================
// Upgrade handler
// =============================================================================

/// Axum handler for the WebSocket upgrade. Enforces the per-IP connection
/// cap before upgrading.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let ip = addr.ip();

    {
        let mut connections = state.ws_connections.write();
        let count = connections.entry(ip).or_insert(0);
        if *count >= MAX_CONNECTIONS_PER_IP {
            warn!(%ip, "WebSocket connection rejected: per-IP limit reached");
            return (
                axum::http::StatusCode::TOO_MANY_REQUESTS,
                "connection limit reached",
            )
                .into_response();
        }
        *count += 1;
    }

    info!(%ip, "WebSocket connection accepted");
    ws.on_upgrade(move |socket| handle_connection(socket, state, ip))
        .into_response()
}

// =============================================================================
// Connection lifecycle
// =============================================================================

async fn handle_connection(socket: WebSocket, state: Arc<AppState>, ip: IpAddr) {
    let (mut sender, mut receiver) = socket.split();

    // First subscribe: immediate full snapshot.
    if send_snapshot(&mut sender, &state).await.is_err() {
        cleanup(&state, ip);
        return;
    }
    let mut last_sent_version = state.current_state_version();

    let push_ms = state.config.read().ui.refresh_ms.max(100);
    let mut push_interval = interval(Duration::from_millis(push_ms));

    // Inbound rate limiting over a rolling minute.
    let mut window_start = std::time::Instant::now();
    let mut window_count: u32 = 0;

    loop {
        tokio::select! {
            // ── Push: new snapshot whenever the version moved ───────────
            _ = push_interval.tick() => {
                if state.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let current = state.current_state_version();
                if current != last_sent_version {
                    match send_snapshot(&mut sender, &state).await {
                        Ok(()) => last_sent_version = current,
                        Err(e) => {
                            debug!(error = %e, "WebSocket send failed; disconnecting");
                            break;
                        }
                    }
                }
            }

            // ── Receive: heartbeats, pings, close ───────────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(_))) | Some(Ok(Message::Binary(_))) => {
                        if window_start.elapsed() >= std::time::Duration::from_secs(60) {
                            window_start = std::time::Instant::now();
                            window_count = 0;
                        }
                        window_count += 1;
                        if window_count > MAX_CLIENT_MESSAGES_PER_MIN {
                            warn!(%ip, "client message rate limit exceeded; disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        info!(%ip, "WebSocket close frame received");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "WebSocket receive error; disconnecting");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    cleanup(&state, ip);
}

// =============================================================================
// Helpers
// =============================================================================

/// Serialise and send the current snapshot. Documents above the size cap
/// are skipped (not an error); serialisation failures are logged but do not
/// disconnect.
async fn send_snapshot<S>(sender: &mut S, state: &Arc<AppState>) -> Result<(), axum::Error>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    let snapshot = state.build_snapshot();
    match serde_json::to_string(&snapshot) {
        Ok(json) => {
            if json.len() > MAX_MESSAGE_BYTES {
                warn!(bytes = json.len(), "snapshot exceeds message cap; dropped");
                return Ok(());
            }
            sender.send(Message::Text(json)).await?;
            debug!(version = snapshot.state_version, "snapshot pushed");
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "failed to serialise snapshot");
            Ok(())
        }
    }
}

fn cleanup(state: &Arc<AppState>, ip: IpAddr) {
    let mut connections = state.ws_connections.write();
    if let Some(count) = connections.get_mut(&ip) {
        *count = count.saturating_sub(1);
        if *count == 0 {
            connections.remove(&ip);
        }
    }
    info!(%ip, "WebSocket connection closed");
}
