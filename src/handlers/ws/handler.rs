//! Realtime WebSocket handler
//!
//! One task writes frames to the socket, fed by an mpsc channel. A second
//! task drains the connection's fanout queue into that channel. The
//! connection loop reads client frames, answers them through
//! [`handle_client_message`] and closes stale connections.

use axum::{
    Extension,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::{
    select,
    time::{Duration, Instant},
};
use tracing::{debug, error, info, warn};

use crate::auth::{Auth, match_api_secret_id};
use crate::core::fanout::ConnectionId;
use crate::middleware::ClientIp;
use crate::state::AppState;

use super::messages::{ClientMessage, MessageRoute, ServerMessage};
use super::protocol::handle_client_message;

const CHANNEL_BUFFER_SIZE: usize = 256;

/// Maximum WebSocket frame size (64 KB)
const MAX_WS_FRAME_SIZE: usize = 64 * 1024;

/// Maximum WebSocket message size (64 KB)
const MAX_WS_MESSAGE_SIZE: usize = 64 * 1024;

/// How often the idle check runs
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

const BASE_IDLE_SECS: u64 = 300;
const IDLE_JITTER_SECS: u64 = 30;

/// How long the writer gets to flush queued frames after the loop ends
const SENDER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Idle limit of 300s spread by up to ±30s per connection, so connections
/// opened together do not all time out together.
fn idle_timeout(connection_id: ConnectionId) -> Duration {
    let offset = (connection_id.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 32) % (IDLE_JITTER_SECS * 2);
    Duration::from_secs(BASE_IDLE_SECS - IDLE_JITTER_SECS + offset)
}

/// Handler for GET /ws
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<Auth>,
    client_ip: Option<Extension<ClientIp>>,
) -> Response {
    let client_ip = client_ip.map(|Extension(ip)| ip);
    info!(auth_id = ?auth.id, pending = auth.is_pending(), "Realtime WebSocket upgrade requested");

    let failed_state = state.clone();
    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_failed_upgrade(move |e| {
            warn!(error = %e, "WebSocket upgrade failed");
            if let Some(ClientIp(ip)) = client_ip {
                failed_state.release_connection(ip);
            }
        })
        .on_upgrade(move |socket| handle_socket(socket, state, auth, client_ip))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, auth: Auth, client_ip: Option<ClientIp>) {
    let (connection_id, queue) = state.fanout.register();
    info!(connection_id, auth_id = ?auth.id, "Realtime WebSocket connection established");

    let (mut sender, mut receiver) = socket.split();
    let (message_tx, mut message_rx) = mpsc::channel::<MessageRoute>(CHANNEL_BUFFER_SIZE);

    let mut sender_task = tokio::spawn(async move {
        while let Some(route) = message_rx.recv().await {
            let result = match route {
                MessageRoute::Outgoing(message) => match serde_json::to_string(&message) {
                    Ok(json) => sender.send(Message::Text(json.into())).await,
                    Err(e) => {
                        error!("Failed to serialize outgoing message: {}", e);
                        continue;
                    }
                },
                MessageRoute::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };

            if let Err(e) = result {
                debug!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
    });

    // Ends when the queue is closed or the writer goes away
    let forward_tx = message_tx.clone();
    let forward_task = tokio::spawn(async move {
        while let Some(change) = queue.recv().await {
            let frame = ServerMessage::from(&change);
            if forward_tx.send(MessageRoute::Outgoing(frame)).await.is_err() {
                break;
            }
        }
    });

    let mut auth = auth;
    let idle_limit = idle_timeout(connection_id);
    let mut last_activity = Instant::now();
    let shutdown = state.shutdown_token();

    loop {
        select! {
            _ = shutdown.cancelled() => {
                info!(connection_id, "Server shutting down, closing WebSocket");
                break;
            }
            msg_result = receiver.next() => {
                last_activity = Instant::now();
                match msg_result {
                    Some(Ok(msg)) => {
                        if !process_message(msg, connection_id, &mut auth, &message_tx, &state).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(connection_id, "WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        info!(connection_id, "WebSocket connection closed by client");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep(IDLE_CHECK_INTERVAL) => {
                if last_activity.elapsed() > idle_limit {
                    warn!(
                        connection_id,
                        "WebSocket connection idle for {}s, closing stale connection",
                        last_activity.elapsed().as_secs()
                    );
                    send(&message_tx, ServerMessage::error(
                        "idle_timeout",
                        "Connection closed due to inactivity",
                    )).await;
                    break;
                }
            }
        }
    }

    // Cleanup
    state.fanout.unregister(connection_id);
    forward_task.abort();
    let _ = message_tx.try_send(MessageRoute::Close);
    drop(message_tx);
    if tokio::time::timeout(SENDER_DRAIN_TIMEOUT, &mut sender_task)
        .await
        .is_err()
    {
        sender_task.abort();
    }
    if let Some(ClientIp(ip)) = client_ip {
        state.release_connection(ip);
    }

    info!(connection_id, "Realtime WebSocket connection terminated");
}

async fn send(tx: &mpsc::Sender<MessageRoute>, message: ServerMessage) -> bool {
    tx.send(MessageRoute::Outgoing(message)).await.is_ok()
}

/// Handle one client frame. Returns `false` when the connection should end.
async fn process_message(
    msg: Message,
    connection_id: ConnectionId,
    auth: &mut Auth,
    message_tx: &mpsc::Sender<MessageRoute>,
    state: &Arc<AppState>,
) -> bool {
    match msg {
        Message::Text(text) => {
            let incoming: ClientMessage = match serde_json::from_str(&text) {
                Ok(msg) => msg,
                Err(e) => {
                    debug!(connection_id, "Rejected client message: {}", e);
                    return send(
                        message_tx,
                        ServerMessage::error("invalid_message", format!("Invalid message format: {e}")),
                    )
                    .await;
                }
            };

            if let Err(e) = incoming.validate_size() {
                return send(message_tx, ServerMessage::error("message_too_large", e.to_string())).await;
            }

            if auth.is_pending() {
                return authenticate(incoming, connection_id, auth, message_tx, state).await;
            }

            let reply = handle_client_message(incoming, &state.store);
            if let Some(update) = &reply.interest {
                state.fanout.update_interest(connection_id, update);
                debug!(connection_id, ?update, "Subscriber interest updated");
            }
            for frame in reply.frames {
                if !send(message_tx, frame).await {
                    return false;
                }
            }
            true
        }
        Message::Binary(_) => {
            send(
                message_tx,
                ServerMessage::error("unsupported_frame", "Binary frames are not supported"),
            )
            .await
        }
        // Pong replies are handled by axum
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            info!(connection_id, "Client sent close frame");
            false
        }
    }
}

/// First-message authentication for connections that arrived without a token.
async fn authenticate(
    incoming: ClientMessage,
    connection_id: ConnectionId,
    auth: &mut Auth,
    message_tx: &mpsc::Sender<MessageRoute>,
    state: &Arc<AppState>,
) -> bool {
    let ClientMessage::Auth { token } = incoming else {
        warn!(connection_id, "Message before authentication, closing");
        send(
            message_tx,
            ServerMessage::error("unauthorized", "First message must be an auth message"),
        )
        .await;
        return false;
    };

    match match_api_secret_id(&token, &state.config.auth_api_secrets) {
        Some(id) => {
            *auth = Auth::new(id.to_string());
            info!(connection_id, auth_id = %id, "WebSocket authenticated");
            send(
                message_tx,
                ServerMessage::Authenticated {
                    id: Some(id.to_string()),
                },
            )
            .await
        }
        None => {
            warn!(connection_id, "WebSocket authentication failed");
            send(message_tx, ServerMessage::error("unauthorized", "Invalid token")).await;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_timeout_within_jitter() {
        for id in 1..500u64 {
            let timeout = idle_timeout(id).as_secs();
            assert!((BASE_IDLE_SECS - IDLE_JITTER_SECS..BASE_IDLE_SECS + IDLE_JITTER_SECS).contains(&timeout));
        }
        assert_ne!(idle_timeout(1), idle_timeout(2));
    }
}
