//! The `/websocket` endpoint browsers connect to.
//!
//! Each connection owns one registry slot, keyed by the peer address, for
//! as long as the socket is open.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;

use super::RELOAD_MESSAGE;
use super::registry::{NotificationRegistry, Slot, SlotSignal};
use crate::state::AppState;

/// Upgrade and hand the socket to [`handle_socket`].
pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let registry = Arc::clone(&state.registry);
    ws.on_upgrade(move |socket| handle_socket(socket, peer.to_string(), registry))
}

/// Own a registry slot for the lifetime of the socket.
async fn handle_socket(mut socket: WebSocket, client: String, registry: Arc<NotificationRegistry>) {
    let slot = match registry.register(client.as_str()) {
        Ok(slot) => slot,
        Err(err) => {
            tracing::warn!(client = %client, error = %err, "Live reload connection refused");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };
    tracing::debug!(client = %client, "Live reload client connected");

    let reason = relay(&mut socket, &slot).await;

    registry.close(&client);
    tracing::debug!(client = %client, reason, "Live reload client disconnected");
}

/// Forward slot signals to the socket until either side goes away.
async fn relay(socket: &mut WebSocket, slot: &Slot) -> &'static str {
    loop {
        tokio::select! {
            signal = slot.recv() => match signal {
                SlotSignal::Reload => {
                    let frame = Message::Text(Utf8Bytes::from_static(RELOAD_MESSAGE));
                    if socket.send(frame).await.is_err() {
                        return "send failed";
                    }
                }
                SlotSignal::Closed => {
                    let _ = socket.send(Message::Close(None)).await;
                    return "server closed";
                }
            },
            // Client frames carry nothing; only the end of the stream matters.
            frame = socket.recv() => match frame {
                Some(Ok(Message::Close(_))) | None => return "client closed",
                Some(Ok(_)) => {}
                Some(Err(_)) => return "receive failed",
            },
        }
    }
}
