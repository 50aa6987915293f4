//! The realtime WebSocket channel.
//!
//! Session lifecycle:
//!
//! 1. register with the [`RealtimeHub`](crate::application::RealtimeHub)
//!    (this wakes every stream controller);
//! 2. send the handshake built by the
//!    [`StateAggregator`](crate::application::StateAggregator), ending with
//!    `loop`;
//! 3. forward hub broadcasts and answer `ping` with `pong` until either side
//!    closes;
//! 4. unregister.
//!
//! Client messages with any other event type are ignored.  A client that
//! cannot take the handshake only loses its own session.

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use super::http::AppState;
use crate::domain::events::EVENT_PING;
use crate::domain::RealtimeEvent;

/// Reads a boolean query flag the way browsers send them.
fn parse_flag(raw: Option<&str>, default: bool) -> bool {
    match raw.map(|s| s.trim().to_ascii_lowercase()) {
        None => default,
        Some(value) => matches!(value.as_str(), "1" | "true" | "yes" | "on"),
    }
}

/// `GET /api/ws?stream=<bool>`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let wants_stream = parse_flag(query.get("stream").map(String::as_str), true);
    ws.on_upgrade(move |socket| handle_socket(socket, state, wants_stream))
}

async fn handle_socket(socket: WebSocket, state: AppState, wants_stream: bool) {
    let (mut sender, mut receiver) = socket.split();
    let (id, mut outbound) = state.hub.register(wants_stream);

    for event in state.aggregator.handshake_events().await {
        if sender.send(Message::Text(event.to_json())).await.is_err() {
            warn!("Can't send initial state to client {id}, dropping it");
            state.hub.unregister(id);
            return;
        }
    }

    loop {
        tokio::select! {
            queued = outbound.recv() => {
                let Some(event) = queued else {
                    // The hub dropped us (shutdown or dead-session sweep).
                    break;
                };
                if sender.send(Message::Text(event.to_json())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let Some(event) = RealtimeEvent::from_json(&text) else {
                            debug!("Ignoring malformed message from {id}");
                            continue;
                        };
                        if event.event_type == EVENT_PING {
                            let pong = Message::Text(RealtimeEvent::pong().to_json());
                            if sender.send(pong).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Socket error from {id}: {e}");
                        break;
                    }
                }
            }
        }
    }

    let _ = sender.close().await;
    state.hub.unregister(id);
    info!("Realtime session {id} closed");
}
