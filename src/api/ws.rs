//! WebSocket fan-out for C8 events (spec.md §4.8 "Per-WebSocket-client
//! subscription").

use super::state::AppState;
use crate::events::JobEvent;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize, Default)]
pub struct WsQuery {
    /// Comma-separated channel list, e.g. `?channels=scans,alerts`.
    pub channels: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let channels: HashSet<String> = query
        .channels
        .map(|c| c.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_default();

    ws.on_upgrade(move |socket| handle_socket(socket, state, channels))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, channels: HashSet<String>) {
    let mut events = state.events.subscribe();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // first tick fires immediately; consume it

    // One missed ping cycle drops the client (spec.md §4.8 "Heartbeat").
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "websocket subscriber lagged, dropping buffered events");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };

                if !channels.is_empty() && !channels.contains(event.channel()) {
                    continue;
                }

                if !send_event(&mut socket, &event).await {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if awaiting_pong {
                    debug!("websocket client missed a heartbeat cycle, dropping");
                    break;
                }
                if socket.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    Some(Ok(Message::Pong(_))) => {
                        awaiting_pong = false;
                    }
                    Some(Ok(_)) => {
                        awaiting_pong = false;
                    }
                }
            }
        }
    }
}

async fn send_event(socket: &mut WebSocket, event: &JobEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(payload) => socket.send(Message::Text(payload)).await.is_ok(),
        Err(_) => true,
    }
}
