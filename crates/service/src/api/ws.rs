//! `GET /ws` — broadcast-only event stream. Clients never send commands over
//! this socket; any inbound frame is only used to tell a live client apart
//! from a dead one. A connection with neither an outbound event nor an
//! inbound frame for `ws_idle_timeout_seconds` is closed.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use cps_domain::event::JobEvent;
use tokio::sync::broadcast;

use super::state::AppState;

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut events = state.events.subscribe();
    let idle = std::time::Duration::from_secs(state.ws_idle_timeout_seconds.max(1));

    let hello = JobEvent::Connection {
        message: "connected".into(),
    };
    let Ok(text) = serde_json::to_string(&hello) else { return };
    if socket.send(Message::Text(text)).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let Ok(text) = serde_json::to_string(&event) else { continue };
                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    None | Some(Err(_)) => break,
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(_)) => {}
                }
            }
            _ = tokio::time::sleep(idle) => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
        }
    }
}
