//! Dashboard event stream.
//!
//! Read-only fan-out of the event bus: every lifecycle event is forwarded
//! as `{event, data}` JSON text frames.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;

use crate::server::ApiState;

pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(|socket| websocket_connection(socket, state))
}

async fn websocket_connection(mut socket: WebSocket, state: ApiState) {
    let mut events = state.bus.subscribe();
    tracing::info!("Dashboard WebSocket connected");

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let text = event.to_wire().to_string();
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    tracing::info!(
        dropped = events.dropped(),
        "Dashboard WebSocket disconnected"
    );
}
