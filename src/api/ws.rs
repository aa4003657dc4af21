// WebSocket handler streaming outbound chat actions to the bridge.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};

use super::{AppState, BridgeAuth};
use crate::metrics;

/// WebSocket upgrade handler for the chat bridge.
pub async fn ws_bridge(
    ws: WebSocketUpgrade,
    _auth: BridgeAuth,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(mut socket: WebSocket, state: AppState) {
    let mut rx = state.chat.subscribe();
    metrics::CONNECTED_BRIDGES.inc();
    tracing::info!(bridges = state.chat.bridge_count(), "Chat bridge connected");

    // Forward every chat action until the bridge disconnects.
    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(action) => {
                        if socket.send(Message::Text(action.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Chat bridge lagged, dropped {n} actions");
                    }
                }
            }
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    metrics::CONNECTED_BRIDGES.dec();
    tracing::info!("Chat bridge disconnected");
}
