// HTTP API routes for the chat bridge (inbound events, status, points).

pub mod ws;

use axum::{
    extract::{FromRequestParts, Json, Path, State},
    http::{request::Parts, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::chat::bridge::BridgeChat;
use crate::chat::{ChannelId, InboundMessage, MessageId, UserId};
use crate::commands::{self, Command};
use crate::db::Database;
use crate::engine::BossFightServer;
use crate::metrics;

pub type FightServer = BossFightServer<BridgeChat, Database>;

// ── Request types ─────────────────────────────────────────────────────

/// A chat message forwarded by the bridge.
#[derive(Debug, Deserialize)]
pub struct MessageEvent {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    #[serde(default)]
    pub author_name: Option<String>,
    pub content: String,
    #[serde(default)]
    pub is_bot: bool,
    /// Whether the author holds the server-manage permission.
    #[serde(default)]
    pub is_admin: bool,
}

impl MessageEvent {
    fn to_inbound(&self) -> InboundMessage {
        InboundMessage {
            message_id: self.message_id,
            channel_id: self.channel_id,
            author_id: self.author_id,
            content: self.content.clone(),
            is_bot: self.is_bot,
        }
    }
}

// ── Shared application state ─────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub fight: Arc<FightServer>,
    pub chat: Arc<BridgeChat>,
    pub bridge_token: Option<String>,
    pub local_mode: bool,
    pub command_prefix: String,
}

// ── Bridge authentication ────────────────────────────────────────────

/// Proof that the caller is the configured chat bridge. Always granted in
/// local mode or when no token is configured.
pub struct BridgeAuth;

impl FromRequestParts<AppState> for BridgeAuth {
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let expected = match &state.bridge_token {
            Some(token) if !state.local_mode => token,
            _ => return Ok(BridgeAuth),
        };

        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({"error": "Missing Authorization header"})),
                )
            })?;

        let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "Invalid Authorization header format"})),
            )
        })?;

        if token != expected {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "Invalid bridge token"})),
            ));
        }
        Ok(BridgeAuth)
    }
}

// ── Error helper ──────────────────────────────────────────────────────

fn json_error(status: StatusCode, msg: &str) -> impl IntoResponse {
    (status, Json(json!({ "error": msg })))
}

// ── Router ────────────────────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/events/message", post(receive_message))
        .route("/api/bossfight/status", get(bossfight_status))
        .route("/api/points/{user_id}", get(get_points))
        .route("/ws/bridge", get(ws::ws_bridge))
        .with_state(state)
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn receive_message(
    State(state): State<AppState>,
    _auth: BridgeAuth,
    Json(event): Json<MessageEvent>,
) -> impl IntoResponse {
    metrics::EVENTS_RECEIVED_TOTAL.inc();
    if let Some(name) = &event.author_name {
        state.chat.remember_name(event.author_id, name);
    }

    let msg = event.to_inbound();
    if msg.is_bot {
        return Json(json!({ "status": "ignored" }));
    }

    match Command::parse(&state.command_prefix, &msg.content) {
        Some(command) => {
            commands::dispatch(&state.fight, command, &msg, event.is_admin).await;
            Json(json!({ "status": "ok", "command": command.name() }))
        }
        None => {
            state.fight.handle_message(&msg).await;
            Json(json!({ "status": "ok" }))
        }
    }
}

async fn bossfight_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.fight.status())
}

async fn get_points(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> impl IntoResponse {
    match state.fight.ledger().balance(user_id).await {
        Ok(points) => Json(json!({ "user_id": user_id, "points": points })).into_response(),
        Err(e) => {
            tracing::error!(user_id, "Failed to read boss points: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}
