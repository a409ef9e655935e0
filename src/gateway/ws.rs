use std::sync::Arc;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use serde::Deserialize;

use crate::event_bus::EventBus;
use crate::message_bus::InboundMessage;

use super::GatewayState;
use super::routes::GATEWAY_SOURCE;

/// WebSocket upgrade handler at `GET /api/v1/ws`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

// ─── Incoming command types ──────────────────────────────────────────────────

/// Envelope for all WebSocket commands sent by clients.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsCommand {
    /// Route a chat message into the gateway channel (§6), same path as
    /// `POST /api/v1/chat`. Cancellation runs over `DELETE /api/v1/actions/{id}`
    /// instead of a WS-only command, so the reasoning loop has one cancel path.
    AgentMessage {
        content: String,
        conversation: Option<String>,
    },
    /// Ping / keep-alive (no-op, triggers a pong ack).
    Ping,
}

// ─── Socket handler ──────────────────────────────────────────────────────────

async fn handle_socket(mut socket: WebSocket, state: GatewayState) {
    let bus: Arc<dyn EventBus> = state.bus.clone();
    let mut rx = bus.subscribe();

    loop {
        tokio::select! {
            // Forward bus events to the client.
            event = rx.recv() => {
                match event {
                    Ok(ev) => {
                        let payload = match serde_json::to_string(&ev) {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::warn!("ws: failed to serialise event: {e}");
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break; // Client disconnected.
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("ws handler lagged, missed {n} events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            // Parse and dispatch commands from the client.
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_command(&text, &state, &mut socket).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }
        }
    }
}

/// Parse a JSON command from the client and act on it.
async fn handle_client_command(raw: &str, state: &GatewayState, socket: &mut WebSocket) {
    let cmd: WsCommand = match serde_json::from_str(raw) {
        Ok(c) => c,
        Err(e) => {
            let err_msg = serde_json::json!({
                "type": "error",
                "error": format!("invalid command: {e}"),
            });
            let _ = socket.send(Message::Text(err_msg.to_string())).await;
            return;
        }
    };

    match cmd {
        WsCommand::AgentMessage {
            content,
            conversation,
        } => {
            let conversation = conversation.unwrap_or_else(|| "ws".to_string());
            let msg = InboundMessage {
                source: GATEWAY_SOURCE.to_string(),
                source_id: conversation.clone(),
                user_id: Some(conversation.clone()),
                sender_name: None,
                content,
                message_id: uuid::Uuid::new_v4().to_string(),
                reply_context: None,
                media_paths: Vec::new(),
                media_analysis: None,
                channel_name: Some(GATEWAY_SOURCE.to_string()),
                is_command: false,
                is_mention: true,
                is_external: false,
                is_owner: true,
                suppress_reply: false,
                metadata: Default::default(),
            };
            let ack = match state.message_bus.dispatch(msg).await {
                Ok(Some(action_id)) => serde_json::json!({
                    "type": "ack",
                    "actionId": action_id,
                }),
                Ok(None) => serde_json::json!({
                    "type": "ack",
                    "actionId": null,
                    "note": "duplicate or suppressed",
                }),
                Err(e) => serde_json::json!({
                    "type": "error",
                    "error": e.to_string(),
                }),
            };
            let _ = socket.send(Message::Text(ack.to_string())).await;
        }
        WsCommand::Ping => {
            let pong = serde_json::json!({ "type": "pong" });
            let _ = socket.send(Message::Text(pong.to_string())).await;
        }
    }
}
