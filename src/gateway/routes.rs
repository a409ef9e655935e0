//! HTTP handlers implementing the gateway contract (§6): push a task; list /
//! fetch / cancel actions; clear the queue; list skills; execute a named
//! skill; health check; read memory recent / search; get/set a config key;
//! start/stop the reasoning loop; fetch and send "gateway" channel chat.

use std::sync::atomic::Ordering;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::action_queue::PushActionRequest;
use crate::memory::traits::MemoryKind;
use crate::message_bus::InboundMessage;

use super::GatewayState;

fn err_response(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": message.into() })))
}

// ─── Health ─────────────────────────────────────────────────────────────────

pub async fn health(State(state): State<GatewayState>) -> impl IntoResponse {
    let counts = state.queue.get_counts().await;
    Json(json!({
        "status": "ok",
        "service": "mesoclaw-daemon",
        "loopRunning": state.loop_running.load(Ordering::Relaxed),
        "actionCounts": counts,
    }))
}

// ─── Actions ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PushActionBody {
    pub description: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub payload: std::collections::HashMap<String, Value>,
}

pub async fn push_action(
    State(state): State<GatewayState>,
    Json(body): Json<PushActionBody>,
) -> impl IntoResponse {
    let req = PushActionRequest {
        description: body.description,
        priority: body.priority,
        payload: body.payload,
        parent_action_id: None,
    };
    match state.queue.push(req).await {
        Ok(id) => (StatusCode::CREATED, Json(json!({ "id": id }))).into_response(),
        Err(e) => err_response(StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

pub async fn list_actions(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(json!({ "actions": state.queue.get_queue().await }))
}

pub async fn get_action(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.queue.get(&id).await {
        Some(action) => Json(action).into_response(),
        None => {
            err_response(StatusCode::NOT_FOUND, format!("no such action: {id}")).into_response()
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ReasonBody {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn cancel_action(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    Json(body): Json<ReasonBody>,
) -> impl IntoResponse {
    let reason = body
        .reason
        .unwrap_or_else(|| "cancelled via gateway".to_string());
    match state.queue.cancel(&id, &reason).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => err_response(StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

pub async fn clear_queue(
    State(state): State<GatewayState>,
    Json(body): Json<ReasonBody>,
) -> impl IntoResponse {
    let reason = body
        .reason
        .unwrap_or_else(|| "cleared via gateway".to_string());
    match state.queue.clear(&reason).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ─── Skills ─────────────────────────────────────────────────────────────────

pub async fn list_skills(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(json!({ "skills": state.skills.list() }))
}

pub async fn execute_skill(
    State(state): State<GatewayState>,
    Path(name): Path<String>,
    Json(args): Json<Value>,
) -> impl IntoResponse {
    match state.skills.execute(&name, args).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => err_response(StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

// ─── Memory ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

pub async fn memory_recent(
    State(state): State<GatewayState>,
    Query(q): Query<RecentQuery>,
) -> impl IntoResponse {
    match state.memory.recent(q.limit).await {
        Ok(entries) => Json(json!({ "entries": entries })).into_response(),
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub predicate: Option<String>,
}

pub async fn memory_search(
    State(state): State<GatewayState>,
    Query(q): Query<SearchQuery>,
) -> impl IntoResponse {
    let kind = match q.kind.as_deref() {
        Some("episodic") => MemoryKind::Episodic,
        Some("long") => MemoryKind::Long,
        _ => MemoryKind::Short,
    };
    match state.memory.search(kind, q.predicate.as_deref()).await {
        Ok(entries) => Json(json!({ "entries": entries })).into_response(),
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, e).into_response(),
    }
}

// ─── Config ─────────────────────────────────────────────────────────────────

pub async fn get_config(
    State(state): State<GatewayState>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    match state.config.get(&key).await {
        Some(value) => Json(json!({ "key": key, "value": value })).into_response(),
        None => err_response(StatusCode::NOT_FOUND, format!("no such config key: {key}"))
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct SetConfigBody {
    pub key: String,
    pub value: toml::Value,
}

pub async fn set_config(
    State(state): State<GatewayState>,
    Json(body): Json<SetConfigBody>,
) -> impl IntoResponse {
    match state.config.set(&body.key, body.value).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => err_response(StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

// ─── Reasoning loop control ─────────────────────────────────────────────────

pub async fn loop_start(State(state): State<GatewayState>) -> impl IntoResponse {
    state.loop_running.store(true, Ordering::Relaxed);
    Json(json!({ "running": true }))
}

pub async fn loop_stop(State(state): State<GatewayState>) -> impl IntoResponse {
    state.loop_running.store(false, Ordering::Relaxed);
    Json(json!({ "running": false }))
}

// ─── Gateway chat channel ───────────────────────────────────────────────────

pub(super) const GATEWAY_SOURCE: &str = "gateway";

#[derive(Debug, Deserialize)]
pub struct ChatHistoryQuery {
    pub conversation: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

pub async fn chat_history(
    State(state): State<GatewayState>,
    Query(q): Query<ChatHistoryQuery>,
) -> impl IntoResponse {
    let scope = state
        .memory
        .session_scope(GATEWAY_SOURCE, &q.conversation, &q.conversation);
    match state.memory.by_scope(&scope, q.limit).await {
        Ok(entries) => Json(json!({ "entries": entries })).into_response(),
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct SendChatBody {
    pub conversation: String,
    pub content: String,
}

pub async fn send_chat(
    State(state): State<GatewayState>,
    Json(body): Json<SendChatBody>,
) -> impl IntoResponse {
    let msg = InboundMessage {
        source: GATEWAY_SOURCE.to_string(),
        source_id: body.conversation.clone(),
        user_id: Some(body.conversation.clone()),
        sender_name: None,
        content: body.content,
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
    match state.message_bus.dispatch(msg).await {
        Ok(action_id) => Json(json!({ "actionId": action_id })).into_response(),
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
