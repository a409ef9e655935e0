//! Inbound event shape (§6) consumed by the Message Bus (§4.4).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A normalised inbound message from any channel, the operator CLI, or the
/// gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    /// Originating channel: `"whatsapp"`, `"telegram"`, `"gateway"`, `"cli"`, ...
    pub source: String,
    /// Channel-scoped conversation/chat identifier.
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub content: String,
    /// Channel-native message id, used for deduplication.
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_context: Option<String>,
    #[serde(default)]
    pub media_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_analysis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
    #[serde(default)]
    pub is_command: bool,
    #[serde(default)]
    pub is_mention: bool,
    #[serde(default)]
    pub is_external: bool,
    #[serde(default)]
    pub is_owner: bool,
    #[serde(default)]
    pub suppress_reply: bool,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl InboundMessage {
    pub fn user_id_or_source_id(&self) -> &str {
        self.user_id.as_deref().unwrap_or(&self.source_id)
    }
}
