//! Dispatch pipeline (§4.4): normalises an [`InboundMessage`] into a pushed
//! [`crate::action_queue::Action`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::action_queue::{ActionQueue, PushActionRequest};
use crate::config::schema::MessageBusConfig;
use crate::error::{CoreError, CoreResult};
use crate::event_bus::{AppEvent, EventBus};
use crate::memory::traits::{meta_keys, Memory, MemoryEntry, MemoryKind};

use super::types::InboundMessage;

/// Metadata payload keys written onto pushed actions (mirrors `meta_keys`
/// where the concept overlaps, plus bus-specific fields).
pub mod payload_keys {
    pub const SOURCE: &str = "source";
    pub const SOURCE_ID: &str = "sourceId";
    pub const USER_ID: &str = "userId";
    pub const MESSAGE_ID: &str = "messageId";
    pub const SESSION_SCOPE_ID: &str = "sessionScopeId";
    pub const LAST_USER_MESSAGE_TEXT: &str = "lastUserMessageText";
}

/// Normalises inbound events into Action Queue pushes (§4.4).
pub struct MessageBus {
    memory: Arc<dyn Memory>,
    queue: Arc<dyn ActionQueue>,
    bus: Option<Arc<dyn EventBus>>,
    cfg: MessageBusConfig,
    seen: Mutex<VecDeque<(String, String, String, DateTime<Utc>)>>,
}

impl MessageBus {
    pub fn new(
        memory: Arc<dyn Memory>,
        queue: Arc<dyn ActionQueue>,
        bus: Option<Arc<dyn EventBus>>,
        cfg: MessageBusConfig,
    ) -> Self {
        Self {
            memory,
            queue,
            bus,
            cfg,
            seen: Mutex::new(VecDeque::new()),
        }
    }

    /// Dispatch `msg`. Returns the pushed action id, or `None` when the
    /// message was a duplicate within the dedup window or the reply was
    /// suppressed by auto-reply configuration.
    pub async fn dispatch(&self, msg: InboundMessage) -> CoreResult<Option<String>> {
        if self.is_duplicate(&msg) {
            return Ok(None);
        }

        let user_id = msg.user_id_or_source_id().to_string();
        let scope = self.memory.session_scope(&msg.source, &msg.source_id, &user_id);

        let content = compose_memory_content(&msg);
        let entry = MemoryEntry::new(MemoryKind::Short, content)
            .with_meta(meta_keys::ROLE, "user")
            .with_meta(meta_keys::CHANNEL_SOURCE, msg.source.clone())
            .with_meta(meta_keys::CHANNEL_SOURCE_ID, msg.source_id.clone())
            .with_meta(meta_keys::SESSION_SCOPE_ID, scope.clone());
        self.memory.save(entry).await.map_err(CoreError::from)?;

        if let Some(bus) = &self.bus {
            let _ = bus.publish(AppEvent::UserActivity {
                source: msg.source.clone(),
                source_id: msg.source_id.clone(),
            });
        }

        if !msg.is_command && self.is_reply_suppressed(&msg) {
            return Ok(None);
        }

        let (description, priority) = build_task(&msg, &self.cfg);

        let mut payload = std::collections::HashMap::new();
        payload.insert(payload_keys::SOURCE.to_string(), msg.source.clone().into());
        payload.insert(payload_keys::SOURCE_ID.to_string(), msg.source_id.clone().into());
        payload.insert(payload_keys::USER_ID.to_string(), user_id.into());
        payload.insert(payload_keys::MESSAGE_ID.to_string(), msg.message_id.clone().into());
        payload.insert(payload_keys::SESSION_SCOPE_ID.to_string(), scope.into());
        payload.insert(
            payload_keys::LAST_USER_MESSAGE_TEXT.to_string(),
            msg.content.clone().into(),
        );

        let action_id = self
            .queue
            .push(PushActionRequest {
                description,
                priority,
                payload,
                parent_action_id: None,
            })
            .await?;

        Ok(Some(action_id))
    }

    /// Honour per-channel auto-reply configuration: suppressed when the
    /// message carries `suppressReply`, or when `<channel>AutoReplyEnabled`
    /// is explicitly `false`.
    fn is_reply_suppressed(&self, msg: &InboundMessage) -> bool {
        if msg.suppress_reply {
            return true;
        }
        self.cfg
            .auto_reply_enabled
            .get(&msg.source)
            .map(|enabled| !enabled)
            .unwrap_or(false)
    }

    /// Record-and-check the `(source, sourceId, messageId)` dedup window.
    fn is_duplicate(&self, msg: &InboundMessage) -> bool {
        let now = Utc::now();
        let mut seen = self.seen.lock().expect("message bus dedup lock poisoned");
        let window = chrono::Duration::seconds(self.cfg.dedup_window_secs.max(0));
        seen.retain(|(_, _, _, ts)| now.signed_duration_since(*ts) <= window);

        let is_dup = seen
            .iter()
            .any(|(s, sid, mid, _)| s == &msg.source && sid == &msg.source_id && mid == &msg.message_id);
        if is_dup {
            return true;
        }
        seen.push_back((msg.source.clone(), msg.source_id.clone(), msg.message_id.clone(), now));
        false
    }
}

/// Compose the canonical memory content string: sender + channel + body +
/// reply context + media analysis.
fn compose_memory_content(msg: &InboundMessage) -> String {
    let sender = msg.sender_name.as_deref().unwrap_or(&msg.source_id);
    let mut out = format!("[{}] {}: {}", msg.source, sender, msg.content);
    if let Some(reply) = &msg.reply_context {
        out.push_str(&format!("\n(replying to: {reply})"));
    }
    if let Some(analysis) = &msg.media_analysis {
        out.push_str(&format!("\n(media: {analysis})"));
    }
    out
}

/// Build the task description and priority for a pushed action, using
/// channel-specific templates (§4.4).
fn build_task(msg: &InboundMessage, cfg: &MessageBusConfig) -> (String, i32) {
    let sender = msg.sender_name.as_deref().unwrap_or(&msg.source_id);

    if msg.is_owner && msg.is_command {
        return (
            format!("Owner self-command on {}: {}", msg.source, msg.content),
            cfg.default_priority as i32,
        );
    }

    if msg.is_command {
        let description = format!(
            "Command from {sender} on {}: {}",
            msg.source, msg.content
        );
        return (description, cfg.default_priority as i32);
    }

    if msg.source == "email" {
        let description = format!(
            "Reply to email thread from {sender} (message {}). Preserve threading when replying: {}",
            msg.message_id, msg.content
        );
        return (description, cfg.default_priority as i32);
    }

    if msg.source == "whatsapp" && msg.channel_name.as_deref() == Some("status") {
        let description = format!(
            "WhatsApp status update from {sender}: {}. Use the reply_whatsapp_status tool to respond.",
            msg.content
        );
        return (description, cfg.default_priority as i32);
    }

    if msg.is_external {
        let description = format!(
            "External observation from {sender} on {}: {} (low priority, reply only if warranted)",
            msg.source, msg.content
        );
        return (description, cfg.external_priority as i32);
    }

    (
        format!("Reply to {sender} on {}: {}", msg.source, msg.content),
        cfg.default_priority as i32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action_queue::JsonActionQueue;
    use crate::memory::store::InMemoryStore;
    use tempfile::TempDir;

    fn msg(message_id: &str, content: &str) -> InboundMessage {
        InboundMessage {
            source: "telegram".into(),
            source_id: "chat-1".into(),
            user_id: Some("user-1".into()),
            sender_name: Some("Ada".into()),
            content: content.into(),
            message_id: message_id.into(),
            reply_context: None,
            media_paths: vec![],
            media_analysis: None,
            channel_name: None,
            is_command: false,
            is_mention: false,
            is_external: false,
            is_owner: false,
            suppress_reply: false,
            metadata: Default::default(),
        }
    }

    async fn bus_under_test() -> (MessageBus, TempDir) {
        let dir = TempDir::new().unwrap();
        let memory = Arc::new(InMemoryStore::new_mock());
        let queue = Arc::new(
            JsonActionQueue::new(dir.path().join("queue.json"), 100, None).unwrap(),
        );
        let bus = MessageBus::new(memory, queue, None, MessageBusConfig::default());
        (bus, dir)
    }

    #[tokio::test]
    async fn dedup_within_window_yields_one_action() {
        let (bus, _dir) = bus_under_test().await;
        let first = bus.dispatch(msg("m1", "hello")).await.unwrap();
        let second = bus.dispatch(msg("m1", "hello")).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none(), "duplicate messageId within the window should not push a second action");
    }

    #[tokio::test]
    async fn distinct_messages_each_push_an_action() {
        let (bus, _dir) = bus_under_test().await;
        let a = bus.dispatch(msg("m1", "hello")).await.unwrap();
        let b = bus.dispatch(msg("m2", "world")).await.unwrap();
        assert!(a.is_some());
        assert!(b.is_some());
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn suppress_reply_flag_blocks_task_push() {
        let (bus, _dir) = bus_under_test().await;
        let mut m = msg("m1", "hello");
        m.suppress_reply = true;
        let result = bus.dispatch(m).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn commands_always_pass_even_when_auto_reply_disabled() {
        let dir = TempDir::new().unwrap();
        let memory = Arc::new(InMemoryStore::new_mock());
        let queue = Arc::new(JsonActionQueue::new(dir.path().join("queue.json"), 100, None).unwrap());
        let mut cfg = MessageBusConfig::default();
        cfg.auto_reply_enabled.insert("telegram".to_string(), false);
        let bus = MessageBus::new(memory, queue, None, cfg);

        let mut m = msg("m1", "/start");
        m.is_command = true;
        let result = bus.dispatch(m).await.unwrap();
        assert!(result.is_some(), "commands bypass auto-reply suppression");
    }

    #[tokio::test]
    async fn owner_command_uses_owner_self_command_template() {
        let cfg = MessageBusConfig::default();
        let mut m = msg("m1", "/restart");
        m.is_owner = true;
        m.is_command = true;
        let (description, _priority) = build_task(&m, &cfg);
        assert!(
            description.starts_with("Owner self-command on"),
            "owner+command should use the owner-self-command template, got: {description}"
        );
    }

    #[tokio::test]
    async fn non_owner_command_uses_plain_command_template() {
        let cfg = MessageBusConfig::default();
        let mut m = msg("m1", "/start");
        m.is_command = true;
        let (description, _priority) = build_task(&m, &cfg);
        assert!(
            description.starts_with("Command from"),
            "command from a non-owner should use the plain command template, got: {description}"
        );
    }
}
