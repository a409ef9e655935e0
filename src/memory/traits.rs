//! Core types and the `Memory` trait for the memory subsystem (§3, §4.3).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ─── MemoryKind ───────────────────────────────────────────────────────────────

/// Which tier of the memory hierarchy an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    /// Raw, session-scoped entries: individual messages, tool observations.
    Short,
    /// Derived summaries over a batch of retired short entries.
    Episodic,
    /// Idempotent, concept-keyed long-term facts (user profile, preferences).
    Long,
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryKind::Short => write!(f, "short"),
            MemoryKind::Episodic => write!(f, "episodic"),
            MemoryKind::Long => write!(f, "long"),
        }
    }
}

// ─── MemoryEntry ──────────────────────────────────────────────────────────────

/// Well-known metadata keys carried in [`MemoryEntry::metadata`].
pub mod meta_keys {
    pub const ACTION_ID: &str = "actionId";
    pub const ROLE: &str = "role";
    pub const TOOL_NAME: &str = "toolName";
    pub const TOOL_INPUT: &str = "toolInput";
    pub const CHANNEL_SOURCE: &str = "channelSource";
    pub const CHANNEL_SOURCE_ID: &str = "channelSourceId";
    pub const SESSION_SCOPE_ID: &str = "sessionScopeId";
    pub const AGENTIC_USER: &str = "agenticUser";
    /// For `Long` entries: the stable concept id the entry upserts against.
    pub const CONCEPT_ID: &str = "conceptId";
    /// Set on short entries once folded into an episodic summary.
    pub const CONSOLIDATED: &str = "consolidated";
}

/// A single memory record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    pub id: String,
    pub kind: MemoryKind,
    pub content: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Relevance score in `[0, 1]`, populated by search/recall; `0.0` for
    /// entries not produced by a ranked query.
    #[serde(skip)]
    pub score: f32,
}

impl MemoryEntry {
    pub fn new(kind: MemoryKind, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            content: content.into(),
            created_at: chrono::Utc::now(),
            metadata: HashMap::new(),
            score: 0.0,
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn session_scope_id(&self) -> Option<&str> {
        self.metadata
            .get(meta_keys::SESSION_SCOPE_ID)
            .and_then(|v| v.as_str())
    }

    pub fn action_id(&self) -> Option<&str> {
        self.metadata.get(meta_keys::ACTION_ID).and_then(|v| v.as_str())
    }

    pub fn concept_id(&self) -> Option<&str> {
        self.metadata.get(meta_keys::CONCEPT_ID).and_then(|v| v.as_str())
    }

    pub fn is_consolidated(&self) -> bool {
        self.metadata
            .get(meta_keys::CONSOLIDATED)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

// ─── Memory trait ─────────────────────────────────────────────────────────────

/// Abstraction over the memory manager (§4.3). Implementations own storage
/// and indices over `MemoryEntry`; all writes are persisted incrementally.
#[async_trait]
pub trait Memory: Send + Sync {
    /// Persist `entry` (or, for `Long` entries carrying a `conceptId`,
    /// upsert in place). Returns the stored entry's id.
    async fn save(&self, entry: MemoryEntry) -> Result<String, String>;

    /// Most recent entries across all scopes, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<MemoryEntry>, String>;

    /// All entries tagged with `actionId`, in insertion order.
    async fn by_action(&self, action_id: &str) -> Result<Vec<MemoryEntry>, String>;

    /// Most recent entries scoped to `session_scope_id`, newest first.
    async fn by_scope(&self, session_scope_id: &str, limit: usize) -> Result<Vec<MemoryEntry>, String>;

    /// Entries of `kind` matching `predicate` over the content (case-insensitive
    /// substring match when `Some`; all entries of that kind when `None`).
    async fn search(&self, kind: MemoryKind, predicate: Option<&str>) -> Result<Vec<MemoryEntry>, String>;

    /// Hybrid semantic/keyword ranked search across all entries.
    async fn semantic_search(&self, query: &str, limit: usize) -> Result<Vec<MemoryEntry>, String>;

    /// Fold the oldest `memoryConsolidationBatch` short entries in `scope`
    /// into one episodic summary once the threshold is crossed. No-op (and
    /// returns `Ok(None)`) when the scope is under threshold.
    async fn consolidate(&self, scope: &str) -> Result<Option<MemoryEntry>, String>;

    /// Stable per-channel-contact profile text (e.g. WhatsApp JID, Slack user id).
    async fn contact_profile(&self, jid: &str) -> Result<Option<String>, String>;

    async fn set_contact_profile(&self, jid: &str, text: &str) -> Result<(), String>;

    /// Assembled long-term user context for the identity preamble.
    async fn user_context(&self) -> Result<String, String>;

    /// Resolve `(source, source_id, user_id)` to a stable session scope id,
    /// so memory filtering, rate limiting, and profile lookups agree.
    fn session_scope(&self, source: &str, source_id: &str, user_id: &str) -> String {
        format!("{source}:{source_id}:{user_id}")
    }

    /// Remove an entry by id. Returns `true` if it was found and removed.
    async fn forget(&self, id: &str) -> Result<bool, String>;

    /// Append an entry to today's daily diary (convenience over `save`).
    async fn store_daily(&self, content: &str) -> Result<(), String>;

    /// Retrieve the diary content for `date` (format `YYYY-MM-DD`).
    async fn recall_daily(&self, date: &str) -> Result<Option<String>, String>;
}
