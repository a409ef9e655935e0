//! Entities for the Action Queue (§3, §4.1).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Lifecycle state of an [`Action`].
///
/// Transitions form a DAG: `Pending`/`Waiting` → `InProgress` →
/// `{Completed, Failed, Cancelled}`. Terminal states are sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionStatus {
    Pending,
    Waiting,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl ActionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: ActionStatus) -> bool {
        use ActionStatus::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (Pending, Waiting | InProgress | Cancelled) => true,
            (Waiting, Pending | InProgress | Cancelled | Failed) => true,
            (InProgress, Pending | Waiting | Completed | Failed | Cancelled) => true,
            (a, b) if a == b => true,
            _ => false,
        }
    }
}

/// A unit of work consumed by the reasoning loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: String,
    pub description: String,
    pub priority: i32,
    pub status: ActionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Arbitrary key-value payload: source channel, sourceId, userId,
    /// messageId, session scope, and loop-local state such as
    /// `lastUserMessageText`.
    #[serde(default)]
    pub payload: HashMap<String, Value>,
    /// Number of reasoning-loop steps taken against this action so far.
    #[serde(default)]
    pub step_count: u32,
    /// Number of outbound messages sent for this action so far (§4.6 bound).
    #[serde(default)]
    pub messages_sent: u32,
    /// Parent action id, set for sub-tasks delegated by the orchestrator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_action_id: Option<String>,
    /// Set when the action was transitioned with a reason (cancel, failure, stale sweep).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reason: Option<String>,
    /// Wall-clock time the action was last leased via `pop()`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leased_at: Option<DateTime<Utc>>,
}

impl Action {
    pub fn new(id: String, description: String, priority: i32) -> Self {
        let now = Utc::now();
        Self {
            id,
            description,
            priority,
            status: ActionStatus::Pending,
            created_at: now,
            updated_at: now,
            payload: HashMap::new(),
            step_count: 0,
            messages_sent: 0,
            parent_action_id: None,
            last_reason: None,
            leased_at: None,
        }
    }

    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }
}

/// Snapshot of queue depth by status, returned by `getCounts()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionCounts {
    pub pending: usize,
    pub waiting: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Arguments for `push()`.
#[derive(Debug, Clone, Default)]
pub struct PushActionRequest {
    pub description: String,
    pub priority: i32,
    pub payload: HashMap<String, Value>,
    pub parent_action_id: Option<String>,
}
