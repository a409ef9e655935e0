//! Entities for the Agentic HITL Proxy (§3, §4.8).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The LLM's structured judgement for one evaluation pass (§4.8 step e).
/// Deserialised directly from the model's JSON reply; a missing required
/// field fails the same way a malformed plugin manifest does (§7
/// ValidationError), which stands in for a hand-rolled JSON-schema check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitlJudgement {
    /// 0-100.
    pub confidence: u8,
    pub reasoning: String,
    pub response: String,
    #[serde(default)]
    pub restricted: bool,
    #[serde(default)]
    pub restricted_reason: Option<String>,
    #[serde(default)]
    pub safe_default: Option<String>,
}

/// Why an evaluation pass ended without applying a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    RecentUserActivity,
    PostInterventionCooldown,
    ActionNoLongerWaiting,
    BelowConfidenceNoSafeDefault,
    MaxInterventionsReached,
}

/// Outcome of one `evaluate()` pass (§4.8 steps a-h).
#[derive(Debug, Clone)]
pub enum HitlOutcome {
    /// A synthetic response was applied and the action moved back to pending.
    Applied { confidence: u8 },
    /// A lower-confidence safe default was applied as direction-guidance.
    AppliedSafeDefault,
    /// No action taken; re-evaluation rescheduled per backoff, or abandoned
    /// once `backoffMaxAttempts` is reached.
    Aborted { reason: AbortReason, rescheduled: bool },
}

/// One of the four proactive stuck-detection signals (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StuckSignal {
    RepeatedFailures,
    RepeatedTool,
    NoUserCommunication,
    PlanningOnlyLoop,
}

/// Per-action bookkeeping the proxy needs across evaluation passes.
#[derive(Debug, Clone, Default)]
pub struct HitlActionState {
    pub attempts: u32,
    pub next_eval_at: Option<DateTime<Utc>>,
    pub last_intervention_at: Option<DateTime<Utc>>,
    pub interventions_applied: u32,
    /// Step number of the last stuck-guidance injection, so the same
    /// window of steps doesn't inject guidance twice.
    pub last_stuck_step_marker: Option<u32>,
}
