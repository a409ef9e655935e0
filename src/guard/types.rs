//! Entities for the Guard subsystem (§3, §4.5): incidents, loop context, and
//! the composed per-step snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Where a guard-observed event originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentSource {
    Decision,
    Tool,
    System,
    Guardrail,
}

/// A single guard-observed event on an action (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub action_id: String,
    pub step: u32,
    pub source: IncidentSource,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl Incident {
    pub fn new(action_id: impl Into<String>, step: u32, source: IncidentSource, summary: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            step,
            source,
            summary: summary.into(),
            error: None,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Risk level carried by a [`crate::guard::GuardSnapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Everything the conscience engine needs to know about the current step,
/// gathered by the reasoning loop before each guard evaluation (§4.5).
#[derive(Debug, Clone, Default)]
pub struct LoopContext {
    pub step: u32,
    pub no_tool_steps: u32,
    pub recent_tool_names: Vec<String>,
    pub last_error: Option<String>,
    pub total_duration_secs: i64,
    pub messages_sent: u32,
    pub consecutive_failures: u32,
    pub description_len: usize,
}

/// Output of the conscience engine: guidance text plus risk scoring.
#[derive(Debug, Clone)]
pub struct ConscienceResult {
    pub guidance: Vec<String>,
    pub escalate: bool,
    pub complexity_score: u8,
    pub risk: RiskLevel,
}

/// A derived, per-step evaluation (§3). Pure function of the action, recent
/// incidents, and recent step metadata; safe to call multiple times per step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardSnapshot {
    pub action_id: String,
    pub step: u32,
    pub guidance: String,
    pub recovery_plan: Vec<String>,
    pub memory_highlights: Vec<String>,
    pub risk: RiskLevel,
    pub complexity_score: u8,
    pub escalate: bool,
}

impl GuardSnapshot {
    /// Render the snapshot as a single block suitable for injection into the
    /// reasoning loop's prompt or a system memory entry.
    pub fn as_prompt_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "[guard] risk={:?} complexity={} escalate={}\n",
            self.risk, self.complexity_score, self.escalate
        ));
        if !self.guidance.is_empty() {
            out.push_str(&self.guidance);
            out.push('\n');
        }
        if !self.recovery_plan.is_empty() {
            out.push_str("recovery plan:\n");
            for (i, step) in self.recovery_plan.iter().enumerate() {
                out.push_str(&format!("{}. {step}\n", i + 1));
            }
        }
        if !self.memory_highlights.is_empty() {
            out.push_str("memory highlights:\n");
            for h in &self.memory_highlights {
                out.push_str(&format!("- {h}\n"));
            }
        }
        out
    }
}
