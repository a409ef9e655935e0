//! Reasoning Loop (§4.6): drives a leased [`Action`] through steps until it
//! reaches a terminal state, consulting the Guard before each step and
//! routing tool calls through the Skills Registry.
//!
//! The LLM expresses its decision for a step as plain text. Tool calls are
//! recognised via [`super::tool_parser::parse_tool_calls`] (OpenAI-JSON or
//! XML inline, §4.6 step 2/3). Absent a tool call, a leading `[CLARIFY]` or
//! `[DONE]` marker selects the clarification or completion path; anything
//! else is a direct response (§4.6 steps 4-6). This three-marker convention
//! is this crate's resolution of an otherwise unspecified "one of five
//! decision kinds" contract — see DESIGN.md.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::action_queue::{Action, ActionQueue, ActionStatus};
use crate::ai::provider::LLMProvider;
use crate::ai::types::{CompletionRequest, Message};
use crate::config::schema::ActionQueueConfig;
use crate::error::{CoreError, CoreResult};
use crate::event_bus::{AppEvent, EventBus};
use crate::guard::{Guard, LoopContext};
use crate::memory::traits::{Memory, MemoryEntry, MemoryKind, meta_keys};
use crate::skill_registry::{PromptSurfaceMode, SkillsRegistry};

use super::tool_parser::parse_tool_calls;

/// Loop-local metadata keys written onto memory entries, so a later step can
/// reconstruct [`LoopContext`] purely from the action and its memory trail.
mod step_meta {
    pub const DECISION_KIND: &str = "decisionKind";
    pub const TOOL_SUCCESS: &str = "toolSuccess";
}

const CLARIFY_MARKER: &str = "[CLARIFY]";
const DONE_MARKER: &str = "[DONE]";

/// Outcome of a single `run_step` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The action took another step and remains in progress.
    Continued,
    /// The action moved to `waiting` pending clarification or HITL review.
    Waiting,
    /// The action reached a terminal `completed` state.
    Completed,
    /// The action reached a terminal `failed` state (hard bound or escalation).
    Failed,
}

pub struct ReasoningLoop {
    queue: Arc<dyn ActionQueue>,
    memory: Arc<dyn Memory>,
    guard: Arc<Guard>,
    skills: Arc<SkillsRegistry>,
    provider: Arc<dyn LLMProvider>,
    bus: Option<Arc<dyn EventBus>>,
    cfg: ActionQueueConfig,
    model: String,
}

impl ReasoningLoop {
    pub fn new(
        queue: Arc<dyn ActionQueue>,
        memory: Arc<dyn Memory>,
        guard: Arc<Guard>,
        skills: Arc<SkillsRegistry>,
        provider: Arc<dyn LLMProvider>,
        bus: Option<Arc<dyn EventBus>>,
        cfg: ActionQueueConfig,
        model: String,
    ) -> Self {
        Self { queue, memory, guard, skills, provider, bus, cfg, model }
    }

    /// Run exactly one step against `action_id` (§4.6). The scheduler decides
    /// how many times to call this per tick.
    pub async fn run_step(&self, action_id: &str) -> CoreResult<StepOutcome> {
        let action = self
            .queue
            .get(action_id)
            .await
            .ok_or_else(|| CoreError::ResourceMissing(format!("action {action_id}")))?;

        let history = self.memory.by_action(action_id).await.map_err(CoreError::from)?;
        let ctx = derive_loop_context(&action, &history);

        let memory_highlights: Vec<String> = history
            .iter()
            .rev()
            .take(3)
            .map(|e| e.content.clone())
            .collect();

        let snapshot = self.guard.snapshot(action_id, &action.description, &ctx, memory_highlights);

        if snapshot.escalate {
            let report = format!(
                "Escalating after {} steps: {}",
                action.step_count,
                snapshot.guidance
            );
            self.save_system_entry(action_id, &report, "escalation").await?;
            self.queue
                .update_status(action_id, ActionStatus::Completed, Some("escalated"))
                .await?;
            self.guard.clear(action_id);
            self.publish(AppEvent::AgentActionCompleted {
                action_id: action_id.to_string(),
                status: "escalated".to_string(),
            });
            return Ok(StepOutcome::Failed);
        }

        if !snapshot.recovery_plan.is_empty() {
            let plan_text = format!("Recovery plan:\n{}", snapshot.recovery_plan.join("\n"));
            self.save_system_entry(action_id, &plan_text, "recovery-plan").await?;
        }

        if action.step_count >= self.cfg.max_steps_per_action {
            return self.fail_action(action_id, "max steps per action exceeded", &snapshot.guidance).await;
        }
        if action.messages_sent >= self.cfg.max_messages_per_action {
            return self.fail_action(action_id, "max messages per action exceeded", &snapshot.guidance).await;
        }

        let prompt = self.build_prompt(&action, &history, &snapshot.as_prompt_text());
        let request = CompletionRequest::new(
            self.model.clone(),
            vec![Message::system(prompt), Message::user(action.description.clone())],
        );
        let response = self.provider.complete(request).await.map_err(CoreError::from)?;
        self.queue.increment_counters(action_id, 1, 0).await?;
        self.publish(AppEvent::AgentThinking {
            action_id: action_id.to_string(),
            content: response.content.clone(),
        });

        let trimmed = response.content.trim();
        let tool_calls = parse_tool_calls(&response.content);

        if !tool_calls.is_empty() {
            self.handle_tool_call(action_id, &action, &tool_calls[0]).await
        } else if trimmed.starts_with(CLARIFY_MARKER) {
            self.handle_clarification(action_id, trimmed.trim_start_matches(CLARIFY_MARKER).trim())
                .await
        } else if trimmed.starts_with(DONE_MARKER) {
            self.handle_completion(action_id, &action, trimmed.trim_start_matches(DONE_MARKER).trim())
                .await
        } else {
            self.handle_direct_response(action_id, &action, trimmed).await
        }
    }

    async fn handle_tool_call(
        &self,
        action_id: &str,
        action: &Action,
        call: &super::tool_parser::ParsedToolCall,
    ) -> CoreResult<StepOutcome> {
        let result = self.skills.execute(&call.name, call.arguments.clone()).await;

        let (content, success) = match &result {
            Ok(r) => (r.output.clone(), r.success),
            Err(e) => (e.to_string(), false),
        };

        let entry = MemoryEntry::new(MemoryKind::Short, format!("[tool:{}] {}", call.name, content))
            .with_meta(meta_keys::ACTION_ID, action_id)
            .with_meta(meta_keys::TOOL_NAME, call.name.clone())
            .with_meta(meta_keys::TOOL_INPUT, call.arguments.clone())
            .with_meta(step_meta::DECISION_KIND, "tool")
            .with_meta(step_meta::TOOL_SUCCESS, success);
        self.memory.save(entry).await.map_err(CoreError::from)?;

        if !success {
            self.guard.record_incident(crate::guard::Incident::new(
                action_id,
                action.step_count,
                crate::guard::IncidentSource::Tool,
                format!("tool {} failed", call.name),
            ).with_error(content));
        }

        Ok(StepOutcome::Continued)
    }

    async fn handle_direct_response(
        &self,
        action_id: &str,
        action: &Action,
        content: &str,
    ) -> CoreResult<StepOutcome> {
        let entry = MemoryEntry::new(MemoryKind::Short, content.to_string())
            .with_meta(meta_keys::ACTION_ID, action_id)
            .with_meta(meta_keys::ROLE, "assistant")
            .with_meta(step_meta::DECISION_KIND, "response");
        self.memory.save(entry).await.map_err(CoreError::from)?;
        self.queue.increment_counters(action_id, 0, 1).await?;

        if action.payload_str("source") == Some("gateway") {
            self.publish(AppEvent::GatewayChatResponse {
                conversation_id: action.payload_str("sourceId").unwrap_or_default().to_string(),
                content: content.to_string(),
            });
        }

        Ok(StepOutcome::Continued)
    }

    async fn handle_clarification(&self, action_id: &str, question: &str) -> CoreResult<StepOutcome> {
        let mut patch = HashMap::new();
        patch.insert("lastUserMessageText".to_string(), Value::String(question.to_string()));
        patch.insert("clarification".to_string(), Value::Bool(true));
        self.queue.update_payload(action_id, patch).await?;
        self.queue
            .update_status(action_id, ActionStatus::Waiting, Some("clarification requested"))
            .await?;

        let entry = MemoryEntry::new(MemoryKind::Short, question.to_string())
            .with_meta(meta_keys::ACTION_ID, action_id)
            .with_meta(meta_keys::ROLE, "assistant")
            .with_meta(step_meta::DECISION_KIND, "clarification");
        self.memory.save(entry).await.map_err(CoreError::from)?;

        Ok(StepOutcome::Waiting)
    }

    /// Termination review (§4.6 step 6): a short LLM pass answering "are all
    /// stated user goals satisfied?" given the task description and the
    /// memory trail. Rejects completion with a "missing" guidance list when
    /// the model cannot confirm every goal is satisfied.
    async fn handle_completion(
        &self,
        action_id: &str,
        action: &Action,
        claimed_summary: &str,
    ) -> CoreResult<StepOutcome> {
        let trail = self.memory.by_action(action_id).await.map_err(CoreError::from)?;
        let trail_text = trail.iter().map(|e| e.content.clone()).collect::<Vec<_>>().join("\n");

        let review_prompt = format!(
            "Task: {}\nClaimed completion: {claimed_summary}\nMemory trail:\n{trail_text}\n\n\
             Are all stated goals satisfied? Reply with exactly \"yes\" if so, otherwise reply \
             \"missing: \" followed by a comma-separated list of unmet subgoals.",
            action.description
        );
        let request = CompletionRequest::new(self.model.clone(), vec![Message::user(review_prompt)]);
        let review = self.provider.complete(request).await.map_err(CoreError::from)?;
        let verdict = review.content.trim();

        if verdict.eq_ignore_ascii_case("yes") {
            self.queue
                .update_status(action_id, ActionStatus::Completed, Some("goals satisfied"))
                .await?;
            self.guard.clear(action_id);
            self.publish(AppEvent::AgentActionCompleted {
                action_id: action_id.to_string(),
                status: "completed".to_string(),
            });
            Ok(StepOutcome::Completed)
        } else {
            let guidance = verdict.trim_start_matches("missing:").trim();
            let entry = MemoryEntry::new(
                MemoryKind::Short,
                format!("Termination review rejected completion; missing: {guidance}"),
            )
            .with_meta(meta_keys::ACTION_ID, action_id)
            .with_meta(meta_keys::ROLE, "system")
            .with_meta(step_meta::DECISION_KIND, "termination-review");
            self.memory.save(entry).await.map_err(CoreError::from)?;
            Ok(StepOutcome::Continued)
        }
    }

    async fn fail_action(&self, action_id: &str, reason: &str, guidance: &str) -> CoreResult<StepOutcome> {
        let full_reason = if guidance.is_empty() {
            reason.to_string()
        } else {
            format!("{reason}: {guidance}")
        };
        self.queue
            .update_status(action_id, ActionStatus::Failed, Some(&full_reason))
            .await?;
        self.guard.clear(action_id);
        self.publish(AppEvent::AgentActionCompleted {
            action_id: action_id.to_string(),
            status: "failed".to_string(),
        });
        Ok(StepOutcome::Failed)
    }

    async fn save_system_entry(&self, action_id: &str, content: &str, tag: &str) -> CoreResult<()> {
        let entry = MemoryEntry::new(MemoryKind::Short, content.to_string())
            .with_meta(meta_keys::ACTION_ID, action_id)
            .with_meta(meta_keys::ROLE, "system")
            .with_meta(step_meta::DECISION_KIND, tag);
        self.memory.save(entry).await.map_err(CoreError::from)?;
        Ok(())
    }

    /// Build the per-step prompt: identity preamble, recent scoped memory,
    /// skills catalog, and the guard snapshot text (§4.6 step 1).
    fn build_prompt(&self, action: &Action, history: &[MemoryEntry], guard_text: &str) -> String {
        let mut out = String::from("You are an autonomous operator assistant working one action at a time.\n");

        if let Some(scope) = action.payload_str("sessionScopeId") {
            out.push_str(&format!("Session scope: {scope}\n"));
        }

        let recent: Vec<&str> = history.iter().rev().take(10).map(|e| e.content.as_str()).collect();
        if !recent.is_empty() {
            out.push_str("Recent activity on this action (most recent first):\n");
            for line in recent {
                out.push_str(&format!("- {line}\n"));
            }
        }

        let keywords: Vec<&str> = action.description.split_whitespace().collect();
        let mode = if history.len() > 20 {
            PromptSurfaceMode::RelevantToKeywords
        } else if history.len() > 5 {
            PromptSurfaceMode::Compact
        } else {
            PromptSurfaceMode::Full
        };
        let catalog = self.skills.prompt_surface(mode, &keywords);
        if !catalog.is_empty() {
            out.push_str("Available skills:\n");
            out.push_str(&catalog);
            out.push('\n');
        }

        if !guard_text.is_empty() {
            out.push_str(guard_text);
        }

        out.push_str(&format!(
            "\nRespond with a tool call, or prefix with {CLARIFY_MARKER} to ask the user a question, \
             or {DONE_MARKER} when every stated goal is satisfied, otherwise respond directly to the user."
        ));
        out
    }

    fn publish(&self, event: AppEvent) {
        if let Some(bus) = &self.bus {
            let _ = bus.publish(event);
        }
    }
}

/// Derive [`LoopContext`] purely from `action` and its memory trail (§9
/// design notes: the guard snapshot is a pure function of the action, recent
/// incidents, and recent step metadata).
fn derive_loop_context(action: &Action, history: &[MemoryEntry]) -> LoopContext {
    let mut no_tool_steps = 0u32;
    for entry in history.iter().rev() {
        let kind = entry.metadata.get(step_meta::DECISION_KIND).and_then(|v| v.as_str());
        match kind {
            Some("tool") => break,
            Some(_) => no_tool_steps += 1,
            None => {}
        }
    }

    let recent_tool_names: Vec<String> = history
        .iter()
        .rev()
        .filter_map(|e| e.metadata.get(meta_keys::TOOL_NAME).and_then(|v| v.as_str()).map(String::from))
        .take(4)
        .collect();

    let last_error = history
        .iter()
        .rev()
        .find(|e| e.metadata.get(step_meta::TOOL_SUCCESS).and_then(|v| v.as_bool()) == Some(false))
        .map(|e| e.content.clone());

    let consecutive_failures = history
        .iter()
        .rev()
        .take_while(|e| {
            matches!(
                e.metadata.get(step_meta::DECISION_KIND).and_then(|v| v.as_str()),
                Some("tool")
            )
        })
        .filter(|e| e.metadata.get(step_meta::TOOL_SUCCESS).and_then(|v| v.as_bool()) == Some(false))
        .count() as u32;

    LoopContext {
        step: action.step_count,
        no_tool_steps,
        recent_tool_names,
        last_error,
        total_duration_secs: (Utc::now() - action.created_at).num_seconds(),
        messages_sent: action.messages_sent,
        consecutive_failures,
        description_len: action.description.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action_queue::{JsonActionQueue, PushActionRequest};
    use crate::ai::types::CompletionResponse;
    use crate::config::schema::GuardConfig;
    use crate::memory::store::InMemoryStore;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct ScriptedProvider {
        responses: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        async fn complete(&self, _request: CompletionRequest) -> crate::ai::provider::Result<CompletionResponse> {
            let mut responses = self.responses.lock().unwrap();
            let content = if responses.is_empty() {
                "yes".to_string()
            } else {
                responses.remove(0)
            };
            Ok(CompletionResponse { content, model: "test".into(), usage: None, finish_reason: None })
        }
        async fn stream(&self, _request: CompletionRequest) -> crate::ai::provider::Result<crate::ai::provider::StreamResponse> {
            Err("not supported".to_string())
        }
        fn context_limit(&self) -> usize {
            8192
        }
        fn supports_tools(&self) -> bool {
            true
        }
        fn provider_name(&self) -> &str {
            "scripted"
        }
    }

    async fn setup(responses: Vec<&str>) -> (ReasoningLoop, Arc<dyn ActionQueue>, String, TempDir) {
        let dir = TempDir::new().unwrap();
        let queue: Arc<dyn ActionQueue> =
            Arc::new(JsonActionQueue::new(dir.path().join("q.json"), 50, None).unwrap());
        let memory: Arc<dyn Memory> = Arc::new(InMemoryStore::new_mock());
        let guard = Arc::new(Guard::new(GuardConfig::default()));
        let skills = Arc::new(SkillsRegistry::new(Default::default(), None, None));
        let provider: Arc<dyn LLMProvider> = Arc::new(ScriptedProvider {
            responses: std::sync::Mutex::new(responses.into_iter().map(String::from).collect()),
        });

        let id = queue
            .push(PushActionRequest { description: "reply to alice".into(), priority: 5, ..Default::default() })
            .await
            .unwrap();

        let reasoning_loop = ReasoningLoop::new(
            queue.clone(),
            memory,
            guard,
            skills,
            provider,
            None,
            ActionQueueConfig::default(),
            "test-model".into(),
        );
        (reasoning_loop, queue, id, dir)
    }

    #[tokio::test]
    async fn direct_response_continues_and_increments_messages() {
        let (reasoning_loop, queue, id, _dir) = setup(vec!["Hello Alice!"]).await;
        let outcome = reasoning_loop.run_step(&id).await.unwrap();
        assert_eq!(outcome, StepOutcome::Continued);
        let action = queue.get(&id).await.unwrap();
        assert_eq!(action.messages_sent, 1);
        assert_eq!(action.step_count, 1);
    }

    #[tokio::test]
    async fn clarification_marker_moves_to_waiting() {
        let (reasoning_loop, queue, id, _dir) = setup(vec!["[CLARIFY] What city do you mean?"]).await;
        let outcome = reasoning_loop.run_step(&id).await.unwrap();
        assert_eq!(outcome, StepOutcome::Waiting);
        let action = queue.get(&id).await.unwrap();
        assert_eq!(action.status, ActionStatus::Waiting);
        assert_eq!(action.payload_str("lastUserMessageText"), Some("What city do you mean?"));
    }

    #[tokio::test]
    async fn completion_marker_runs_termination_review_and_completes() {
        let (reasoning_loop, queue, id, _dir) = setup(vec!["[DONE] replied to alice", "yes"]).await;
        let outcome = reasoning_loop.run_step(&id).await.unwrap();
        assert_eq!(outcome, StepOutcome::Completed);
        let action = queue.get(&id).await.unwrap();
        assert_eq!(action.status, ActionStatus::Completed);
    }

    #[tokio::test]
    async fn completion_rejected_by_review_stays_in_progress() {
        let (reasoning_loop, queue, id, _dir) =
            setup(vec!["[DONE] replied to alice", "missing: confirm delivery time"]).await;
        let outcome = reasoning_loop.run_step(&id).await.unwrap();
        assert_eq!(outcome, StepOutcome::Continued);
        let action = queue.get(&id).await.unwrap();
        assert_eq!(action.status, ActionStatus::InProgress);
    }

    #[tokio::test]
    async fn hard_step_bound_fails_action() {
        let (reasoning_loop, queue, id, _dir) = setup(vec!["anything"]).await;
        let mut cfg = ActionQueueConfig::default();
        cfg.max_steps_per_action = 0;
        let reasoning_loop = ReasoningLoop::new(
            queue.clone(),
            reasoning_loop.memory.clone(),
            reasoning_loop.guard.clone(),
            reasoning_loop.skills.clone(),
            reasoning_loop.provider.clone(),
            None,
            cfg,
            "test-model".into(),
        );
        let outcome = reasoning_loop.run_step(&id).await.unwrap();
        assert_eq!(outcome, StepOutcome::Failed);
        let action = queue.get(&id).await.unwrap();
        assert_eq!(action.status, ActionStatus::Failed);
    }
}
