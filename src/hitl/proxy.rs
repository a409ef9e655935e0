//! Agentic HITL Proxy (§3, §4.8): watches `waiting` actions and, after a
//! delay, decides on the user's behalf whether enough context exists to
//! synthesise a response — or whether a real human still needs to weigh in.
//!
//! Evaluation is a timer-driven pull, not a spawned-per-action task: the
//! scheduler tick calls [`HitlProxy::due_evaluations`] and runs
//! [`HitlProxy::evaluate`] for each due id, mirroring how
//! [`crate::scheduler::agent_tick::AgentTick`] drives the reasoning loop one
//! step at a time rather than holding a `tokio::spawn` per action.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::action_queue::{Action, ActionQueue, ActionStatus};
use crate::ai::provider::LLMProvider;
use crate::ai::types::{CompletionRequest, Message};
use crate::config::schema::HitlConfig;
use crate::error::{CoreError, CoreResult};
use crate::event_bus::{AppEvent, EventBus};
use crate::guard::Guard;
use crate::identity::IdentityLoader;
use crate::memory::traits::{Memory, MemoryEntry, MemoryKind, meta_keys};
use crate::message_bus::dispatch::payload_keys;

use super::types::{AbortReason, HitlActionState, HitlJudgement, HitlOutcome, StuckSignal};

/// Metadata tag applied to memory entries the proxy writes, so the
/// reasoning loop's next prompt can distinguish a synthesised HITL reply
/// from a genuine user or assistant message.
pub const HITL_TAG_APPLIED: &str = "hitl-synthetic-response";
pub const HITL_TAG_SAFE_DEFAULT: &str = "hitl-direction-guidance";
pub const HITL_TAG_STUCK: &str = "hitl-stuck-guidance";

pub struct HitlProxy {
    queue: Arc<dyn ActionQueue>,
    memory: Arc<dyn Memory>,
    guard: Arc<Guard>,
    identity: Arc<IdentityLoader>,
    provider: Arc<dyn LLMProvider>,
    bus: Option<Arc<dyn EventBus>>,
    cfg: HitlConfig,
    model: String,
    state: RwLock<HashMap<String, HitlActionState>>,
    activity: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl HitlProxy {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<dyn ActionQueue>,
        memory: Arc<dyn Memory>,
        guard: Arc<Guard>,
        identity: Arc<IdentityLoader>,
        provider: Arc<dyn LLMProvider>,
        bus: Option<Arc<dyn EventBus>>,
        cfg: HitlConfig,
        model: String,
    ) -> Self {
        Self {
            queue,
            memory,
            guard,
            identity,
            provider,
            bus,
            cfg,
            model,
            state: RwLock::new(HashMap::new()),
            activity: RwLock::new(HashMap::new()),
        }
    }

    /// Record real user activity on a channel (subscribed to
    /// [`AppEvent::UserActivity`]), used by the activity-cooldown check.
    pub fn record_activity(&self, source: &str, source_id: &str) {
        self.activity
            .write()
            .expect("hitl activity lock poisoned")
            .insert(activity_key(source, source_id), Utc::now());
    }

    /// Schedule the first evaluation pass for an action that just entered
    /// `waiting` (§4.8: fires after `responseDelay` seconds).
    pub fn on_waiting(&self, action_id: &str) {
        let mut state = self.state.write().expect("hitl state lock poisoned");
        state.insert(
            action_id.to_string(),
            HitlActionState {
                attempts: 0,
                next_eval_at: Some(Utc::now() + chrono::Duration::seconds(self.cfg.response_delay_secs as i64)),
                last_intervention_at: None,
                interventions_applied: 0,
                last_stuck_step_marker: None,
            },
        );
    }

    /// Action ids whose scheduled evaluation time has passed.
    pub fn due_evaluations(&self) -> Vec<String> {
        let now = Utc::now();
        self.state
            .read()
            .expect("hitl state lock poisoned")
            .iter()
            .filter(|(_, s)| s.next_eval_at.is_some_and(|t| t <= now))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Run one evaluation pass against `action_id` (§4.8 steps a-h).
    pub async fn evaluate(&self, action_id: &str) -> CoreResult<HitlOutcome> {
        let Some(action) = self.queue.get(action_id).await else {
            self.forget(action_id);
            return Ok(HitlOutcome::Aborted { reason: AbortReason::ActionNoLongerWaiting, rescheduled: false });
        };
        if action.status != ActionStatus::Waiting {
            self.forget(action_id);
            return Ok(HitlOutcome::Aborted { reason: AbortReason::ActionNoLongerWaiting, rescheduled: false });
        }

        // (a) abort if the real user has been active on the same channel recently.
        if let (Some(source), Some(source_id)) = (action.payload_str(payload_keys::SOURCE), action.payload_str(payload_keys::SOURCE_ID)) {
            if let Some(last) = self.activity.read().expect("hitl activity lock poisoned").get(&activity_key(source, source_id)) {
                if (Utc::now() - *last).num_seconds() < self.cfg.activity_cooldown_secs as i64 {
                    return Ok(self.reschedule(action_id, AbortReason::RecentUserActivity));
                }
            }
        }

        // (b) abort if a post-intervention cooldown is still running.
        {
            let state = self.state.read().expect("hitl state lock poisoned");
            if let Some(s) = state.get(action_id) {
                if let Some(last) = s.last_intervention_at {
                    if (Utc::now() - last).num_seconds() < self.cfg.post_intervention_cooldown_secs as i64 {
                        drop(state);
                        return Ok(self.reschedule(action_id, AbortReason::PostInterventionCooldown));
                    }
                }
                if s.interventions_applied >= self.cfg.max_interventions_per_action {
                    drop(state);
                    self.forget(action_id);
                    return Ok(HitlOutcome::Aborted { reason: AbortReason::MaxInterventionsReached, rescheduled: false });
                }
            }
        }

        // (d) build the context bundle.
        let bundle = self.build_context_bundle(&action).await?;

        // (e) call the LLM for a strict-JSON judgement.
        let judgement = self.request_judgement(&action, &bundle).await?;

        // (f) re-verify the action is still waiting.
        let Some(current) = self.queue.get(action_id).await else {
            self.forget(action_id);
            return Ok(HitlOutcome::Aborted { reason: AbortReason::ActionNoLongerWaiting, rescheduled: false });
        };
        if current.status != ActionStatus::Waiting {
            self.forget(action_id);
            return Ok(HitlOutcome::Aborted { reason: AbortReason::ActionNoLongerWaiting, rescheduled: false });
        }

        // (g) apply if confident and unrestricted.
        if judgement.confidence >= self.cfg.confidence_threshold && !judgement.restricted {
            self.apply_response(action_id, &judgement.response, HITL_TAG_APPLIED, judgement.confidence)
                .await?;
            return Ok(HitlOutcome::Applied { confidence: judgement.confidence });
        }

        // (h) otherwise fall back to a safe default, if one was offered.
        if let Some(safe_default) = &judgement.safe_default {
            self.apply_response(action_id, safe_default, HITL_TAG_SAFE_DEFAULT, judgement.confidence)
                .await?;
            return Ok(HitlOutcome::AppliedSafeDefault);
        }

        Ok(self.reschedule(action_id, AbortReason::BelowConfidenceNoSafeDefault))
    }

    /// Proactive stuck detection for in-progress actions (§4.8): runs once
    /// an action has crossed `stuckCheckStepThreshold` steps, and again only
    /// after the action advances `stuckCheckStepThreshold` further steps so
    /// the same window of steps is never flagged twice.
    pub async fn check_stuck(&self, action: &Action) -> CoreResult<Vec<StuckSignal>> {
        if action.status != ActionStatus::InProgress || action.step_count < self.cfg.stuck_check_step_threshold {
            return Ok(Vec::new());
        }
        {
            let state = self.state.read().expect("hitl state lock poisoned");
            if let Some(marker) = state.get(&action.id).and_then(|s| s.last_stuck_step_marker) {
                if action.step_count < marker + self.cfg.stuck_check_step_threshold {
                    return Ok(Vec::new());
                }
            }
        }

        let history = self.memory.by_action(&action.id).await.map_err(CoreError::from)?;
        let recent: Vec<&MemoryEntry> = history.iter().rev().take(6).collect();

        let mut signals = Vec::new();

        let failures = recent
            .iter()
            .filter(|e| e.metadata.get("toolSuccess").and_then(|v| v.as_bool()) == Some(false))
            .count();
        if failures >= 3 {
            signals.push(StuckSignal::RepeatedFailures);
        }

        let mut tool_counts: HashMap<&str, u32> = HashMap::new();
        for e in &recent {
            if let Some(name) = e.metadata.get(meta_keys::TOOL_NAME).and_then(|v| v.as_str()) {
                *tool_counts.entry(name).or_insert(0) += 1;
            }
        }
        if tool_counts.values().any(|&c| c >= 3) {
            signals.push(StuckSignal::RepeatedTool);
        }

        let steps_since_user_comm = history
            .iter()
            .rev()
            .take_while(|e| e.metadata.get(meta_keys::ROLE).and_then(|v| v.as_str()) != Some("user"))
            .count();
        if steps_since_user_comm >= 5 {
            signals.push(StuckSignal::NoUserCommunication);
        }

        let planning_only = recent
            .iter()
            .filter(|e| e.metadata.get("decisionKind").and_then(|v| v.as_str()) == Some("response"))
            .count();
        if planning_only >= 3 {
            signals.push(StuckSignal::PlanningOnlyLoop);
        }

        if !signals.is_empty() {
            self.inject_stuck_guidance(action, &signals).await?;
            let mut state = self.state.write().expect("hitl state lock poisoned");
            state.entry(action.id.clone()).or_default().last_stuck_step_marker = Some(action.step_count);
        }

        Ok(signals)
    }

    async fn inject_stuck_guidance(&self, action: &Action, signals: &[StuckSignal]) -> CoreResult<()> {
        let description = signals
            .iter()
            .map(|s| match s {
                StuckSignal::RepeatedFailures => "repeated tool failures",
                StuckSignal::RepeatedTool => "the same tool called repeatedly",
                StuckSignal::NoUserCommunication => "no user communication in a while",
                StuckSignal::PlanningOnlyLoop => "several planning-only turns with no action",
            })
            .collect::<Vec<_>>()
            .join(", ");
        let content = format!(
            "This task looks stuck ({description}). Consider a different approach, asking the \
             user a clarifying question, or escalating."
        );
        let entry = MemoryEntry::new(MemoryKind::Short, content)
            .with_meta(meta_keys::ACTION_ID, action.id.clone())
            .with_meta(meta_keys::ROLE, "system")
            .with_meta("tag", HITL_TAG_STUCK)
            .with_meta("stepMarker", action.step_count);
        self.memory.save(entry).await.map_err(CoreError::from)?;
        self.publish(AppEvent::AgenticUserIntervention {
            action_id: action.id.clone(),
            kind: HITL_TAG_STUCK.to_string(),
        });
        Ok(())
    }

    async fn apply_response(&self, action_id: &str, response: &str, tag: &str, confidence: u8) -> CoreResult<()> {
        let entry = MemoryEntry::new(MemoryKind::Short, response.to_string())
            .with_meta(meta_keys::ACTION_ID, action_id)
            .with_meta(meta_keys::ROLE, "user")
            .with_meta(meta_keys::AGENTIC_USER, true)
            .with_meta("tag", tag)
            .with_meta("confidence", confidence as i64);
        self.memory.save(entry).await.map_err(CoreError::from)?;

        let mut patch = HashMap::new();
        patch.insert(
            payload_keys::LAST_USER_MESSAGE_TEXT.to_string(),
            serde_json::Value::String(response.to_string()),
        );
        self.queue.update_payload(action_id, patch).await?;
        self.queue
            .update_status(action_id, ActionStatus::Pending, Some(tag))
            .await?;

        {
            let mut state = self.state.write().expect("hitl state lock poisoned");
            let s = state.entry(action_id.to_string()).or_default();
            s.last_intervention_at = Some(Utc::now());
            s.interventions_applied += 1;
            s.next_eval_at = None;
        }

        self.publish(AppEvent::AgenticUserIntervention { action_id: action_id.to_string(), kind: tag.to_string() });
        Ok(())
    }

    /// (c) exponential backoff between re-evaluations of the same action:
    /// `backoffBaseSecs * 2^attempts`, abandoning after `backoffMaxAttempts`.
    fn reschedule(&self, action_id: &str, reason: AbortReason) -> HitlOutcome {
        let mut state = self.state.write().expect("hitl state lock poisoned");
        let s = state.entry(action_id.to_string()).or_default();
        if s.attempts + 1 >= self.cfg.backoff_max_attempts {
            s.next_eval_at = None;
            return HitlOutcome::Aborted { reason, rescheduled: false };
        }
        s.attempts += 1;
        let delay = self.cfg.backoff_base_secs.saturating_mul(1 << s.attempts.min(20));
        s.next_eval_at = Some(Utc::now() + chrono::Duration::seconds(delay as i64));
        HitlOutcome::Aborted { reason, rescheduled: true }
    }

    fn forget(&self, action_id: &str) {
        self.state.write().expect("hitl state lock poisoned").remove(action_id);
    }

    async fn build_context_bundle(&self, action: &Action) -> CoreResult<String> {
        let mut out = String::new();
        out.push_str(&self.identity.build_system_prompt());
        out.push_str("\n\n---\n\n");

        if let Some(user_id) = action.payload_str(payload_keys::USER_ID) {
            if let Ok(Some(profile)) = self.memory.contact_profile(user_id).await {
                out.push_str(&format!("# Contact profile\n{profile}\n\n"));
            }
        }

        if let Ok(episodic) = self.memory.search(MemoryKind::Episodic, None).await {
            if !episodic.is_empty() {
                out.push_str("# Recent learnings\n");
                for e in episodic.iter().rev().take(5) {
                    out.push_str(&format!("- {}\n", e.content));
                }
                out.push('\n');
            }
        }

        let today = Utc::now().format("%Y-%m-%d").to_string();
        if let Ok(Some(journal)) = self.memory.recall_daily(&today).await {
            out.push_str(&format!("# Journal (today)\n{journal}\n\n"));
        }

        out.push_str(&format!("# Action\n{}\n\n", action.description));

        if let Ok(history) = self.memory.by_action(&action.id).await {
            out.push_str("# Step history\n");
            for e in history.iter().rev().take(10) {
                out.push_str(&format!("- {}\n", e.content));
            }
            out.push('\n');
        }

        if let Ok(recall) = self.memory.semantic_search(&action.description, 5).await {
            if !recall.is_empty() {
                out.push_str("# Related memory\n");
                for e in &recall {
                    out.push_str(&format!("- {}\n", e.content));
                }
            }
        }

        Ok(out)
    }

    async fn request_judgement(&self, action: &Action, bundle: &str) -> CoreResult<HitlJudgement> {
        let system = format!(
            "{bundle}\n\nYou are deciding whether to answer on the user's behalf while they are \
             away. Respond with strict JSON only, matching exactly this shape: \
             {{\"confidence\": <0-100 integer>, \"reasoning\": \"...\", \"response\": \"...\", \
             \"restricted\": <bool>, \"restrictedReason\": <string or null>, \"safeDefault\": \
             <string or null>}}. Set restricted=true for anything requiring the real user's \
             judgement (financial, medical, legal, relationship-sensitive, or irreversible \
             actions)."
        );
        let request = CompletionRequest::new(
            self.model.clone(),
            vec![Message::system(system), Message::user(action.description.clone())],
        );
        let response = self.provider.complete(request).await.map_err(CoreError::from)?;
        serde_json::from_str(response.content.trim())
            .map_err(|e| CoreError::ValidationError(format!("malformed HITL judgement JSON: {e}")))
    }

    fn publish(&self, event: AppEvent) {
        if let Some(bus) = &self.bus {
            let _ = bus.publish(event);
        }
    }
}

fn activity_key(source: &str, source_id: &str) -> String {
    format!("{source}:{source_id}")
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

    struct JsonProvider {
        reply: String,
    }

    #[async_trait]
    impl LLMProvider for JsonProvider {
        async fn complete(&self, _request: CompletionRequest) -> crate::ai::provider::Result<CompletionResponse> {
            Ok(CompletionResponse { content: self.reply.clone(), model: "test".into(), usage: None, finish_reason: None })
        }
        async fn stream(&self, _request: CompletionRequest) -> crate::ai::provider::Result<crate::ai::provider::StreamResponse> {
            Err("not supported".to_string())
        }
        fn context_limit(&self) -> usize {
            8192
        }
        fn supports_tools(&self) -> bool {
            false
        }
        fn provider_name(&self) -> &str {
            "json-test"
        }
    }

    fn waiting_action_payload() -> HashMap<String, serde_json::Value> {
        let mut payload = HashMap::new();
        payload.insert(payload_keys::SOURCE.to_string(), serde_json::Value::String("telegram".into()));
        payload.insert(payload_keys::SOURCE_ID.to_string(), serde_json::Value::String("chat-1".into()));
        payload.insert(payload_keys::USER_ID.to_string(), serde_json::Value::String("user-1".into()));
        payload
    }

    async fn setup(dir: &TempDir, reply: &str) -> (HitlProxy, Arc<dyn ActionQueue>, String) {
        let queue: Arc<dyn ActionQueue> = Arc::new(JsonActionQueue::new(dir.path().join("q.json"), 50, None).unwrap());
        let memory: Arc<dyn Memory> = Arc::new(InMemoryStore::new_mock());
        let guard = Arc::new(Guard::new(GuardConfig::default()));
        let identity = IdentityLoader::new(dir.path().join("identity")).unwrap();
        let provider: Arc<dyn LLMProvider> = Arc::new(JsonProvider { reply: reply.to_string() });

        let id = queue
            .push(PushActionRequest { description: "reply to bob".into(), priority: 5, payload: waiting_action_payload(), parent_action_id: None })
            .await
            .unwrap();
        queue.pop().await.unwrap();
        queue.update_status(&id, ActionStatus::Waiting, Some("clarification requested")).await.unwrap();

        let proxy = HitlProxy::new(queue.clone(), memory, guard, identity, provider, None, HitlConfig::default(), "test-model".into());
        proxy.on_waiting(&id);
        (proxy, queue, id)
    }

    #[tokio::test]
    async fn confident_unrestricted_judgement_applies_and_moves_to_pending() {
        let dir = TempDir::new().unwrap();
        let (proxy, queue, id) = setup(
            &dir,
            r#"{"confidence": 90, "reasoning": "clear context", "response": "Sure, 3pm works", "restricted": false, "restrictedReason": null, "safeDefault": null}"#,
        )
        .await;
        let outcome = proxy.evaluate(&id).await.unwrap();
        assert!(matches!(outcome, HitlOutcome::Applied { confidence: 90 }));
        let action = queue.get(&id).await.unwrap();
        assert_eq!(action.status, ActionStatus::Pending);
    }

    #[tokio::test]
    async fn low_confidence_with_safe_default_applies_it() {
        let dir = TempDir::new().unwrap();
        let (proxy, queue, id) = setup(
            &dir,
            r#"{"confidence": 20, "reasoning": "unclear", "response": "", "restricted": false, "restrictedReason": null, "safeDefault": "I'll get back to you shortly."}"#,
        )
        .await;
        let outcome = proxy.evaluate(&id).await.unwrap();
        assert!(matches!(outcome, HitlOutcome::AppliedSafeDefault));
        let action = queue.get(&id).await.unwrap();
        assert_eq!(action.status, ActionStatus::Pending);
    }

    #[tokio::test]
    async fn low_confidence_without_safe_default_reschedules() {
        let dir = TempDir::new().unwrap();
        let (proxy, queue, id) = setup(
            &dir,
            r#"{"confidence": 10, "reasoning": "too risky", "response": "", "restricted": true, "restrictedReason": "medical", "safeDefault": null}"#,
        )
        .await;
        let outcome = proxy.evaluate(&id).await.unwrap();
        assert!(matches!(outcome, HitlOutcome::Aborted { reason: AbortReason::BelowConfidenceNoSafeDefault, rescheduled: true }));
        let action = queue.get(&id).await.unwrap();
        assert_eq!(action.status, ActionStatus::Waiting);
    }

    #[tokio::test]
    async fn recent_user_activity_aborts_before_llm_call() {
        let dir = TempDir::new().unwrap();
        let (proxy, queue, id) = setup(&dir, "not valid json").await;
        proxy.record_activity("telegram", "chat-1");
        let outcome = proxy.evaluate(&id).await.unwrap();
        assert!(matches!(outcome, HitlOutcome::Aborted { reason: AbortReason::RecentUserActivity, .. }));
        let action = queue.get(&id).await.unwrap();
        assert_eq!(action.status, ActionStatus::Waiting);
    }

    #[tokio::test]
    async fn stuck_detection_injects_guidance_on_repeated_tool_failures() {
        let dir = TempDir::new().unwrap();
        let queue: Arc<dyn ActionQueue> = Arc::new(JsonActionQueue::new(dir.path().join("q.json"), 50, None).unwrap());
        let memory: Arc<dyn Memory> = Arc::new(InMemoryStore::new_mock());
        let guard = Arc::new(Guard::new(GuardConfig::default()));
        let identity = IdentityLoader::new(dir.path().join("identity")).unwrap();
        let provider: Arc<dyn LLMProvider> = Arc::new(JsonProvider { reply: String::new() });
        let proxy = HitlProxy::new(queue.clone(), memory.clone(), guard, identity, provider, None, HitlConfig::default(), "test-model".into());

        let id = queue
            .push(PushActionRequest { description: "fix the build".into(), priority: 5, ..Default::default() })
            .await
            .unwrap();
        let mut action = queue.pop().await.unwrap();
        action.step_count = 10;
        queue.increment_counters(&id, 10, 0).await.unwrap();

        for _ in 0..3 {
            let entry = MemoryEntry::new(MemoryKind::Short, "tool failed".to_string())
                .with_meta(meta_keys::ACTION_ID, id.clone())
                .with_meta(meta_keys::TOOL_NAME, "run_command")
                .with_meta("toolSuccess", false);
            memory.save(entry).await.unwrap();
        }

        let action = queue.get(&id).await.unwrap();
        let signals = proxy.check_stuck(&action).await.unwrap();
        assert!(signals.contains(&StuckSignal::RepeatedFailures));
        assert!(signals.contains(&StuckSignal::RepeatedTool));
    }
}
