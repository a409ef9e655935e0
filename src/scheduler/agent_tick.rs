//! The heartbeat tick (§4.7): a fixed-cadence (default 15 min) pass that
//! drains the action queue one action at a time, synthesises proactive work
//! when idle, and rescans skills.
//!
//! This is a new, Action-Queue-native sibling to [`super::tokio_scheduler`]
//! rather than a rewrite of it: the existing `TokioScheduler` is a
//! Diesel/SQLite-backed cron registry for a different job model (interval/
//! cron schedules with `Heartbeat`/`AgentTurn`/`Notify` payloads) and stays
//! in the tree as teacher reference. `AgentTick` has exactly one job: step
//! the reasoning loop forward.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Utc;

use crate::action_queue::{ActionQueue, ActionStatus, PushActionRequest};
use crate::ai::provider::LLMProvider;
use crate::ai::types::{CompletionRequest, Message};
use crate::config::schema::{ActionQueueConfig, SkillsConfig};
use crate::event_bus::{AppEvent, EventBus};
use crate::memory::traits::Memory;
use crate::skill_registry::SkillsRegistry;

use crate::agent::reasoning_loop::ReasoningLoop;

/// Payload key marking an action as scheduler-synthesised proactive work,
/// so `proactive_backlog_count` can bound it against `autonomyBacklogLimit`
/// without a separate counter to keep consistent across restarts.
const PROACTIVE_FLAG: &str = "proactive";

pub struct AgentTick {
    queue: Arc<dyn ActionQueue>,
    memory: Arc<dyn Memory>,
    skills: Arc<SkillsRegistry>,
    reasoning_loop: Arc<ReasoningLoop>,
    provider: Arc<dyn LLMProvider>,
    bus: Option<Arc<dyn EventBus>>,
    action_cfg: ActionQueueConfig,
    skills_cfg: SkillsConfig,
    plugins_dir: PathBuf,
    declarative_dir: PathBuf,
    model: String,
    consecutive_errors: AtomicU32,
}

impl AgentTick {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<dyn ActionQueue>,
        memory: Arc<dyn Memory>,
        skills: Arc<SkillsRegistry>,
        reasoning_loop: Arc<ReasoningLoop>,
        provider: Arc<dyn LLMProvider>,
        bus: Option<Arc<dyn EventBus>>,
        action_cfg: ActionQueueConfig,
        skills_cfg: SkillsConfig,
        plugins_dir: PathBuf,
        declarative_dir: PathBuf,
        model: String,
    ) -> Self {
        Self {
            queue,
            memory,
            skills,
            reasoning_loop,
            provider,
            bus,
            action_cfg,
            skills_cfg,
            plugins_dir,
            declarative_dir,
            model,
            consecutive_errors: AtomicU32::new(0),
        }
    }

    /// Run one heartbeat tick (§4.7). `heartbeat_due` lets the caller gate
    /// proactive-task synthesis on the configured interval while still
    /// running the stale sweep / one-step drain / plugin rescan every tick.
    pub async fn tick(&self, heartbeat_due: bool) {
        let touched = self
            .queue
            .sweep_stale(
                self.action_cfg.max_action_run_minutes,
                self.action_cfg.max_stale_action_minutes,
            )
            .await;
        if !touched.is_empty() {
            tracing::warn!(count = touched.len(), "swept stale actions");
        }

        let idle = self.queue.get_counts().await.in_progress == 0;

        if idle {
            match self.queue.pop().await {
                Ok(Some(action)) => {
                    self.consecutive_errors.store(0, Ordering::Relaxed);
                    if let Err(e) = self.reasoning_loop.run_step(&action.id).await {
                        tracing::error!(action_id = %action.id, error = %e, "reasoning step failed");
                        self.consecutive_errors.fetch_add(1, Ordering::Relaxed);
                        self.publish(AppEvent::SystemError {
                            message: format!("reasoning step failed for action {}: {e}", action.id),
                        });
                    }
                    if let Some(scope) = action.payload_str("sessionScopeId") {
                        if let Err(e) = self.memory.consolidate(scope).await {
                            tracing::warn!(scope, error = %e, "memory consolidation failed");
                        }
                    }
                }
                Ok(None) if heartbeat_due => {
                    self.synthesize_proactive_task().await;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "failed to pop action");
                }
            }
        }

        if let Err(e) = self.skills.load_plugins(&self.plugins_dir).await {
            tracing::warn!(error = %e, "plugin rescan failed");
        }
        if let Err(e) = self.skills.load_declarative(&self.declarative_dir) {
            tracing::warn!(error = %e, "declarative skill rescan failed");
        }
    }

    /// Count currently non-terminal actions flagged as proactive (§4.7
    /// `autonomyBacklogLimit`), then synthesise one more only if under the
    /// bound. Uses the LLM with recent memory as context, per spec; on
    /// persistent LLM errors during synthesis the caller's next tick simply
    /// tries again, since proactive work is best-effort.
    async fn synthesize_proactive_task(&self) {
        let backlog = self
            .queue
            .get_queue()
            .await
            .iter()
            .filter(|a| !a.status.is_terminal() && a.payload.get(PROACTIVE_FLAG).and_then(|v| v.as_bool()) == Some(true))
            .count();
        if backlog >= self.skills_cfg.autonomy_backlog_limit {
            return;
        }

        let recent = match self.memory.recent(10).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read recent memory for proactive synthesis");
                return;
            }
        };
        let context = recent.iter().map(|e| e.content.clone()).collect::<Vec<_>>().join("\n");

        let prompt = format!(
            "Recent activity:\n{context}\n\nIs there a single concrete, useful proactive task worth \
             doing right now without being asked? If yes, reply with just the one-sentence task \
             description. If no, reply with exactly \"none\"."
        );
        let request = CompletionRequest::new(self.model.clone(), vec![Message::user(prompt)]);
        let response = match self.provider.complete(request).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "proactive synthesis LLM call failed");
                return;
            }
        };
        let proposal = response.content.trim();
        if proposal.is_empty() || proposal.eq_ignore_ascii_case("none") {
            return;
        }

        let mut payload = std::collections::HashMap::new();
        payload.insert(PROACTIVE_FLAG.to_string(), serde_json::Value::Bool(true));
        let id = match self
            .queue
            .push(PushActionRequest {
                description: proposal.to_string(),
                priority: 1,
                payload,
                parent_action_id: None,
            })
            .await
        {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(error = %e, "failed to enqueue proactive task");
                return;
            }
        };
        tracing::info!(action_id = %id, "synthesised proactive task");
    }

    fn publish(&self, event: AppEvent) {
        if let Some(bus) = &self.bus {
            let _ = bus.publish(event);
        }
    }
}

/// Whether an action's status counts as "no action currently in progress"
/// for §4.7's one-action-at-a-time gate.
pub fn is_idle(status: ActionStatus) -> bool {
    !matches!(status, ActionStatus::InProgress)
}

/// True once `Utc::now()` has advanced past `last_heartbeat_at +
/// heartbeat_interval_secs`.
pub fn heartbeat_due(last_heartbeat_at: chrono::DateTime<Utc>, interval_secs: u64) -> bool {
    (Utc::now() - last_heartbeat_at).num_seconds() >= interval_secs as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action_queue::JsonActionQueue;
    use crate::ai::types::CompletionResponse;
    use crate::config::schema::GuardConfig;
    use crate::guard::Guard;
    use crate::memory::store::InMemoryStore;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct StubProvider {
        reply: String,
    }

    #[async_trait]
    impl LLMProvider for StubProvider {
        async fn complete(&self, _request: CompletionRequest) -> crate::ai::provider::Result<CompletionResponse> {
            Ok(CompletionResponse {
                content: self.reply.clone(),
                model: "stub".into(),
                usage: None,
                finish_reason: None,
            })
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
            "stub"
        }
    }

    fn setup(dir: &TempDir, reply: &str) -> AgentTick {
        let queue: Arc<dyn ActionQueue> =
            Arc::new(JsonActionQueue::new(dir.path().join("q.json"), 50, None).unwrap());
        let memory: Arc<dyn Memory> = Arc::new(InMemoryStore::new_mock());
        let guard = Arc::new(Guard::new(GuardConfig::default()));
        let skills = Arc::new(SkillsRegistry::new(SkillsConfig::default(), None, None));
        let provider: Arc<dyn LLMProvider> = Arc::new(StubProvider { reply: reply.to_string() });
        let reasoning_loop = Arc::new(ReasoningLoop::new(
            queue.clone(),
            memory.clone(),
            guard,
            skills.clone(),
            provider.clone(),
            None,
            ActionQueueConfig::default(),
            "test-model".into(),
        ));
        AgentTick::new(
            queue,
            memory,
            skills,
            reasoning_loop,
            provider,
            None,
            ActionQueueConfig::default(),
            SkillsConfig::default(),
            dir.path().join("plugins"),
            dir.path().join("plugins/skills"),
            "test-model".into(),
        )
    }

    #[tokio::test]
    async fn idle_tick_with_heartbeat_due_synthesises_task() {
        let dir = TempDir::new().unwrap();
        let tick = setup(&dir, "water the office plants before they wilt");
        tick.tick(true).await;
        let queued = tick.queue.get_queue().await;
        assert_eq!(queued.len(), 1);
        assert!(queued[0].payload.get(PROACTIVE_FLAG).and_then(|v| v.as_bool()) == Some(true));
    }

    #[tokio::test]
    async fn idle_tick_with_none_reply_synthesises_nothing() {
        let dir = TempDir::new().unwrap();
        let tick = setup(&dir, "none");
        tick.tick(true).await;
        assert!(tick.queue.get_queue().await.is_empty());
    }

    #[tokio::test]
    async fn backlog_at_limit_blocks_further_synthesis() {
        let dir = TempDir::new().unwrap();
        let tick = setup(&dir, "do something useful");
        for _ in 0..tick.skills_cfg.autonomy_backlog_limit {
            let mut payload = std::collections::HashMap::new();
            payload.insert(PROACTIVE_FLAG.to_string(), serde_json::Value::Bool(true));
            tick.queue
                .push(PushActionRequest { description: "existing".into(), priority: 1, payload, parent_action_id: None })
                .await
                .unwrap();
        }
        tick.synthesize_proactive_task().await;
        let queued = tick.queue.get_queue().await;
        assert_eq!(queued.len(), tick.skills_cfg.autonomy_backlog_limit);
    }

    #[tokio::test]
    async fn pending_action_runs_one_reasoning_step() {
        let dir = TempDir::new().unwrap();
        let tick = setup(&dir, "Hello!");
        let id = tick
            .queue
            .push(PushActionRequest { description: "reply to bob".into(), priority: 5, ..Default::default() })
            .await
            .unwrap();
        tick.tick(false).await;
        let action = tick.queue.get(&id).await.unwrap();
        assert_eq!(action.step_count, 1);
    }

    #[test]
    fn heartbeat_due_detects_elapsed_interval() {
        let past = Utc::now() - chrono::Duration::seconds(100);
        assert!(heartbeat_due(past, 60));
        assert!(!heartbeat_due(Utc::now(), 60));
    }
}
