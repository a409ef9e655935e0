//! Sub-agent lifecycle and delegated-task routing (§4.9).
//!
//! The orchestrator manages named, role-tagged sub-agent instances and
//! delegates work to them by pushing ordinary actions onto the
//! [`ActionQueue`] with `parent_action_id` set, so the reasoning loop and
//! guard reason about delegated completion the same way they reason about
//! any other action — there is no separate sub-agent execution path.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::RwLock;

use crate::action_queue::{ActionQueue, PushActionRequest};
use crate::error::{CoreError, CoreResult};
use crate::event_bus::{AppEvent, EventBus};

use super::AgentId;

/// How a failed delegated task should be handled once it surfaces.
///
/// Kept from the teacher's parallel-execution config: sub-agent fan-out
/// still wants a `continue`/`fail-fast`/`ignore` knob even though
/// individual tasks are now actions rather than spawned tokio tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStrategy {
    Continue,
    FailFast,
    Ignore,
}

impl Default for FailureStrategy {
    fn default() -> Self {
        Self::Continue
    }
}

/// A named, role-tagged sub-agent instance managed by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubAgent {
    pub id: AgentId,
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub spawned_at: DateTime<Utc>,
    pub terminated: bool,
}

/// A task delegated to the orchestrator, tracked until it completes or fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegatedTask {
    pub task_id: String,
    pub description: String,
    pub priority: i32,
    pub target_agent_id: Option<AgentId>,
    pub action_id: Option<String>,
    pub distributed: bool,
    pub created_at: DateTime<Utc>,
}

/// Result recorded when a delegated task is completed or failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutcome {
    pub task_id: String,
    pub success: bool,
    pub result: Option<String>,
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// Manages sub-agents as named, role-tagged instances and routes delegated
/// work onto the action queue. Contract per §4.9: `spawn`, `list`,
/// `terminate`, `delegate`, `distribute`, `send`, `broadcast`, `complete`,
/// `fail`.
pub struct Orchestrator {
    queue: Arc<dyn ActionQueue>,
    bus: Option<Arc<dyn EventBus>>,
    on_fail: FailureStrategy,
    agents: RwLock<HashMap<String, SubAgent>>,
    pending_tasks: RwLock<HashMap<String, DelegatedTask>>,
}

impl Orchestrator {
    pub fn new(queue: Arc<dyn ActionQueue>, bus: Option<Arc<dyn EventBus>>) -> Self {
        Self {
            queue,
            bus,
            on_fail: FailureStrategy::default(),
            agents: RwLock::new(HashMap::new()),
            pending_tasks: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_failure_strategy(mut self, strategy: FailureStrategy) -> Self {
        self.on_fail = strategy;
        self
    }

    fn publish(&self, event: AppEvent) {
        if let Some(bus) = &self.bus {
            let _ = bus.publish(event);
        }
    }

    /// Register a new named sub-agent. Returns its generated id.
    #[tracing::instrument(skip(self), fields(name = %name, role = %role))]
    pub async fn spawn(
        &self,
        name: &str,
        role: &str,
        caps: Option<Vec<String>>,
    ) -> CoreResult<AgentId> {
        let id = AgentId::new(uuid::Uuid::new_v4().to_string());
        let agent = SubAgent {
            id: id.clone(),
            name: name.to_string(),
            role: role.to_string(),
            capabilities: caps.unwrap_or_default(),
            spawned_at: Utc::now(),
            terminated: false,
        };
        self.agents.write().await.insert(id.as_str().to_string(), agent);
        tracing::info!(agent_id = %id, "sub-agent spawned");
        Ok(id)
    }

    /// List all sub-agents that have not been terminated.
    pub async fn list(&self) -> Vec<SubAgent> {
        self.agents
            .read()
            .await
            .values()
            .filter(|a| !a.terminated)
            .cloned()
            .collect()
    }

    /// Mark a sub-agent as terminated. Idempotent.
    pub async fn terminate(&self, id: &str) -> CoreResult<()> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .get_mut(id)
            .ok_or_else(|| CoreError::ResourceMissing(format!("sub-agent {id}")))?;
        agent.terminated = true;
        Ok(())
    }

    /// Delegate a task: pushes a new action onto the queue with
    /// `parent_action_id` unset but a `delegatedTo` payload entry, if a
    /// target agent was named. Returns the generated task id.
    #[tracing::instrument(skip(self, description), fields(priority, target = ?target_id))]
    pub async fn delegate(
        &self,
        description: &str,
        priority: i32,
        target_id: Option<&str>,
    ) -> CoreResult<String> {
        let task_id = uuid::Uuid::new_v4().to_string();
        let mut payload: HashMap<String, Value> = HashMap::new();
        payload.insert("delegatedTaskId".to_string(), json!(task_id));
        if let Some(target) = target_id {
            payload.insert("delegatedTo".to_string(), json!(target));
        }

        let action_id = self
            .queue
            .push(PushActionRequest {
                description: description.to_string(),
                priority,
                payload,
                parent_action_id: None,
            })
            .await?;

        let task = DelegatedTask {
            task_id: task_id.clone(),
            description: description.to_string(),
            priority,
            target_agent_id: target_id.map(AgentId::new),
            action_id: Some(action_id),
            distributed: false,
            created_at: Utc::now(),
        };
        self.pending_tasks
            .write()
            .await
            .insert(task_id.clone(), task);
        Ok(task_id)
    }

    /// Distribute all pending, undistributed delegated tasks: currently a
    /// no-op beyond marking them distributed, since pushing onto the action
    /// queue already makes a task eligible for the next `pop()` — kept as a
    /// distinct operation so callers can batch delegate-then-distribute the
    /// way the external contract describes it.
    pub async fn distribute(&self) -> CoreResult<usize> {
        let mut tasks = self.pending_tasks.write().await;
        let mut count = 0;
        for task in tasks.values_mut() {
            if !task.distributed {
                task.distributed = true;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Send a direct message to a named sub-agent by pushing a
    /// high-priority action addressed to it via payload.
    pub async fn send(
        &self,
        agent_id: &str,
        message: &str,
        message_type: Option<&str>,
    ) -> CoreResult<String> {
        {
            let agents = self.agents.read().await;
            if !agents.contains_key(agent_id) {
                return Err(CoreError::ResourceMissing(format!("sub-agent {agent_id}")));
            }
        }
        let mut payload: HashMap<String, Value> = HashMap::new();
        payload.insert("addressedTo".to_string(), json!(agent_id));
        payload.insert(
            "messageType".to_string(),
            json!(message_type.unwrap_or("info")),
        );
        self.queue
            .push(PushActionRequest {
                description: message.to_string(),
                priority: 5,
                payload,
                parent_action_id: None,
            })
            .await
    }

    /// Broadcast a message to every non-terminated sub-agent, one action
    /// per recipient.
    pub async fn broadcast(&self, message: &str) -> CoreResult<Vec<String>> {
        let recipients: Vec<String> = self.list().await.into_iter().map(|a| a.id.0).collect();
        let mut ids = Vec::with_capacity(recipients.len());
        for agent_id in recipients {
            ids.push(self.send(&agent_id, message, Some("broadcast")).await?);
        }
        Ok(ids)
    }

    /// Record a delegated task as completed and update the backing action.
    pub async fn complete(&self, task_id: &str, result: Option<&str>) -> CoreResult<TaskOutcome> {
        let action_id = self.task_action_id(task_id).await?;
        self.queue
            .update_status(&action_id, crate::action_queue::ActionStatus::Completed, result)
            .await?;
        self.pending_tasks.write().await.remove(task_id);
        let outcome = TaskOutcome {
            task_id: task_id.to_string(),
            success: true,
            result: result.map(str::to_string),
            error: None,
            completed_at: Utc::now(),
        };
        self.publish(AppEvent::AgentActionCompleted {
            action_id,
            summary: result.unwrap_or("completed").to_string(),
        });
        Ok(outcome)
    }

    /// Record a delegated task as failed and update the backing action,
    /// honoring the orchestrator's configured failure strategy for whether
    /// sibling tasks should be cancelled.
    pub async fn fail(&self, task_id: &str, error: &str) -> CoreResult<TaskOutcome> {
        let action_id = self.task_action_id(task_id).await?;
        self.queue
            .update_status(&action_id, crate::action_queue::ActionStatus::Failed, Some(error))
            .await?;
        self.pending_tasks.write().await.remove(task_id);

        if self.on_fail == FailureStrategy::FailFast {
            for task in self.pending_tasks.read().await.values() {
                if let Some(id) = &task.action_id {
                    let _ = self
                        .queue
                        .cancel(id, "sibling delegated task failed (fail-fast)")
                        .await;
                }
            }
        }

        Ok(TaskOutcome {
            task_id: task_id.to_string(),
            success: false,
            result: None,
            error: Some(error.to_string()),
            completed_at: Utc::now(),
        })
    }

    async fn task_action_id(&self, task_id: &str) -> CoreResult<String> {
        self.pending_tasks
            .read()
            .await
            .get(task_id)
            .and_then(|t| t.action_id.clone())
            .ok_or_else(|| CoreError::ResourceMissing(format!("delegated task {task_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action_queue::JsonActionQueue;
    use tempfile::tempdir;

    fn queue() -> Arc<dyn ActionQueue> {
        let dir = tempdir().unwrap();
        Arc::new(JsonActionQueue::new(dir.path().join("actions.json"), 1000, None).unwrap())
    }

    #[tokio::test]
    async fn spawn_list_terminate_roundtrip() {
        let orch = Orchestrator::new(queue(), None);
        let id = orch.spawn("researcher", "research", None).await.unwrap();
        assert_eq!(orch.list().await.len(), 1);
        orch.terminate(id.as_str()).await.unwrap();
        assert_eq!(orch.list().await.len(), 0);
    }

    #[tokio::test]
    async fn delegate_then_complete_marks_action_done() {
        let q = queue();
        let orch = Orchestrator::new(Arc::clone(&q), None);
        let task_id = orch.delegate("research topic A", 5, None).await.unwrap();
        orch.distribute().await.unwrap();
        let outcome = orch.complete(&task_id, Some("done")).await.unwrap();
        assert!(outcome.success);

        let actions = q.get_queue().await;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].status, crate::action_queue::ActionStatus::Completed);
    }

    #[tokio::test]
    async fn fail_fast_cancels_siblings() {
        let q = queue();
        let orch = Orchestrator::new(Arc::clone(&q), None)
            .with_failure_strategy(FailureStrategy::FailFast);
        let t1 = orch.delegate("task one", 5, None).await.unwrap();
        let t2 = orch.delegate("task two", 5, None).await.unwrap();
        orch.fail(&t1, "boom").await.unwrap();

        let actions = q.get_queue().await;
        let remaining = actions
            .iter()
            .find(|a| a.description == "task two")
            .unwrap();
        assert_eq!(remaining.status, crate::action_queue::ActionStatus::Cancelled);
        let _ = t2;
    }

    #[tokio::test]
    async fn send_requires_known_agent() {
        let orch = Orchestrator::new(queue(), None);
        let err = orch.send("unknown", "hi", None).await.unwrap_err();
        assert!(matches!(err, CoreError::ResourceMissing(_)));
    }
}
