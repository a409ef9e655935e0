//! `ActionQueue` trait and its JSON-file-backed implementation (§4.1).

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::error::{CoreError, CoreResult};
use crate::event_bus::{AppEvent, EventBus};

use super::types::{Action, ActionCounts, ActionStatus, PushActionRequest};
use std::sync::Arc;

/// Abstraction over the action queue, so the reasoning loop, scheduler, and
/// gateway can all depend on a trait object rather than a concrete store.
#[async_trait]
pub trait ActionQueue: Send + Sync {
    async fn push(&self, req: PushActionRequest) -> CoreResult<String>;
    async fn pop(&self) -> CoreResult<Option<Action>>;
    async fn update_status(
        &self,
        id: &str,
        status: ActionStatus,
        reason: Option<&str>,
    ) -> CoreResult<()>;
    async fn update_payload(&self, id: &str, patch: HashMap<String, Value>) -> CoreResult<()>;
    /// Bump the reasoning loop's step and outbound-message counters on an
    /// action (§4.6 hard bounds). Either delta may be zero.
    async fn increment_counters(&self, id: &str, steps: u32, messages: u32) -> CoreResult<()>;
    async fn get(&self, id: &str) -> Option<Action>;
    async fn get_queue(&self) -> Vec<Action>;
    async fn get_counts(&self) -> ActionCounts;
    async fn cancel(&self, id: &str, reason: &str) -> CoreResult<()>;
    async fn clear(&self, reason: &str) -> CoreResult<()>;
    /// Sweep stale actions per §4.1: in-progress leases older than
    /// `max_action_run_minutes` fail as "stale"; waiting actions older than
    /// `max_stale_action_minutes` close as "abandoned". Returns the ids touched.
    /// Each transition emits an `ActionCancelled`-family event.
    async fn sweep_stale(
        &self,
        max_action_run_minutes: i64,
        max_stale_action_minutes: i64,
    ) -> Vec<String>;
}

/// File-persisted action queue: an in-memory `Vec<Action>` behind an
/// `RwLock`, flushed to disk atomically (write-tmp-then-rename) on every
/// mutation, mirroring the config loader's save discipline.
pub struct JsonActionQueue {
    path: PathBuf,
    actions: RwLock<Vec<Action>>,
    retention: usize,
    bus: Option<Arc<dyn EventBus>>,
}

impl JsonActionQueue {
    pub fn new(path: PathBuf, retention: usize, bus: Option<Arc<dyn EventBus>>) -> CoreResult<Self> {
        let actions = load_actions(&path)?;
        Ok(Self {
            path,
            actions: RwLock::new(actions),
            retention,
            bus,
        })
    }

    fn flush(&self, actions: &[Action]) -> CoreResult<()> {
        save_actions(&self.path, actions)
    }

    fn publish(&self, event: AppEvent) {
        if let Some(bus) = &self.bus {
            let _ = bus.publish(event);
        }
    }

    /// Drop the oldest terminal actions beyond `retention`, ordered by
    /// last-update descending (most recent terminal actions are kept).
    fn enforce_retention(actions: &mut Vec<Action>, retention: usize) {
        let mut terminal_idx: Vec<usize> = actions
            .iter()
            .enumerate()
            .filter(|(_, a)| a.status.is_terminal())
            .map(|(i, _)| i)
            .collect();
        if terminal_idx.len() <= retention {
            return;
        }
        terminal_idx.sort_by_key(|&i| std::cmp::Reverse(actions[i].updated_at));
        let to_drop: std::collections::HashSet<usize> =
            terminal_idx[retention..].iter().copied().collect();
        let mut i = 0;
        actions.retain(|_| {
            let keep = !to_drop.contains(&i);
            i += 1;
            keep
        });
    }
}

#[async_trait]
impl ActionQueue for JsonActionQueue {
    async fn push(&self, req: PushActionRequest) -> CoreResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut action = Action::new(id.clone(), req.description, req.priority);
        action.payload = req.payload;
        action.parent_action_id = req.parent_action_id;

        let description = action.description.clone();
        let mut actions = self.actions.write().map_err(|_| lock_poisoned())?;
        actions.push(action);
        self.flush(&actions)?;
        drop(actions);

        self.publish(AppEvent::ActionQueued {
            action_id: id.clone(),
            description,
        });
        Ok(id)
    }

    async fn pop(&self) -> CoreResult<Option<Action>> {
        let mut actions = self.actions.write().map_err(|_| lock_poisoned())?;

        // Highest priority, FIFO tie-break by creation timestamp, among
        // non-terminal, non-leased actions.
        let idx = actions
            .iter()
            .enumerate()
            .filter(|(_, a)| matches!(a.status, ActionStatus::Pending))
            .max_by(|(_, a), (_, b)| {
                a.priority
                    .cmp(&b.priority)
                    .then(b.created_at.cmp(&a.created_at))
            })
            .map(|(i, _)| i);

        let Some(idx) = idx else {
            return Ok(None);
        };

        let now = Utc::now();
        actions[idx].status = ActionStatus::InProgress;
        actions[idx].leased_at = Some(now);
        actions[idx].updated_at = now;
        let popped = actions[idx].clone();
        self.flush(&actions)?;
        Ok(Some(popped))
    }

    async fn update_status(
        &self,
        id: &str,
        status: ActionStatus,
        reason: Option<&str>,
    ) -> CoreResult<()> {
        let mut actions = self.actions.write().map_err(|_| lock_poisoned())?;
        let action = actions
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| CoreError::ResourceMissing(format!("action {id}")))?;

        if !action.status.can_transition_to(status) {
            return Err(CoreError::ValidationError(format!(
                "illegal transition {:?} -> {:?} for action {id}",
                action.status, status
            )));
        }

        action.status = status;
        action.updated_at = Utc::now();
        if let Some(r) = reason {
            action.last_reason = Some(r.to_string());
        }
        if !matches!(status, ActionStatus::InProgress) {
            action.leased_at = None;
        }

        Self::enforce_retention(&mut actions, self.retention);
        self.flush(&actions)?;
        Ok(())
    }

    async fn update_payload(&self, id: &str, patch: HashMap<String, Value>) -> CoreResult<()> {
        let mut actions = self.actions.write().map_err(|_| lock_poisoned())?;
        let action = actions
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| CoreError::ResourceMissing(format!("action {id}")))?;
        action.payload.extend(patch);
        action.updated_at = Utc::now();
        self.flush(&actions)?;
        Ok(())
    }

    async fn increment_counters(&self, id: &str, steps: u32, messages: u32) -> CoreResult<()> {
        let mut actions = self.actions.write().map_err(|_| lock_poisoned())?;
        let action = actions
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| CoreError::ResourceMissing(format!("action {id}")))?;
        action.step_count += steps;
        action.messages_sent += messages;
        action.updated_at = Utc::now();
        self.flush(&actions)?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Option<Action> {
        self.actions
            .read()
            .ok()?
            .iter()
            .find(|a| a.id == id)
            .cloned()
    }

    async fn get_queue(&self) -> Vec<Action> {
        self.actions.read().map(|a| a.clone()).unwrap_or_default()
    }

    async fn get_counts(&self) -> ActionCounts {
        let actions = self.actions.read().map(|a| a.clone()).unwrap_or_default();
        let mut counts = ActionCounts::default();
        for a in &actions {
            match a.status {
                ActionStatus::Pending => counts.pending += 1,
                ActionStatus::Waiting => counts.waiting += 1,
                ActionStatus::InProgress => counts.in_progress += 1,
                ActionStatus::Completed => counts.completed += 1,
                ActionStatus::Failed => counts.failed += 1,
                ActionStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    async fn cancel(&self, id: &str, reason: &str) -> CoreResult<()> {
        self.update_status(id, ActionStatus::Cancelled, Some(reason))
            .await?;
        self.publish(AppEvent::ActionCancelled {
            action_id: id.to_string(),
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn clear(&self, reason: &str) -> CoreResult<()> {
        let mut actions = self.actions.write().map_err(|_| lock_poisoned())?;
        let now = Utc::now();
        for a in actions.iter_mut() {
            if !a.status.is_terminal() {
                a.status = ActionStatus::Cancelled;
                a.last_reason = Some(reason.to_string());
                a.updated_at = now;
                a.leased_at = None;
            }
        }
        self.flush(&actions)?;
        drop(actions);
        self.publish(AppEvent::ActionCleared {
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn sweep_stale(
        &self,
        max_action_run_minutes: i64,
        max_stale_action_minutes: i64,
    ) -> Vec<String> {
        let mut actions = match self.actions.write() {
            Ok(a) => a,
            Err(_) => return vec![],
        };
        let now = Utc::now();
        let mut touched = vec![];

        for a in actions.iter_mut() {
            match a.status {
                ActionStatus::InProgress => {
                    if let Some(leased_at) = a.leased_at {
                        if (now - leased_at).num_minutes() > max_action_run_minutes {
                            a.status = ActionStatus::Failed;
                            a.last_reason = Some("stale".to_string());
                            a.updated_at = now;
                            a.leased_at = None;
                            touched.push((a.id.clone(), "stale".to_string()));
                        }
                    }
                }
                ActionStatus::Waiting => {
                    if (now - a.updated_at).num_minutes() > max_stale_action_minutes {
                        a.status = ActionStatus::Cancelled;
                        a.last_reason = Some("abandoned".to_string());
                        a.updated_at = now;
                        touched.push((a.id.clone(), "abandoned".to_string()));
                    }
                }
                _ => {}
            }
        }

        if !touched.is_empty() {
            let _ = self.flush(&actions);
        }
        drop(actions);

        for (action_id, reason) in &touched {
            self.publish(AppEvent::ActionCancelled {
                action_id: action_id.clone(),
                reason: reason.clone(),
            });
        }

        touched.into_iter().map(|(id, _)| id).collect()
    }
}

fn lock_poisoned() -> CoreError {
    CoreError::Fatal("action queue lock poisoned".to_string())
}

fn load_actions(path: &Path) -> CoreResult<Vec<Action>> {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content)
            .map_err(|e| CoreError::Fatal(format!("corrupt action queue at {path:?}: {e}"))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(vec![]),
        Err(e) => Err(CoreError::Fatal(format!(
            "failed to read action queue at {path:?}: {e}"
        ))),
    }
}

fn save_actions(path: &Path, actions: &[Action]) -> CoreResult<()> {
    let content = serde_json::to_string_pretty(actions)
        .map_err(|e| CoreError::Fatal(format!("failed to serialise action queue: {e}")))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| CoreError::Fatal(format!("failed to create queue dir: {e}")))?;
    }

    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &content)
        .map_err(|e| CoreError::Fatal(format!("failed to write temp action queue: {e}")))?;
    fs::rename(&tmp_path, path)
        .map_err(|e| CoreError::Fatal(format!("failed to replace action queue file: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn queue(dir: &TempDir) -> JsonActionQueue {
        JsonActionQueue::new(dir.path().join("actions.json"), 50, None).unwrap()
    }

    #[tokio::test]
    async fn push_then_pop_transitions_to_in_progress() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir);
        let id = q
            .push(PushActionRequest {
                description: "reply to alice".into(),
                priority: 5,
                ..Default::default()
            })
            .await
            .unwrap();

        let popped = q.pop().await.unwrap().unwrap();
        assert_eq!(popped.id, id);
        assert_eq!(popped.status, ActionStatus::InProgress);
        assert!(popped.leased_at.is_some());
    }

    #[tokio::test]
    async fn pop_is_empty_when_no_pending_actions() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir);
        assert!(q.pop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pop_prefers_highest_priority_then_fifo() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir);
        let low = q
            .push(PushActionRequest { description: "low".into(), priority: 1, ..Default::default() })
            .await
            .unwrap();
        let high = q
            .push(PushActionRequest { description: "high".into(), priority: 10, ..Default::default() })
            .await
            .unwrap();
        let popped = q.pop().await.unwrap().unwrap();
        assert_eq!(popped.id, high);
        assert_ne!(popped.id, low);
    }

    #[tokio::test]
    async fn update_status_rejects_illegal_transition() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir);
        let id = q
            .push(PushActionRequest { description: "x".into(), priority: 0, ..Default::default() })
            .await
            .unwrap();
        q.update_status(&id, ActionStatus::Completed, None)
            .await
            .unwrap();
        // Completed is terminal; cannot move back to in-progress.
        let err = q
            .update_status(&id, ActionStatus::InProgress, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));
    }

    #[tokio::test]
    async fn cancel_marks_cancelled_with_reason() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir);
        let id = q
            .push(PushActionRequest { description: "x".into(), priority: 0, ..Default::default() })
            .await
            .unwrap();
        q.cancel(&id, "user requested").await.unwrap();
        let action = q.get(&id).await.unwrap();
        assert_eq!(action.status, ActionStatus::Cancelled);
        assert_eq!(action.last_reason.as_deref(), Some("user requested"));
    }

    #[tokio::test]
    async fn clear_cancels_all_non_terminal_actions() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir);
        q.push(PushActionRequest { description: "a".into(), priority: 0, ..Default::default() })
            .await
            .unwrap();
        q.push(PushActionRequest { description: "b".into(), priority: 0, ..Default::default() })
            .await
            .unwrap();
        q.clear("shutdown").await.unwrap();
        let counts = q.get_counts().await;
        assert_eq!(counts.cancelled, 2);
        assert_eq!(counts.pending, 0);
    }

    #[tokio::test]
    async fn sweep_stale_fails_old_in_progress_actions() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir);
        let id = q
            .push(PushActionRequest { description: "x".into(), priority: 0, ..Default::default() })
            .await
            .unwrap();
        q.pop().await.unwrap();
        {
            let mut actions = q.actions.write().unwrap();
            let a = actions.iter_mut().find(|a| a.id == id).unwrap();
            a.leased_at = Some(Utc::now() - chrono::Duration::minutes(120));
        }
        let touched = q.sweep_stale(60, 60).await;
        assert_eq!(touched, vec![id.clone()]);
        let action = q.get(&id).await.unwrap();
        assert_eq!(action.status, ActionStatus::Failed);
        assert_eq!(action.last_reason.as_deref(), Some("stale"));
    }

    #[tokio::test]
    async fn sweep_stale_emits_action_cancelled_event() {
        use crate::event_bus::TokioBroadcastBus;

        let dir = TempDir::new().unwrap();
        let bus: Arc<dyn EventBus> = Arc::new(TokioBroadcastBus::new());
        let mut rx = bus.subscribe();
        let q = JsonActionQueue::new(dir.path().join("actions.json"), 50, Some(bus)).unwrap();

        let id = q
            .push(PushActionRequest { description: "x".into(), priority: 0, ..Default::default() })
            .await
            .unwrap();
        q.pop().await.unwrap();
        // drain the push/pop events so we can assert on the sweep event alone
        while rx.try_recv().is_ok() {}
        {
            let mut actions = q.actions.write().unwrap();
            let a = actions.iter_mut().find(|a| a.id == id).unwrap();
            a.leased_at = Some(Utc::now() - chrono::Duration::minutes(120));
        }

        q.sweep_stale(60, 60).await;

        match rx.try_recv().unwrap() {
            AppEvent::ActionCancelled { action_id, reason } => {
                assert_eq!(action_id, id);
                assert_eq!(reason, "stale");
            }
            other => panic!("expected ActionCancelled, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn increment_counters_accumulates() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir);
        let id = q
            .push(PushActionRequest { description: "x".into(), priority: 0, ..Default::default() })
            .await
            .unwrap();
        q.increment_counters(&id, 1, 0).await.unwrap();
        q.increment_counters(&id, 1, 1).await.unwrap();
        let action = q.get(&id).await.unwrap();
        assert_eq!(action.step_count, 2);
        assert_eq!(action.messages_sent, 1);
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("actions.json");
        let id = {
            let q = JsonActionQueue::new(path.clone(), 50, None).unwrap();
            q.push(PushActionRequest { description: "persisted".into(), priority: 0, ..Default::default() })
                .await
                .unwrap()
        };
        let q2 = JsonActionQueue::new(path, 50, None).unwrap();
        let action = q2.get(&id).await.unwrap();
        assert_eq!(action.description, "persisted");
    }
}
