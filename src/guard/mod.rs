//! Guard Subsystem (§3, §4.5) — the "tactical force": stagnation/loop/fatigue
//! detection and recovery planning for the reasoning loop.
//!
//! Three collaborators compose into one pure [`GuardSnapshot`] per step:
//! the incident ring (`IncidentMemory`), the conscience engine ([`conscience`]),
//! and the error-fixer engine ([`error_fixer`]).

pub mod conscience;
pub mod error_fixer;
pub mod types;

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

pub use types::{ConscienceResult, GuardSnapshot, Incident, IncidentSource, LoopContext, RiskLevel};

use crate::config::schema::GuardConfig;

/// Guard owns the per-action incident ring and composes snapshots. Cheap,
/// short-lived locks only — matches the concurrency model of §5.
pub struct Guard {
    cfg: GuardConfig,
    incidents: RwLock<HashMap<String, VecDeque<Incident>>>,
}

impl Guard {
    pub fn new(cfg: GuardConfig) -> Self {
        Self {
            cfg,
            incidents: RwLock::new(HashMap::new()),
        }
    }

    /// Record an incident, evicting the oldest entry once the per-action
    /// ring exceeds `incident_ring_size`.
    pub fn record_incident(&self, incident: Incident) {
        let mut map = self.incidents.write().expect("guard incident lock poisoned");
        let ring = map.entry(incident.action_id.clone()).or_default();
        ring.push_back(incident);
        while ring.len() > self.cfg.incident_ring_size {
            ring.pop_front();
        }
    }

    /// Recent incidents for `action_id`, oldest first.
    pub fn incidents_for(&self, action_id: &str) -> Vec<Incident> {
        self.incidents
            .read()
            .expect("guard incident lock poisoned")
            .get(action_id)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop all incidents for `action_id` (called once it reaches a terminal state).
    pub fn clear(&self, action_id: &str) {
        self.incidents
            .write()
            .expect("guard incident lock poisoned")
            .remove(action_id);
    }

    /// Compose a [`GuardSnapshot`] for `action_id` at the current step. Pure
    /// with respect to its inputs (incident ring + `ctx` + `memory_highlights`);
    /// safe to call multiple times per step.
    pub fn snapshot(
        &self,
        action_id: &str,
        description: &str,
        ctx: &LoopContext,
        memory_highlights: Vec<String>,
    ) -> GuardSnapshot {
        let incidents = self.incidents_for(action_id);
        let conscience = conscience::evaluate(ctx, &incidents, &self.cfg);
        let recovery_plan = match &ctx.last_error {
            Some(err) => error_fixer::build_recovery_plan(err, description),
            None => Vec::new(),
        };
        GuardSnapshot {
            action_id: action_id.to_string(),
            step: ctx.step,
            guidance: conscience.guidance.join(" "),
            recovery_plan,
            memory_highlights,
            risk: conscience.risk,
            complexity_score: conscience.complexity_score,
            escalate: conscience.escalate,
        }
    }
}
