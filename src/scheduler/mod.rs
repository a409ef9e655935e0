//! Background job scheduler for the agent core.
//!
//! # Architecture
//! ```text
//! Scheduler (trait)
//!   └── AgentTick               ← Action-Queue-native heartbeat driver
//!         ├── Schedule           ← Interval | Cron
//!         ├── JobPayload         ← Heartbeat | AgentTurn | Notify
//!         └── heartbeat          ← Parses HEARTBEAT.md checklist items
//! ```
//!
//! # Key behaviours
//! - Ticks on a fixed interval; pops due actions and evaluates HITL/guard state
//! - Stuck detection: steps running past the configured ceiling raise a guard incident
//! - Error back-off: `30s → 60s → 300s → 900s → 3600s`
//! - History ring-buffer: last 100 executions per job

pub mod agent_tick;
pub mod heartbeat;
pub mod traits;

pub use agent_tick::AgentTick;
pub use heartbeat::{
    DEFAULT_HEARTBEAT_INTERVAL_SECS, ERROR_BACKOFF_SECS, backoff_secs, parse_heartbeat_items,
};
pub use traits::{
    JobExecution, JobId, JobPayload, JobStatus, Schedule, ScheduledJob, Scheduler, SessionTarget,
};
