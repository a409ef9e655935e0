//! The Action Queue — the single unit of work the reasoning loop consumes.
//!
//! Every inbound message, scheduled job, delegated sub-task, and proactive
//! idea the scheduler synthesizes becomes an [`Action`]. Nothing runs the
//! reasoning loop directly; components push work here and the loop (or the
//! scheduler, on its behalf) pops one action at a time.
//!
//! # Architecture
//! ```text
//! ActionQueue (trait)
//!   └── JsonActionQueue      ← RwLock<Vec<Action>> + atomic write-tmp-then-rename
//! ```
//!
//! Persistence mirrors the teacher's config/identity pattern: state lives in
//! a single JSON document under the data directory, rewritten atomically on
//! every mutation so a crash mid-write never corrupts the on-disk copy.

pub mod queue;
pub mod types;

pub use queue::{ActionQueue, JsonActionQueue};
pub use types::{Action, ActionCounts, ActionStatus, PushActionRequest};
