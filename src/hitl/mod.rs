//! Agentic HITL Proxy (§3, §4.8) — decides on the user's behalf whether a
//! `waiting` action has enough context to proceed, or whether a human still
//! needs to weigh in.

pub mod proxy;
pub mod types;

pub use proxy::{HitlProxy, HITL_TAG_APPLIED, HITL_TAG_SAFE_DEFAULT, HITL_TAG_STUCK};
pub use types::{AbortReason, HitlActionState, HitlJudgement, HitlOutcome, StuckSignal};
