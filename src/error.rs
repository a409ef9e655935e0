//! Typed error kinds shared across the core (see §7 of the design doc).
//!
//! Components return `Result<T, CoreError>` (or a narrower alias that
//! converts into it at the boundary) instead of bare `String`s, so the
//! reasoning loop and guard can match on error *kind* rather than scan
//! message text.

use thiserror::Error;

/// Top-level error kind for every fallible operation in the core.
#[derive(Debug, Error, Clone)]
pub enum CoreError {
    /// Network, timeout, rate-limit — retried with backoff at the tool layer,
    /// surfaced to the guard once retries exhaust.
    #[error("transient external error: {0}")]
    TransientExternal(String),

    /// File/path/record not found — the guard advises locate-before-retry.
    #[error("resource missing: {0}")]
    ResourceMissing(String),

    /// Surfaced immediately with an alternative-path suggestion.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Bad tool args, bad plugin shape, bad manifest — rejected at the
    /// boundary; plugin errors additionally enqueue a self-repair task.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Command in the deny list, restricted HITL category — refused,
    /// recorded as an incident, loop continues.
    #[error("safety violation: {0}")]
    SafetyViolation(String),

    /// Disk write failure, corrupted queue file — logged, process aborts;
    /// next start performs a recovery pass over last known good state.
    #[error("fatal error: {0}")]
    Fatal(String),
}

impl CoreError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::Fatal(_))
    }

    /// A short, user-facing single-sentence rendering of the error, suitable
    /// for delivery through the originating channel alongside the action
    /// status (see §7 propagation policy).
    pub fn user_message(&self) -> String {
        match self {
            CoreError::TransientExternal(m) => format!("Temporary failure, will retry: {m}"),
            CoreError::ResourceMissing(m) => format!("Could not find: {m}"),
            CoreError::PermissionDenied(m) => format!("Not allowed: {m}"),
            CoreError::ValidationError(m) => format!("Invalid input: {m}"),
            CoreError::SafetyViolation(m) => format!("Refused for safety: {m}"),
            CoreError::Fatal(m) => format!("Internal failure: {m}"),
        }
    }
}

impl From<String> for CoreError {
    fn from(s: String) -> Self {
        // Conservative default for legacy call sites that still produce a
        // bare message: treat as validation unless it smells transient.
        let lower = s.to_lowercase();
        if lower.contains("timeout") || lower.contains("connection") || lower.contains("network")
        {
            CoreError::TransientExternal(s)
        } else if lower.contains("not found") || lower.contains("enoent") {
            CoreError::ResourceMissing(s)
        } else if lower.contains("permission") || lower.contains("denied") {
            CoreError::PermissionDenied(s)
        } else {
            CoreError::ValidationError(s)
        }
    }
}

impl From<&str> for CoreError {
    fn from(s: &str) -> Self {
        s.to_string().into()
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
