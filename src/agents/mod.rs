//! Sub-agent lifecycle management (§4.9).
//!
//! Sub-agents are named, role-tagged instances tracked in-process by the
//! [`Orchestrator`]; delegated work travels as ordinary actions on the
//! action queue rather than through a bespoke spawn/execute path.

pub mod orchestrator;

pub use orchestrator::{DelegatedTask, FailureStrategy, Orchestrator, SubAgent, TaskOutcome};

use serde::{Deserialize, Serialize};

/// Unique identifier for an agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    /// Create a new agent ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the agent ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_id_display() {
        let id = AgentId::new("test-agent");
        assert_eq!(format!("{}", id), "test-agent");
    }
}
