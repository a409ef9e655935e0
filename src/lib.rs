pub mod action_queue;
pub mod agent;
pub mod agents;
pub mod ai;
pub mod config;
pub mod error;
pub mod event_bus;
#[cfg(feature = "gateway")]
pub mod gateway;
pub mod guard;
pub mod hitl;
pub mod identity;
pub mod memory;
pub mod message_bus;
pub mod plugins;
pub mod runtime;
pub mod scheduler;
pub mod security;
pub mod skill_registry;
pub mod tools;

/// Convenience re-exports for the most commonly used traits and types across
/// the codebase.
///
/// ```rust
/// use opcore::prelude::*;
/// ```
pub mod prelude {
    // AI provider trait
    pub use crate::ai::provider::LLMProvider;
    pub use crate::ai::providers::{OpenAICompatibleConfig, OpenAICompatibleProvider};
    pub use crate::ai::types::{CompletionRequest, CompletionResponse, Message, MessageRole};

    // Tool system
    pub use crate::tools::{Tool, ToolRegistry, ToolResult};

    // Memory subsystem
    pub use crate::memory::{Memory, MemoryEntry, MemoryKind};

    // Security
    pub use crate::security::{AutonomyLevel, SecurityPolicy, ValidationResult};

    // Event bus
    pub use crate::event_bus::{AppEvent, EventBus, TokioBroadcastBus};

    // Scheduler
    pub use crate::scheduler::{AgentTick, Scheduler};

    // Configuration
    pub use crate::config::{AppConfig, load_default_config};

    // Errors
    pub use crate::error::{CoreError, CoreResult};

    // Action Queue
    pub use crate::action_queue::{Action, ActionQueue, ActionStatus};

    // Skills Registry
    pub use crate::skill_registry::SkillsRegistry;
}
