//! Agent Intelligence Layer — the core reasoning loop and related utilities.
//!
//! # Key types
//! - [`ReasoningLoop`] — drives one guarded step of a leased action
//! - [`SessionRouter`] — resolves inbound messages to a conversation session
//! - [`ParsedToolCall`] — a tool invocation extracted from an LLM response

pub mod reasoning_loop;
pub mod session_router;
pub mod tool_parser;

pub use reasoning_loop::{ReasoningLoop, StepOutcome};
pub use session_router::{Session, SessionKey, SessionMessage, SessionRouter};
pub use tool_parser::ParsedToolCall;
