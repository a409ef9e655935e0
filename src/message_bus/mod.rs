//! Message Bus (§4.4) — normalises inbound events into Action Queue tasks.

pub mod dispatch;
pub mod types;

pub use dispatch::MessageBus;
pub use types::InboundMessage;
