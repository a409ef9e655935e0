//! Risk classification and autonomy gating for tool execution.

pub mod policy;

pub use policy::{AuditEntry, AutonomyLevel, RiskLevel, SecurityPolicy, ValidationResult};
