//! Skills Registry (§3, §4.2).
//!
//! # Architecture
//! ```text
//! SkillsRegistry
//!   ├── built-in skills   ← Arc<dyn crate::tools::Tool>, registered at startup
//!   ├── plugin skills     ← single-file TOML manifests, hot-reloaded on tick
//!   └── declarative packages ← plugins/skills/<name>/ directories,
//!                              metadata-only until activated
//! ```
//!
//! Hot-reload is a directory rescan on the scheduler tick, not a runtime
//! monkey-patch (§9 design notes): Rust cannot dynamically load foreign code
//! the way the source's `require()`-based plugin loader did.

pub mod declarative;
pub mod error;
pub mod plugin;
pub mod registry;
pub mod types;

pub use error::{SkillError, SkillResult};
pub use registry::{SkillsRegistry, resolve_declarative_dir, resolve_plugins_dir};
pub use types::{
    DeclarativeManifest, HealthIssue, HealthReport, PluginManifest, PromptSurfaceMode, SkillMeta,
    SkillSource,
};
