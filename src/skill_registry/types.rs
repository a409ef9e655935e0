//! Entities for the Skills Registry (§3, §4.2).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a registered skill's handler implementation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillSource {
    /// Compiled into the binary (a `Tool` implementation registered at startup).
    Builtin,
    /// A single manifest file discovered under the plugins directory.
    Plugin,
    /// A directory package discovered under `plugins/skills/<name>/`.
    Declarative,
}

/// Which prompt surface mode `promptSurface(mode)` should render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptSurfaceMode {
    /// Every registered skill, full description.
    Full,
    /// Name + one-line description only.
    Compact,
    /// Compact surface filtered to skills relevant to the given keywords.
    RelevantToKeywords,
}

/// Metadata-only view of a registered skill, exposed to the LLM by default
/// (progressive disclosure, §4.2). The full body (declarative package
/// instructions) is only added to context once the skill is activated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillMeta {
    pub name: String,
    pub description: String,
    pub usage: String,
    pub source: SkillSource,
    pub parameters_schema: Value,
    /// Trigger patterns (substrings, case-insensitive) that auto-activate a
    /// declarative package when they appear in the task description.
    #[serde(default)]
    pub trigger_patterns: Vec<String>,
    /// Optional source URL recorded from a plugin's header comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

/// Manifest shape for a single-file plugin (§4.2 plugin model): a record
/// with name, description, usage, and a handler tag resolved against the
/// built-in handler catalog (Rust cannot dynamically load foreign code the
/// way the original `require()`-based plugin loader did).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub usage: String,
    /// Which built-in handler implements this plugin. Must match a name
    /// registered in the handler catalog.
    pub handler: String,
    #[serde(default)]
    pub parameters_schema: Option<Value>,
    #[serde(default)]
    pub source_url: Option<String>,
}

/// Manifest shape for a declarative skill package directory
/// (`plugins/skills/<name>/skill.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclarativeManifest {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub usage: String,
    /// Substrings matched case-insensitively against the task description
    /// to auto-activate this package.
    #[serde(default)]
    pub trigger_patterns: Vec<String>,
    /// Relative path (inside the package directory) to the full instructions
    /// body added to context on activation.
    #[serde(default = "default_body_file")]
    pub body_file: String,
}

fn default_body_file() -> String {
    "SKILL.md".to_string()
}

/// Result of `checkHealth()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: Vec<String>,
    pub issues: Vec<HealthIssue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthIssue {
    pub name: String,
    pub error: String,
}
