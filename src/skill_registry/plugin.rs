//! Plugin model (§4.2): single-file TOML manifests scanned from a directory,
//! each naming a `handler` tag resolved against a small built-in handler
//! catalog. This stands in for the original JS plugin loader's
//! `require()`-with-cache-busting: on every scan, (a) any previously cached
//! compiled form is dropped (the registry simply re-reads the manifest file),
//! (b) the manifest's shape is validated, (c) allow/deny enforcement happens
//! one layer up in [`super::registry::SkillsRegistry::register_plugin`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::traits::{Tool, ToolResult};

use super::error::{SkillError, SkillResult};
use super::types::{PluginManifest, SkillMeta, SkillSource};

/// List `*.toml` manifest files directly under `dir` (non-recursive). Missing
/// directories scan as empty rather than erroring, since a fresh install has
/// no plugins directory yet.
pub fn scan_plugin_files(dir: &Path) -> SkillResult<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("toml") {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

/// Parse and validate one manifest file, resolving its handler tag into a
/// runnable `Tool`.
pub fn load_plugin_file(path: &Path) -> SkillResult<(SkillMeta, Arc<dyn Tool>)> {
    let content = std::fs::read_to_string(path)?;
    let manifest: PluginManifest = toml::from_str(&content).map_err(|e| SkillError::InvalidManifest {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let handler = resolve_handler(&manifest.handler)?;

    let meta = SkillMeta {
        name: manifest.name.clone(),
        description: manifest.description.clone(),
        usage: manifest.usage.clone(),
        source: SkillSource::Plugin,
        parameters_schema: manifest
            .parameters_schema
            .clone()
            .unwrap_or_else(|| serde_json::json!({"type": "object"})),
        trigger_patterns: Vec::new(),
        source_url: manifest.source_url.clone(),
    };
    Ok((meta, handler))
}

/// Resolve a handler tag against the built-in catalog. Unknown tags are a
/// validation error (§4.2: "a malformed or throwing plugin is logged with
/// its full error").
fn resolve_handler(tag: &str) -> SkillResult<Arc<dyn Tool>> {
    match tag {
        "echo" => Ok(Arc::new(EchoHandler)),
        "noop" => Ok(Arc::new(NoopHandler)),
        "self_repair_skill" => Ok(Arc::new(SelfRepairHandler)),
        other => Err(SkillError::UnknownHandler(other.to_string())),
    }
}

/// Returns its input arguments back as output. A trivial reference handler.
struct EchoHandler;

#[async_trait]
impl Tool for EchoHandler {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echoes the given arguments back as output"
    }
    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object"})
    }
    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        Ok(ToolResult::ok(args.to_string()))
    }
}

/// Does nothing; used by plugins whose only purpose is to register metadata.
struct NoopHandler;

#[async_trait]
impl Tool for NoopHandler {
    fn name(&self) -> &str {
        "noop"
    }
    fn description(&self) -> &str {
        "Performs no action"
    }
    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object"})
    }
    async fn execute(&self, _args: Value) -> Result<ToolResult, String> {
        Ok(ToolResult::ok(""))
    }
}

/// Built-in skill invoked by the reasoning loop after a plugin self-repair
/// task is enqueued (§4.2, §8 scenario 3). Reports the failing skill name and
/// error back as output text for the LLM to reason about a fix; it does not
/// attempt to patch plugin files itself.
struct SelfRepairHandler;

#[async_trait]
impl Tool for SelfRepairHandler {
    fn name(&self) -> &str {
        "self_repair_skill"
    }
    fn description(&self) -> &str {
        "Reports diagnostic detail for a plugin that failed to load, so the reasoning loop can fix or quarantine it"
    }
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "skillName": {"type": "string"},
                "error": {"type": "string"},
            },
            "required": ["skillName", "error"],
        })
    }
    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let skill_name = args.get("skillName").and_then(|v| v.as_str()).unwrap_or("unknown");
        let error = args.get("error").and_then(|v| v.as_str()).unwrap_or("unknown error");
        Ok(ToolResult::ok(format!(
            "Diagnostic for \"{skill_name}\": {error}. Consider fixing the manifest or removing the plugin file."
        )))
    }
}
