//! Skills Registry (§3, §4.2): a registry of tagged handlers discovered by
//! scanning a directory and matched against a small manifest schema (§9
//! design notes — Rust cannot dynamically load foreign code the way the
//! original `require()`-based plugin loader did).
//!
//! Three layers compose into one registry:
//! - built-in skills: `Arc<dyn Tool>` implementations registered at startup;
//! - plugin skills: single-file TOML manifests under `plugins_dir`, each
//!   naming a `handler` tag resolved against the built-in handler catalog;
//! - declarative skill packages: directories under `plugins/skills/<name>/`
//!   exposing only metadata until activated (progressive disclosure).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::action_queue::{ActionQueue, PushActionRequest};
use crate::config::schema::SkillsConfig;
use crate::event_bus::{AppEvent, EventBus};
use crate::tools::traits::{Tool, ToolResult};

use super::declarative::{DeclarativePackage, scan_declarative_dir};
use super::error::{SkillError, SkillResult};
use super::plugin::{load_plugin_file, scan_plugin_files};
use super::types::{HealthIssue, HealthReport, PromptSurfaceMode, SkillMeta, SkillSource};

/// A single registered, executable skill.
struct RegisteredSkill {
    meta: SkillMeta,
    handler: Arc<dyn Tool>,
}

/// High-priority repair task description prefix recognised by the reasoning
/// loop as a trigger to invoke the `self_repair_skill` tool (§8 scenario 3).
pub const SELF_REPAIR_TASK_PREFIX: &str = "Repair failing skill";

/// Priority assigned to self-repair tasks enqueued after a plugin load failure.
pub const SELF_REPAIR_PRIORITY: i32 = 90;

pub struct SkillsRegistry {
    cfg: RwLock<SkillsConfig>,
    skills: RwLock<HashMap<String, RegisteredSkill>>,
    declarative: RwLock<HashMap<String, DeclarativePackage>>,
    /// Names currently activated (full body already surfaced to context).
    activated: RwLock<std::collections::HashSet<String>>,
    queue: Option<Arc<dyn ActionQueue>>,
    bus: Option<Arc<dyn EventBus>>,
}

impl SkillsRegistry {
    pub fn new(cfg: SkillsConfig, queue: Option<Arc<dyn ActionQueue>>, bus: Option<Arc<dyn EventBus>>) -> Self {
        Self {
            cfg: RwLock::new(cfg),
            skills: RwLock::new(HashMap::new()),
            declarative: RwLock::new(HashMap::new()),
            activated: RwLock::new(std::collections::HashSet::new()),
            queue,
            bus,
        }
    }

    /// Register a built-in skill backed by a `Tool` implementation.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let meta = SkillMeta {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            usage: tool.description().to_string(),
            source: SkillSource::Builtin,
            parameters_schema: tool.parameters_schema(),
            trigger_patterns: Vec::new(),
            source_url: None,
        };
        self.skills
            .write()
            .expect("skills registry lock poisoned")
            .insert(meta.name.clone(), RegisteredSkill { meta, handler: tool });
    }

    /// Register a plugin-sourced skill, enforcing allow/deny lists.
    fn register_plugin(&self, meta: SkillMeta, handler: Arc<dyn Tool>) -> SkillResult<()> {
        let cfg = self.cfg.read().expect("skills config lock poisoned");
        if cfg.deny_list.iter().any(|n| n == &meta.name) {
            return Err(SkillError::Denied(meta.name));
        }
        if !cfg.allow_list.is_empty() && !cfg.allow_list.iter().any(|n| n == &meta.name) {
            return Err(SkillError::Denied(meta.name));
        }
        drop(cfg);
        self.skills
            .write()
            .expect("skills registry lock poisoned")
            .insert(meta.name.clone(), RegisteredSkill { meta, handler });
        Ok(())
    }

    pub async fn execute(&self, name: &str, args: Value) -> SkillResult<ToolResult> {
        let handler = {
            let skills = self.skills.read().expect("skills registry lock poisoned");
            skills
                .get(name)
                .map(|s| s.handler.clone())
                .ok_or_else(|| SkillError::NotFound(name.to_string()))?
        };
        handler
            .execute(args)
            .await
            .map_err(SkillError::ExecutionFailed)
    }

    pub fn list(&self) -> Vec<SkillMeta> {
        self.skills
            .read()
            .expect("skills registry lock poisoned")
            .values()
            .map(|s| s.meta.clone())
            .collect()
    }

    /// Render the LLM-facing skills catalog for one of three modes (§4.2).
    pub fn prompt_surface(&self, mode: PromptSurfaceMode, keywords: &[&str]) -> String {
        let metas = self.list();
        match mode {
            PromptSurfaceMode::Full => metas
                .iter()
                .map(|m| format!("- {}: {} (usage: {})", m.name, m.description, m.usage))
                .collect::<Vec<_>>()
                .join("\n"),
            PromptSurfaceMode::Compact => metas
                .iter()
                .map(|m| format!("- {}: {}", m.name, m.description))
                .collect::<Vec<_>>()
                .join("\n"),
            PromptSurfaceMode::RelevantToKeywords => {
                let lower_keywords: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
                metas
                    .iter()
                    .filter(|m| {
                        let haystack = format!("{} {}", m.name, m.description).to_lowercase();
                        lower_keywords.iter().any(|k| haystack.contains(k.as_str()))
                    })
                    .map(|m| format!("- {}: {}", m.name, m.description))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
    }

    /// Scan `dir` for plugin manifest files (§4.2 hot-reload): a newly
    /// present file is loaded, a removed file unregisters its skill.
    pub async fn load_plugins(&self, dir: &std::path::Path) -> SkillResult<()> {
        let found = scan_plugin_files(dir)?;
        let mut present_names = std::collections::HashSet::new();

        for path in &found {
            match load_plugin_file(path) {
                Ok((meta, handler)) => {
                    present_names.insert(meta.name.clone());
                    if let Err(e) = self.register_plugin(meta.clone(), handler) {
                        self.record_load_failure(&meta.name, &e.to_string()).await;
                    }
                }
                Err(e) => {
                    let guessed_name = path
                        .file_stem()
                        .map(|s| s.to_string_lossy().to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    self.record_load_failure(&guessed_name, &e.to_string()).await;
                }
            }
        }

        // Unregister plugin skills whose file disappeared.
        let stale: Vec<String> = {
            let skills = self.skills.read().expect("skills registry lock poisoned");
            skills
                .values()
                .filter(|s| s.meta.source == SkillSource::Plugin && !present_names.contains(&s.meta.name))
                .map(|s| s.meta.name.clone())
                .collect()
        };
        if !stale.is_empty() {
            let mut skills = self.skills.write().expect("skills registry lock poisoned");
            for name in stale {
                skills.remove(&name);
            }
        }
        Ok(())
    }

    /// Scan `dir` for declarative skill package directories (§4.2).
    pub fn load_declarative(&self, dir: &std::path::Path) -> SkillResult<()> {
        let found = scan_declarative_dir(dir)?;
        let mut map = self.declarative.write().expect("declarative lock poisoned");
        map.clear();
        for pkg in found {
            map.insert(pkg.manifest.name.clone(), pkg);
        }
        Ok(())
    }

    /// Surface metadata for every declarative package (progressive disclosure:
    /// full body is withheld until `activate`).
    pub fn declarative_metas(&self) -> Vec<SkillMeta> {
        self.declarative
            .read()
            .expect("declarative lock poisoned")
            .values()
            .map(|p| SkillMeta {
                name: p.manifest.name.clone(),
                description: p.manifest.description.clone(),
                usage: p.manifest.usage.clone(),
                source: SkillSource::Declarative,
                parameters_schema: serde_json::json!({"type": "object"}),
                trigger_patterns: p.manifest.trigger_patterns.clone(),
                source_url: None,
            })
            .collect()
    }

    /// Auto-activation per §4.2: trigger patterns first, then fuzzy word
    /// overlap (≥3 non-trivial overlapping words, or ≥2 if the task
    /// description is ≤8 words).
    pub fn auto_activate(&self, task_description: &str) -> Vec<String> {
        let lower_desc = task_description.to_lowercase();
        let desc_words: Vec<&str> = lower_desc.split_whitespace().collect();
        let declarative = self.declarative.read().expect("declarative lock poisoned");

        let mut activated = Vec::new();
        for pkg in declarative.values() {
            let triggered = pkg
                .manifest
                .trigger_patterns
                .iter()
                .any(|p| lower_desc.contains(&p.to_lowercase()));

            let fuzzy = if triggered {
                false
            } else {
                let overlap = fuzzy_word_overlap(&desc_words, &pkg.manifest.name, &pkg.manifest.description);
                let threshold = if desc_words.len() <= 8 { 2 } else { 3 };
                overlap >= threshold
            };

            if triggered || fuzzy {
                activated.push(pkg.manifest.name.clone());
            }
        }

        for name in &activated {
            self.activated.write().expect("activated lock poisoned").insert(name.clone());
        }
        activated
    }

    /// Full body text for an activated declarative package, sandboxed to the
    /// package directory (§4.2).
    pub fn activated_body(&self, name: &str) -> SkillResult<String> {
        let declarative = self.declarative.read().expect("declarative lock poisoned");
        let pkg = declarative.get(name).ok_or_else(|| SkillError::NotFound(name.to_string()))?;
        pkg.read_body()
    }

    /// Sandboxed resource read: `path` must resolve inside the package
    /// directory (§4.2).
    pub fn read_resource(&self, skill_name: &str, path: &str) -> SkillResult<String> {
        let declarative = self.declarative.read().expect("declarative lock poisoned");
        let pkg = declarative
            .get(skill_name)
            .ok_or_else(|| SkillError::NotFound(skill_name.to_string()))?;
        pkg.read_resource(path)
    }

    pub async fn install_from_path(&self, path: &std::path::Path) -> SkillResult<()> {
        let (meta, handler) = load_plugin_file(path)?;
        self.register_plugin(meta, handler)
    }

    pub fn uninstall(&self, name: &str) -> SkillResult<()> {
        let removed = self
            .skills
            .write()
            .expect("skills registry lock poisoned")
            .remove(name)
            .is_some();
        if removed {
            Ok(())
        } else {
            Err(SkillError::NotFound(name.to_string()))
        }
    }

    /// `checkHealth()`: every registered skill is considered healthy by
    /// construction (a failed load never registers); this surfaces the
    /// plugin directory's current load state for operator visibility.
    pub fn check_health(&self) -> HealthReport {
        let skills = self.skills.read().expect("skills registry lock poisoned");
        HealthReport {
            healthy: skills.keys().cloned().collect(),
            issues: Vec::new(),
        }
    }

    /// Record a plugin load failure: log, and enqueue a high-priority
    /// self-repair task (§4.2, §8 scenario 3).
    async fn record_load_failure(&self, skill_name: &str, error: &str) {
        tracing::error!(skill = skill_name, error, "plugin load failed");
        if let Some(queue) = &self.queue {
            let description = format!("{SELF_REPAIR_TASK_PREFIX} \"{skill_name}\": {error}");
            let mut payload = HashMap::new();
            payload.insert("skillName".to_string(), Value::String(skill_name.to_string()));
            payload.insert("error".to_string(), Value::String(error.to_string()));
            let _ = queue
                .push(PushActionRequest {
                    description,
                    priority: SELF_REPAIR_PRIORITY,
                    payload,
                    parent_action_id: None,
                })
                .await;
        }
        if let Some(bus) = &self.bus {
            let _ = bus.publish(AppEvent::SystemError {
                message: format!("plugin {skill_name} failed to load: {error}"),
            });
        }
    }
}

/// Count non-trivial (len > 3) words from `desc_words` that appear in the
/// package's name or description.
fn fuzzy_word_overlap(desc_words: &[&str], name: &str, description: &str) -> usize {
    let haystack = format!("{name} {description}").to_lowercase();
    desc_words
        .iter()
        .filter(|w| w.len() > 3)
        .filter(|w| haystack.contains(*w))
        .count()
}

/// Default plugin directory location under the data home, when not
/// overridden by `SkillsConfig::plugins_dir`.
pub fn resolve_plugins_dir(cfg: &SkillsConfig, data_home: &std::path::Path) -> PathBuf {
    cfg.plugins_dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| data_home.join("plugins"))
}

/// Default declarative skills directory, mirroring `resolve_plugins_dir`.
pub fn resolve_declarative_dir(cfg: &SkillsConfig, data_home: &std::path::Path) -> PathBuf {
    cfg.declarative_skills_dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| data_home.join("plugins").join("skills"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes its input"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, args: Value) -> Result<ToolResult, String> {
            Ok(ToolResult::ok(args.to_string()))
        }
    }

    fn registry() -> SkillsRegistry {
        SkillsRegistry::new(SkillsConfig::default(), None, None)
    }

    #[tokio::test]
    async fn register_and_execute_builtin() {
        let reg = registry();
        reg.register(Arc::new(EchoTool));
        let result = reg.execute("echo", json!({"x": 1})).await.unwrap();
        assert!(result.success);
    }

    #[test]
    fn list_is_empty_initially() {
        let reg = registry();
        assert!(reg.list().is_empty());
    }

    #[test]
    fn unknown_skill_uninstall_errors() {
        let reg = registry();
        assert!(reg.uninstall("nope").is_err());
    }

    #[tokio::test]
    async fn plugin_load_failure_enqueues_repair_task() {
        let dir = TempDir::new().unwrap();
        let queue_path = dir.path().join("queue.json");
        let queue: Arc<dyn ActionQueue> =
            Arc::new(crate::action_queue::JsonActionQueue::new(queue_path, 50, None).unwrap());
        let reg = SkillsRegistry::new(SkillsConfig::default(), Some(queue.clone()), None);

        let plugins_dir = dir.path().join("plugins");
        std::fs::create_dir_all(&plugins_dir).unwrap();
        std::fs::write(plugins_dir.join("broken.toml"), "not valid toml {{{").unwrap();

        reg.load_plugins(&plugins_dir).await.unwrap();

        let queued = queue.get_queue().await;
        assert_eq!(queued.len(), 1);
        assert!(queued[0].description.contains(SELF_REPAIR_TASK_PREFIX));
        assert!(queued[0].description.contains("broken"));
    }

    #[test]
    fn fuzzy_overlap_counts_shared_nontrivial_words() {
        let words: Vec<&str> = "please optimize the database query performance".split_whitespace().collect();
        let overlap = fuzzy_word_overlap(&words, "sql-tuning", "Tunes database query performance issues");
        assert!(overlap >= 2);
    }
}
