//! Stateful configuration store (§4.0 / §6).
//!
//! Wraps the layered [`loader`] with:
//! - `get`/`set` by dotted key path (`"scheduler.heartbeat_interval_secs"`),
//! - a tick-based `reload_if_changed` that compares the backing file's mtime
//!   instead of installing an OS-specific file watcher (§9 design note),
//! - dotenv mirroring of sensitive keys (names containing `token`, `secret`,
//!   `key`, or `password`) so subprocesses that only read the environment
//!   still see them,
//! - an [`AppEvent::ConfigChanged`] emission whenever the effective config
//!   actually changes.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

use tokio::sync::RwLock;

use crate::error::{CoreError, CoreResult};
use crate::event_bus::{AppEvent, EventBus};

use super::loader::{default_config_path, load_config, save_config};
use super::schema::AppConfig;

/// Shared, mutable handle on the effective [`AppConfig`], reloaded on tick
/// rather than via an OS file-watcher.
pub struct ConfigStore {
    path: PathBuf,
    dotenv_path: PathBuf,
    config: RwLock<AppConfig>,
    last_mtime: RwLock<Option<SystemTime>>,
    bus: Option<Arc<dyn EventBus>>,
}

impl ConfigStore {
    /// Load the store from `path` (or the default config path if `None`),
    /// and mirror sensitive keys into a dotenv file alongside it.
    pub fn load(path: Option<PathBuf>, bus: Option<Arc<dyn EventBus>>) -> CoreResult<Self> {
        let path = match path {
            Some(p) => p,
            None => default_config_path().map_err(CoreError::Fatal)?,
        };
        let dotenv_path = path.with_file_name(".env");

        let config = load_config(&path).map_err(CoreError::Fatal)?;
        let last_mtime = file_mtime(&path);

        let store = Self {
            path,
            dotenv_path,
            config: RwLock::new(config),
            last_mtime: RwLock::new(last_mtime),
            bus,
        };
        Ok(store)
    }

    /// Current effective config snapshot.
    pub async fn snapshot(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    /// Read a single config value by dotted key path, e.g.
    /// `"scheduler.heartbeat_interval_secs"`. Returns `None` if the path
    /// doesn't resolve.
    pub async fn get(&self, key: &str) -> Option<toml::Value> {
        let config = self.config.read().await;
        let value = toml::Value::try_from(&*config).ok()?;
        lookup(&value, key)
    }

    /// Set a single config value by dotted key path and persist it
    /// atomically. Emits [`AppEvent::ConfigChanged`] on success.
    pub async fn set(&self, key: &str, value: toml::Value) -> CoreResult<()> {
        let mut config = self.config.write().await;
        let mut raw = toml::Value::try_from(&*config)
            .map_err(|e| CoreError::ValidationError(format!("config not serialisable: {e}")))?;
        set_path(&mut raw, key, value)
            .map_err(|e| CoreError::ValidationError(format!("invalid config key {key}: {e}")))?;
        let updated: AppConfig = raw
            .try_into()
            .map_err(|e| CoreError::ValidationError(format!("invalid value for {key}: {e}")))?;

        save_config(&self.path, &updated).map_err(CoreError::Fatal)?;
        *config = updated.clone();
        drop(config);

        self.write_dotenv(&updated)?;
        *self.last_mtime.write().await = file_mtime(&self.path);
        self.publish(AppEvent::ConfigChanged);
        Ok(())
    }

    /// Tick-based reload: compares the config file's mtime against the last
    /// observed value and reloads only if it changed. Never installs an
    /// OS-level file watcher — the scheduler/heartbeat calls this once per
    /// tick instead (§9).
    pub async fn reload_if_changed(&self) -> CoreResult<bool> {
        let current_mtime = file_mtime(&self.path);
        let mut last = self.last_mtime.write().await;
        if current_mtime == *last {
            return Ok(false);
        }

        let reloaded = load_config(&self.path).map_err(CoreError::Fatal)?;
        *last = current_mtime;
        drop(last);

        let mut config = self.config.write().await;
        let changed = *config != reloaded;
        *config = reloaded.clone();
        drop(config);

        if changed {
            self.write_dotenv(&reloaded)?;
            self.publish(AppEvent::ConfigChanged);
        }
        Ok(changed)
    }

    /// Mirror sensitive-looking keys (token/secret/key/password) into a
    /// dotenv file next to the config, so non-Rust subprocesses launched by
    /// skills can read them from the environment.
    fn write_dotenv(&self, config: &AppConfig) -> CoreResult<()> {
        let value = toml::Value::try_from(config)
            .map_err(|e| CoreError::ValidationError(format!("config not serialisable: {e}")))?;
        let mut lines = Vec::new();
        collect_sensitive(&value, "MESOCLAW", &mut lines);
        if lines.is_empty() {
            return Ok(());
        }
        lines.sort();
        let content = lines.join("\n") + "\n";
        fs::write(&self.dotenv_path, content)
            .map_err(|e| CoreError::Fatal(format!("failed to write dotenv mirror: {e}")))
    }

    fn publish(&self, event: AppEvent) {
        if let Some(bus) = &self.bus {
            let _ = bus.publish(event);
        }
    }
}

fn file_mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Resolve a dotted key path (`"a.b.c"`) against a TOML table.
fn lookup(value: &toml::Value, key: &str) -> Option<toml::Value> {
    let mut current = value;
    for part in key.split('.') {
        current = current.as_table()?.get(part)?;
    }
    Some(current.clone())
}

/// Set a dotted key path against a TOML table, creating intermediate tables
/// as needed but requiring the final key to already be a scalar-shaped leaf
/// (this store only edits existing schema fields, never invents new ones).
fn set_path(root: &mut toml::Value, key: &str, value: toml::Value) -> Result<(), String> {
    let parts: Vec<&str> = key.split('.').collect();
    let mut current = root
        .as_table_mut()
        .ok_or_else(|| "config root is not a table".to_string())?;
    for part in &parts[..parts.len() - 1] {
        current = current
            .get_mut(*part)
            .and_then(|v| v.as_table_mut())
            .ok_or_else(|| format!("no such section: {part}"))?;
    }
    let leaf = parts[parts.len() - 1];
    if !current.contains_key(leaf) {
        return Err(format!("no such key: {leaf}"));
    }
    current.insert(leaf.to_string(), value);
    Ok(())
}

/// Recursively walk a TOML value, emitting `PREFIX_PATH=value` dotenv lines
/// for any leaf whose key name looks like a secret.
fn collect_sensitive(value: &toml::Value, prefix: &str, out: &mut Vec<String>) {
    if let toml::Value::Table(table) = value {
        for (k, v) in table {
            let env_key = format!("{prefix}_{}", k.to_uppercase());
            match v {
                toml::Value::Table(_) => collect_sensitive(v, &env_key, out),
                _ => {
                    let lower = k.to_lowercase();
                    if lower.contains("token")
                        || lower.contains("secret")
                        || lower.contains("key")
                        || lower.contains("password")
                    {
                        out.push(format!("{env_key}={}", scalar_to_env(v)));
                    }
                }
            }
        }
    }
}

fn scalar_to_env(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn get_set_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        save_config(&path, &AppConfig::default()).unwrap();

        let store = ConfigStore::load(Some(path), None).unwrap();
        store
            .set("scheduler.heartbeat_interval_secs", toml::Value::Integer(42))
            .await
            .unwrap();

        let value = store.get("scheduler.heartbeat_interval_secs").await.unwrap();
        assert_eq!(value.as_integer(), Some(42));
    }

    #[tokio::test]
    async fn reload_if_changed_detects_external_edit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        save_config(&path, &AppConfig::default()).unwrap();

        let store = ConfigStore::load(Some(path.clone()), None).unwrap();
        assert!(!store.reload_if_changed().await.unwrap());

        // Simulate an external edit with a distinguishable mtime.
        std::thread::sleep(std::time::Duration::from_millis(10));
        let mut edited = AppConfig::default();
        edited.provider.default_model = "claude-3-haiku".to_string();
        save_config(&path, &edited).unwrap();

        assert!(store.reload_if_changed().await.unwrap());
        assert_eq!(
            store.snapshot().await.provider.default_model,
            "claude-3-haiku"
        );
    }

    #[tokio::test]
    async fn set_rejects_unknown_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        save_config(&path, &AppConfig::default()).unwrap();
        let store = ConfigStore::load(Some(path), None).unwrap();
        let err = store
            .set("scheduler.no_such_field", toml::Value::Integer(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));
    }
}
