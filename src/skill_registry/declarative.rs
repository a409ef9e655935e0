//! Declarative skill packages (§4.2): directories containing a manifest file,
//! discovered beneath `plugins/skills/`. Only manifest metadata is exposed to
//! the LLM by default; the full body is added to context only once the
//! package is activated. Resource reads are sandboxed to the package
//! directory.

use std::path::{Path, PathBuf};

use super::error::{SkillError, SkillResult};
use super::types::DeclarativeManifest;

const MANIFEST_FILE: &str = "skill.toml";

pub struct DeclarativePackage {
    pub manifest: DeclarativeManifest,
    pub dir: PathBuf,
}

impl DeclarativePackage {
    /// Full instructions body, read from `manifest.body_file` inside the
    /// package directory.
    pub fn read_body(&self) -> SkillResult<String> {
        self.read_resource(&self.manifest.body_file)
    }

    /// Read an arbitrary resource by relative path, refusing any path that
    /// resolves outside the package directory (§4.2).
    pub fn read_resource(&self, relative: &str) -> SkillResult<String> {
        let requested = self.dir.join(relative);
        let canonical_dir = self
            .dir
            .canonicalize()
            .map_err(|_| SkillError::PathEscape(relative.to_string()))?;
        let canonical_requested = requested
            .canonicalize()
            .map_err(|_| SkillError::PathEscape(relative.to_string()))?;
        if !canonical_requested.starts_with(&canonical_dir) {
            return Err(SkillError::PathEscape(relative.to_string()));
        }
        Ok(std::fs::read_to_string(canonical_requested)?)
    }
}

/// Scan `dir` (typically `plugins/skills/`) for subdirectories containing a
/// `skill.toml` manifest. Missing directories scan as empty.
pub fn scan_declarative_dir(dir: &Path) -> SkillResult<Vec<DeclarativePackage>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut packages = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let manifest_path = path.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            continue;
        }
        let content = std::fs::read_to_string(&manifest_path)?;
        let manifest: DeclarativeManifest =
            toml::from_str(&content).map_err(|e| SkillError::InvalidManifest {
                path: manifest_path.display().to_string(),
                reason: e.to_string(),
            })?;
        packages.push(DeclarativePackage { manifest, dir: path });
    }
    packages.sort_by(|a, b| a.manifest.name.cmp(&b.manifest.name));
    Ok(packages)
}
