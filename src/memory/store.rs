//! In-memory implementation of the [`Memory`] trait, with optional durable
//! JSON-file backing (§4.3: "all writes are persisted incrementally"; §6:
//! the persisted state layout names a "memory file (entries)" alongside the
//! action queue file).
//!
//! [`InMemoryStore`] keeps all entries in a `RwLock<Vec>` and performs hybrid
//! retrieval: 70 % vector similarity + 30 % keyword frequency for
//! [`Memory::semantic_search`]. When constructed with [`InMemoryStore::new_with_path`]
//! it also flushes its full entry set and contact-profile table to disk after
//! every mutation, atomically (write-tmp-then-rename), mirroring
//! [`crate::action_queue::JsonActionQueue`]'s save discipline; without a path
//! it behaves exactly as before (development, testing, in-process use). A
//! future `SqliteMemory` implementation can replace either mode behind the
//! same trait.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{
    embeddings::{EmbeddingProvider, MockEmbeddingProvider, cosine_similarity},
    traits::{Memory, MemoryEntry, MemoryKind, meta_keys},
};

/// Number of short entries in a scope that triggers consolidation.
pub const DEFAULT_CONSOLIDATION_THRESHOLD: usize = 40;
/// Number of oldest short entries folded into one episodic summary.
pub const DEFAULT_CONSOLIDATION_BATCH: usize = 20;

#[derive(Clone, Serialize, Deserialize)]
struct InternalEntry {
    entry: MemoryEntry,
    embedding: Vec<f32>,
}

/// On-disk shape written by [`InMemoryStore::persist`] and read back by
/// [`InMemoryStore::new_with_path`]. Embeddings are persisted alongside
/// their entry so a restart never needs to re-embed existing content.
#[derive(Default, Serialize, Deserialize)]
struct PersistedState {
    #[serde(default)]
    entries: Vec<InternalEntry>,
    #[serde(default)]
    contact_profiles: HashMap<String, String>,
}

/// `Vec`-backed, thread-safe memory store.
pub struct InMemoryStore {
    entries: RwLock<Vec<InternalEntry>>,
    /// Contact profile text, keyed by channel jid/user id.
    contact_profiles: RwLock<std::collections::HashMap<String, String>>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    consolidation_threshold: usize,
    consolidation_batch: usize,
    /// When set, every mutation is flushed to this path (write-tmp-then-rename).
    path: Option<PathBuf>,
}

impl InMemoryStore {
    pub fn new(embedding_provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            contact_profiles: RwLock::new(std::collections::HashMap::new()),
            embedding_provider,
            consolidation_threshold: DEFAULT_CONSOLIDATION_THRESHOLD,
            consolidation_batch: DEFAULT_CONSOLIDATION_BATCH,
            path: None,
        }
    }

    /// Convenience constructor using the [`MockEmbeddingProvider`] (no external API calls).
    pub fn new_mock() -> Self {
        Self::new(Arc::new(MockEmbeddingProvider::new()))
    }

    /// Load (if present) an existing snapshot at `path` and persist every
    /// subsequent mutation back to it atomically. This is the durable
    /// counterpart to [`Self::new`]: restarting the process re-reads the
    /// same entries and contact profiles rather than losing them.
    pub fn new_with_path(
        embedding_provider: Arc<dyn EmbeddingProvider>,
        path: PathBuf,
    ) -> Result<Self, String> {
        let state = load_state(&path)?;
        Ok(Self {
            entries: RwLock::new(state.entries),
            contact_profiles: RwLock::new(state.contact_profiles),
            embedding_provider,
            consolidation_threshold: DEFAULT_CONSOLIDATION_THRESHOLD,
            consolidation_batch: DEFAULT_CONSOLIDATION_BATCH,
            path: Some(path),
        })
    }

    pub fn with_consolidation(mut self, threshold: usize, batch: usize) -> Self {
        self.consolidation_threshold = threshold;
        self.consolidation_batch = batch;
        self
    }

    /// Flush the current entries and contact profiles to `self.path`, if
    /// configured. A no-op for the in-memory-only (no path) mode.
    fn persist(&self) -> Result<(), String> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let entries = self.entries.read().map_err(|e| e.to_string())?.clone();
        let contact_profiles = self.contact_profiles.read().map_err(|e| e.to_string())?.clone();
        save_state(path, &PersistedState { entries, contact_profiles })
    }
}

fn load_state(path: &std::path::Path) -> Result<PersistedState, String> {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content)
            .map_err(|e| format!("corrupt memory store at {path:?}: {e}")),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PersistedState::default()),
        Err(e) => Err(format!("failed to read memory store at {path:?}: {e}")),
    }
}

fn save_state(path: &std::path::Path, state: &PersistedState) -> Result<(), String> {
    let content = serde_json::to_string_pretty(state)
        .map_err(|e| format!("failed to serialise memory store: {e}"))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("failed to create memory dir: {e}"))?;
    }

    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &content)
        .map_err(|e| format!("failed to write temp memory store: {e}"))?;
    fs::rename(&tmp_path, path)
        .map_err(|e| format!("failed to replace memory store file: {e}"))?;
    Ok(())
}

#[async_trait]
impl Memory for InMemoryStore {
    async fn save(&self, mut entry: MemoryEntry) -> Result<String, String> {
        let embedding = self.embedding_provider.embed(&entry.content).await?;

        let id = {
            let mut entries = self.entries.write().map_err(|e| e.to_string())?;

            // Long entries with a conceptId are idempotent upserts.
            let existing_idx = (entry.kind == MemoryKind::Long)
                .then(|| entry.concept_id().map(|c| c.to_string()))
                .flatten()
                .and_then(|concept_id| {
                    entries
                        .iter()
                        .position(|ie| ie.entry.kind == MemoryKind::Long && ie.entry.concept_id() == Some(concept_id.as_str()))
                });

            match existing_idx {
                Some(idx) => {
                    entry.id = entries[idx].entry.id.clone();
                    entries[idx] = InternalEntry { entry: entry.clone(), embedding };
                    entry.id
                }
                None => {
                    let id = entry.id.clone();
                    entries.push(InternalEntry { entry, embedding });
                    id
                }
            }
        };

        self.persist()?;
        Ok(id)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<MemoryEntry>, String> {
        let entries = self.entries.read().map_err(|e| e.to_string())?;
        let mut all: Vec<MemoryEntry> = entries.iter().map(|ie| ie.entry.clone()).collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(limit);
        Ok(all)
    }

    async fn by_action(&self, action_id: &str) -> Result<Vec<MemoryEntry>, String> {
        let entries = self.entries.read().map_err(|e| e.to_string())?;
        Ok(entries
            .iter()
            .filter(|ie| ie.entry.action_id() == Some(action_id))
            .map(|ie| ie.entry.clone())
            .collect())
    }

    async fn by_scope(&self, session_scope_id: &str, limit: usize) -> Result<Vec<MemoryEntry>, String> {
        let entries = self.entries.read().map_err(|e| e.to_string())?;
        let mut scoped: Vec<MemoryEntry> = entries
            .iter()
            .filter(|ie| ie.entry.session_scope_id() == Some(session_scope_id))
            .map(|ie| ie.entry.clone())
            .collect();
        scoped.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        scoped.truncate(limit);
        Ok(scoped)
    }

    async fn search(&self, kind: MemoryKind, predicate: Option<&str>) -> Result<Vec<MemoryEntry>, String> {
        let entries = self.entries.read().map_err(|e| e.to_string())?;
        let needle = predicate.map(|p| p.to_lowercase());
        Ok(entries
            .iter()
            .filter(|ie| ie.entry.kind == kind)
            .filter(|ie| match &needle {
                Some(n) => ie.entry.content.to_lowercase().contains(n),
                None => true,
            })
            .map(|ie| ie.entry.clone())
            .collect())
    }

    async fn semantic_search(&self, query: &str, limit: usize) -> Result<Vec<MemoryEntry>, String> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedding_provider.embed(query).await?;
        let query_words: Vec<String> = query.split_whitespace().map(|w| w.to_lowercase()).collect();

        let entries = self.entries.read().map_err(|e| e.to_string())?;

        let mut scored: Vec<MemoryEntry> = entries
            .iter()
            .map(|ie| {
                let vector_score = cosine_similarity(&query_embedding, &ie.embedding);
                let bm25_score = keyword_score(&query_words, &ie.entry.content);
                let mut e = ie.entry.clone();
                e.score = 0.7 * vector_score + 0.3 * bm25_score;
                e
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn consolidate(&self, scope: &str) -> Result<Option<MemoryEntry>, String> {
        let oldest_batch: Vec<MemoryEntry> = {
            let entries = self.entries.read().map_err(|e| e.to_string())?;
            let mut scoped: Vec<&MemoryEntry> = entries
                .iter()
                .map(|ie| &ie.entry)
                .filter(|e| e.kind == MemoryKind::Short && e.session_scope_id() == Some(scope) && !e.is_consolidated())
                .collect();
            if scoped.len() < self.consolidation_threshold {
                return Ok(None);
            }
            scoped.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            scoped
                .into_iter()
                .take(self.consolidation_batch)
                .cloned()
                .collect()
        };

        if oldest_batch.is_empty() {
            return Ok(None);
        }

        // Summarisation is a plain textual rollup here; the reasoning loop's
        // LLM-backed consolidation pass (where configured) replaces this
        // content before calling `save` a second time with richer prose.
        let summary_text = oldest_batch
            .iter()
            .map(|e| format!("- {}", e.content))
            .collect::<Vec<_>>()
            .join("\n");

        let summary = MemoryEntry::new(
            MemoryKind::Episodic,
            format!("Consolidated {} entries:\n{summary_text}", oldest_batch.len()),
        )
        .with_meta(meta_keys::SESSION_SCOPE_ID, scope);

        let embedding = self.embedding_provider.embed(&summary.content).await?;
        {
            let mut entries = self.entries.write().map_err(|e| e.to_string())?;
            let consolidated_ids: std::collections::HashSet<&str> =
                oldest_batch.iter().map(|e| e.id.as_str()).collect();
            for ie in entries.iter_mut() {
                if consolidated_ids.contains(ie.entry.id.as_str()) {
                    ie.entry.metadata.insert(meta_keys::CONSOLIDATED.to_string(), true.into());
                }
            }
            entries.push(InternalEntry { entry: summary.clone(), embedding });
        }
        self.persist()?;
        Ok(Some(summary))
    }

    async fn contact_profile(&self, jid: &str) -> Result<Option<String>, String> {
        let profiles = self.contact_profiles.read().map_err(|e| e.to_string())?;
        Ok(profiles.get(jid).cloned())
    }

    async fn set_contact_profile(&self, jid: &str, text: &str) -> Result<(), String> {
        {
            let mut profiles = self.contact_profiles.write().map_err(|e| e.to_string())?;
            profiles.insert(jid.to_string(), text.to_string());
        }
        self.persist()
    }

    async fn user_context(&self) -> Result<String, String> {
        let entries = self.entries.read().map_err(|e| e.to_string())?;
        let mut long: Vec<&MemoryEntry> = entries
            .iter()
            .map(|ie| &ie.entry)
            .filter(|e| e.kind == MemoryKind::Long)
            .collect();
        long.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(long
            .into_iter()
            .map(|e| e.content.clone())
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn forget(&self, id: &str) -> Result<bool, String> {
        let removed = {
            let mut entries = self.entries.write().map_err(|e| e.to_string())?;
            let before = entries.len();
            entries.retain(|ie| ie.entry.id != id);
            entries.len() != before
        };
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    async fn store_daily(&self, content: &str) -> Result<(), String> {
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let entry = MemoryEntry::new(MemoryKind::Short, content).with_meta("dailyDate", date);
        self.save(entry).await.map(|_| ())
    }

    async fn recall_daily(&self, date: &str) -> Result<Option<String>, String> {
        let entries = self.entries.read().map_err(|e| e.to_string())?;
        let mut matches: Vec<&MemoryEntry> = entries
            .iter()
            .map(|ie| &ie.entry)
            .filter(|e| e.metadata.get("dailyDate").and_then(|v| v.as_str()) == Some(date))
            .collect();
        if matches.is_empty() {
            return Ok(None);
        }
        matches.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(Some(
            matches.into_iter().map(|e| e.content.clone()).collect::<Vec<_>>().join("\n\n"),
        ))
    }
}

/// Simple normalised term-frequency score: fraction of query words that
/// appear in `content` (case-insensitive). Returns a value in `[0, 1]`.
fn keyword_score(query_words: &[String], content: &str) -> f32 {
    if query_words.is_empty() {
        return 0.0;
    }
    let content_lower = content.to_lowercase();
    let matches = query_words.iter().filter(|w| content_lower.contains(w.as_str())).count();
    matches as f32 / query_words.len() as f32
}
