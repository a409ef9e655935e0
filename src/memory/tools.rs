//! Agent-callable tools backed by the memory subsystem.
//!
//! These expose the [`Memory`] trait to the reasoning loop so the LLM can
//! save, retrieve, and delete facts while working an action.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::tools::{Tool, ToolResult};

use super::traits::{Memory, MemoryEntry, MemoryKind};

// ─── MemoryStoreTool ─────────────────────────────────────────────────────────

/// Agent tool: save a fact to memory.
///
/// Parameters (JSON object):
/// - `content` — text to store (required)
/// - `kind`    — one of `"short"`, `"episodic"`, `"long"` (optional, default `"short"`)
/// - `concept_id` — stable key for idempotent upsert of `long` entries (optional)
pub struct MemoryStoreTool {
    memory: Arc<dyn Memory>,
}

impl MemoryStoreTool {
    pub fn new(memory: Arc<dyn Memory>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for MemoryStoreTool {
    fn name(&self) -> &str {
        "memory_store"
    }

    fn description(&self) -> &str {
        "Save a fact to the agent's persistent memory. Use 'long' with a concept_id \
         for durable user facts and preferences; use 'short' for session-local notes."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["content"],
            "properties": {
                "content": {
                    "type": "string",
                    "description": "Text content to store."
                },
                "kind": {
                    "type": "string",
                    "description": "Memory tier: 'short', 'episodic', or 'long'. Defaults to 'short'.",
                    "default": "short"
                },
                "concept_id": {
                    "type": "string",
                    "description": "Stable key for 'long' entries; saving again with the same concept_id replaces the prior value."
                }
            }
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let content = args
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or("missing required parameter 'content'")?;
        let kind = parse_kind(args.get("kind").and_then(|v| v.as_str()));

        let mut entry = MemoryEntry::new(kind, content);
        if let Some(concept_id) = args.get("concept_id").and_then(|v| v.as_str()) {
            entry = entry.with_meta(super::traits::meta_keys::CONCEPT_ID, concept_id);
        }

        let id = self.memory.save(entry).await?;
        Ok(ToolResult::ok(format!("Stored memory {id}")))
    }
}

// ─── MemoryRecallTool ─────────────────────────────────────────────────────────

/// Agent tool: search memory by semantic query.
///
/// Parameters (JSON object):
/// - `query` — natural-language search query (required)
/// - `limit` — maximum number of results to return (optional, default 5)
pub struct MemoryRecallTool {
    memory: Arc<dyn Memory>,
}

impl MemoryRecallTool {
    pub fn new(memory: Arc<dyn Memory>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for MemoryRecallTool {
    fn name(&self) -> &str {
        "memory_recall"
    }

    fn description(&self) -> &str {
        "Search the agent's persistent memory for entries relevant to a query. \
         Returns the most relevant facts sorted by relevance score."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["query"],
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Natural-language search query."
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of results to return. Default: 5.",
                    "default": 5,
                    "minimum": 1,
                    "maximum": 50
                }
            }
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or("missing required parameter 'query'")?;
        let limit = args.get("limit").and_then(|v| v.as_u64()).unwrap_or(5) as usize;

        let entries = self.memory.semantic_search(query, limit).await?;
        if entries.is_empty() {
            return Ok(ToolResult::ok("No matching memories found."));
        }

        let lines: Vec<String> = entries
            .iter()
            .map(|e| format!("[{:.2}] ({}) {}", e.score, e.kind, e.content))
            .collect();
        Ok(ToolResult::ok(lines.join("\n")))
    }
}

// ─── MemoryForgetTool ─────────────────────────────────────────────────────────

/// Agent tool: remove a memory entry by id.
///
/// Parameters (JSON object):
/// - `id` — id of the entry to remove (required)
pub struct MemoryForgetTool {
    memory: Arc<dyn Memory>,
}

impl MemoryForgetTool {
    pub fn new(memory: Arc<dyn Memory>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for MemoryForgetTool {
    fn name(&self) -> &str {
        "memory_forget"
    }

    fn description(&self) -> &str {
        "Remove an entry from the agent's persistent memory by its id."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["id"],
            "properties": {
                "id": {
                    "type": "string",
                    "description": "The id of the memory entry to remove."
                }
            }
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let id = args
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or("missing required parameter 'id'")?;

        let found = self.memory.forget(id).await?;
        if found {
            Ok(ToolResult::ok(format!("Removed memory: {id}")))
        } else {
            Ok(ToolResult::ok(format!("No memory entry found with id: {id}")))
        }
    }
}

// ─── helpers ─────────────────────────────────────────────────────────────────

fn parse_kind(s: Option<&str>) -> MemoryKind {
    match s {
        Some("episodic") => MemoryKind::Episodic,
        Some("long") => MemoryKind::Long,
        _ => MemoryKind::Short,
    }
}
