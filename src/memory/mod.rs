//! Long-term agent memory.
//!
//! A thin façade over the `agent_memory` vector collection, kept separate
//! from the `rag_data` knowledge base so agent memories don't pollute user
//! documents. Entries are scoped per user and carry a type, source, and
//! timestamp.
//!
//! All content passes through [`sanitize_memory`] before storage; content
//! carrying prompt-injection patterns is rejected outright rather than
//! cleaned, so a poisoned snippet can never become a trusted memory.

use std::sync::{Arc, LazyLock};

use regex::{Regex, RegexBuilder};
use serde_json::json;
use uuid::Uuid;

use crate::error::{Result, WardenError};
use crate::store::now_secs;
use crate::vector::VectorCollection;

pub const MEMORY_COLLECTION: &str = "agent_memory";

// ---------------------------------------------------------------------------
// Sanitizer
// ---------------------------------------------------------------------------

static INJECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"ignore\s+(previous|prior|all)\s+instructions?",
        r"system\s*prompt",
        r"disregard\s+instructions?",
        r"you\s+are\s+now\b",
        r"new\s+instructions?:",
        r"<\s*/?system",
        r"\[INST\]",
        r"<<SYS>>",
    ]
    .iter()
    .map(|p| {
        RegexBuilder::new(p)
            .case_insensitive(true)
            .build()
            .expect("injection pattern must compile")
    })
    .collect()
});

static CTRL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x00-\x08\x0b\x0c\x0e-\x1f\x7f]").unwrap());
static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static EXCESS_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]{2,}").unwrap());

/// Clean content for storage in long-term memory.
///
/// Order matters: injection patterns are checked before HTML stripping so
/// markers like `<<SYS>>` are still intact when inspected.
pub fn sanitize_memory(content: &str) -> Result<String> {
    let cleaned = CTRL_CHARS.replace_all(content, "");

    for pattern in INJECTION_PATTERNS.iter() {
        if pattern.is_match(&cleaned) {
            return Err(WardenError::MemoryPoisoned(
                "content contains a potential prompt-injection pattern".into(),
            ));
        }
    }

    let cleaned = HTML_TAG.replace_all(&cleaned, "");
    let cleaned = EXCESS_SPACE.replace_all(&cleaned, " ");
    Ok(cleaned.trim().to_string())
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MemoryEntry {
    pub content: String,
    pub kind: String,
    pub timestamp: f64,
}

pub struct MemoryStore {
    collection: Arc<dyn VectorCollection>,
}

impl MemoryStore {
    pub fn new(collection: Arc<dyn VectorCollection>) -> Self {
        Self { collection }
    }

    /// Store one memory entry. Returns the generated memory id.
    pub async fn add(
        &self,
        content: &str,
        kind: &str,
        user_id: &str,
        source: &str,
    ) -> Result<String> {
        let memory_id = Uuid::new_v4().to_string();
        self.collection
            .add(
                vec![content.to_string()],
                vec![memory_id.clone()],
                vec![json!({
                    "user_id": user_id,
                    "type": kind,
                    "source": source,
                    "timestamp": now_secs(),
                })],
            )
            .await?;
        Ok(memory_id)
    }

    /// Semantic search over one user's memories.
    pub async fn search(&self, query: &str, user_id: &str, n: usize) -> Result<Vec<MemoryEntry>> {
        let hits = self
            .collection
            .query(query, n, Some(json!({"user_id": user_id})))
            .await?;
        Ok(hits.into_iter().map(to_entry).collect())
    }

    /// The most recent memories for a user, newest first.
    pub async fn recent(&self, user_id: &str, n: usize) -> Result<Vec<MemoryEntry>> {
        let hits = self
            .collection
            .get(json!({"user_id": user_id}), 50)
            .await?;
        let mut entries: Vec<MemoryEntry> = hits.into_iter().map(to_entry).collect();
        entries.sort_by(|a, b| b.timestamp.total_cmp(&a.timestamp));
        entries.truncate(n);
        Ok(entries)
    }
}

fn to_entry(hit: crate::vector::VectorHit) -> MemoryEntry {
    MemoryEntry {
        content: hit.document,
        kind: hit.metadata["type"].as_str().unwrap_or("fact").to_string(),
        timestamp: hit.metadata["timestamp"].as_f64().unwrap_or(0.0),
    }
}
