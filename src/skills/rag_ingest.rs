//! RAG ingest skill — adds text to the local knowledge base.
//!
//! Text is chunked with overlap before storage so retrieval granularity
//! matches what `rag_search` queries against.

use async_trait::async_trait;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::Result;
use crate::policy::RiskLevel;

use super::{Skill, SkillContext, SkillMetadata, SkillResult, require_str};

const MAX_TEXT_CHARS: usize = 50_000;
const CHUNK_SIZE: usize = 800;
const CHUNK_OVERLAP: usize = 100;

/// Split text into overlapping fixed-size chunks (in characters).
fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start = end - overlap;
    }
    chunks
}

pub struct RagIngestSkill {
    meta: SkillMetadata,
}

impl RagIngestSkill {
    pub fn new() -> Self {
        Self {
            meta: SkillMetadata {
                name: "rag_ingest",
                description: "Add text content to the local knowledge base so it can be \
                              retrieved later via rag_search. Use this to store facts, \
                              documents, or notes that should persist across conversations.",
                risk_level: RiskLevel::Low,
                rate_limit: "rag_ingest",
                requires_approval: false,
                max_calls_per_turn: 5,
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "text": {
                            "type": "string",
                            "description": "The text content to add to the knowledge base.",
                        },
                        "source": {
                            "type": "string",
                            "description": "Optional label for where this content came from \
                                            (e.g. 'user note', 'web article', 'conversation summary').",
                        },
                    },
                    "required": ["text"],
                }),
            },
        }
    }
}

impl Default for RagIngestSkill {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Skill for RagIngestSkill {
    fn metadata(&self) -> &SkillMetadata {
        &self.meta
    }

    fn validate(&self, params: &Value) -> std::result::Result<(), String> {
        let text = require_str(params, "text")?;
        if text.chars().count() > MAX_TEXT_CHARS {
            return Err(format!(
                "Parameter 'text' must be under {MAX_TEXT_CHARS} characters"
            ));
        }
        if let Some(source) = params.get("source") {
            if !source.is_string() {
                return Err("Parameter 'source' must be a string".to_string());
            }
        }
        Ok(())
    }

    async fn execute(&self, params: Value, ctx: &SkillContext) -> Result<SkillResult> {
        let text = params.get("text").and_then(|v| v.as_str()).unwrap_or("");
        let source = params
            .get("source")
            .and_then(|v| v.as_str())
            .unwrap_or("agent")
            .to_string();

        let chunks = chunk_text(text, CHUNK_SIZE, CHUNK_OVERLAP);
        let ids = chunks.iter().map(|_| Uuid::new_v4().to_string()).collect();
        let metadatas = chunks.iter().map(|_| json!({"source": source})).collect();

        match ctx.knowledge.add(chunks.clone(), ids, metadatas).await {
            Ok(()) => Ok(SkillResult::Ingested {
                chunks_added: chunks.len(),
                source,
            }),
            Err(e) => Ok(SkillResult::Error(e.to_string())),
        }
    }

    fn sanitize(&self, result: SkillResult) -> Result<String> {
        match result {
            SkillResult::Error(msg) => Ok(format!(
                "[rag_ingest] Failed to store in knowledge base: {msg}"
            )),
            SkillResult::Ingested {
                chunks_added,
                source,
            } => Ok(format!(
                "Added {chunks_added} chunk(s) to knowledge base (source: {source})."
            )),
            other => Ok(other.fallback_text()),
        }
    }
}
