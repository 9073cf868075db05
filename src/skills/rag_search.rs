//! RAG search skill — queries the local knowledge base.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::Result;
use crate::policy::RiskLevel;

use super::sanitize::{clip, scrub};
use super::{Skill, SkillContext, SkillMetadata, SkillResult, require_str};

const MAX_QUERY_CHARS: usize = 1000;
const MAX_OUTPUT_CHARS: usize = 2000;
const N_RESULTS: usize = 3;

pub struct RagSearchSkill {
    meta: SkillMetadata,
}

impl RagSearchSkill {
    pub fn new() -> Self {
        Self {
            meta: SkillMetadata {
                name: "rag_search",
                description: "Search the local knowledge base for documents relevant to a \
                              query. Use this when you need to look up information from \
                              uploaded or indexed documents.",
                risk_level: RiskLevel::Low,
                rate_limit: "rag_search",
                requires_approval: false,
                max_calls_per_turn: 5,
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "The search query to find relevant documents.",
                        }
                    },
                    "required": ["query"],
                }),
            },
        }
    }
}

impl Default for RagSearchSkill {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Skill for RagSearchSkill {
    fn metadata(&self) -> &SkillMetadata {
        &self.meta
    }

    fn validate(&self, params: &Value) -> std::result::Result<(), String> {
        let query = require_str(params, "query")?;
        if query.chars().count() > MAX_QUERY_CHARS {
            return Err(format!(
                "Parameter 'query' must be under {MAX_QUERY_CHARS} characters"
            ));
        }
        Ok(())
    }

    async fn execute(&self, params: Value, ctx: &SkillContext) -> Result<SkillResult> {
        let query = params.get("query").and_then(|v| v.as_str()).unwrap_or("");
        // A down knowledge base reads as "nothing found", not a hard failure.
        let documents = match ctx.knowledge.query(query, N_RESULTS, None).await {
            Ok(hits) => hits.into_iter().map(|h| h.document).collect(),
            Err(_) => Vec::new(),
        };
        Ok(SkillResult::Documents(documents))
    }

    fn sanitize(&self, result: SkillResult) -> Result<String> {
        match result {
            SkillResult::Documents(docs) => {
                if docs.is_empty() {
                    return Ok("No relevant documents found.".to_string());
                }
                let joined = scrub(&docs.join("\n\n"));
                let (mut joined, clipped) = clip(&joined, MAX_OUTPUT_CHARS);
                if clipped {
                    joined.push_str("\n[truncated]");
                }
                Ok(joined)
            }
            other => Ok(other.fallback_text()),
        }
    }
}
