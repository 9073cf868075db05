//! Remember skill — store facts, observations, and preferences to long-term
//! memory. Content is poison-checked at validation and again at execution;
//! a snippet carrying injection patterns is rejected, never stored.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::Result;
use crate::memory::sanitize_memory;
use crate::policy::RiskLevel;

use super::{Skill, SkillContext, SkillMetadata, SkillResult, require_str, user_id_of};

const MAX_CONTENT_CHARS: usize = 1000;
const VALID_TYPES: &[&str] = &["fact", "observation", "preference"];

pub struct RememberSkill {
    meta: SkillMetadata,
}

impl RememberSkill {
    pub fn new() -> Self {
        Self {
            meta: SkillMetadata {
                name: "remember",
                description: "Store a fact, observation, or preference to long-term memory. \
                              Use this to remember important details about the user or \
                              conversation that should persist across sessions.",
                risk_level: RiskLevel::Low,
                rate_limit: "remember",
                requires_approval: false,
                max_calls_per_turn: 5,
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "content": {
                            "type": "string",
                            "description": "The fact or observation to remember (max 1000 chars).",
                        },
                        "type": {
                            "type": "string",
                            "enum": ["fact", "observation", "preference"],
                            "description": "Category of memory: fact, observation, or preference.",
                        },
                    },
                    "required": ["content"],
                }),
            },
        }
    }
}

impl Default for RememberSkill {
    fn default() -> Self {
        Self::new()
    }
}

fn kind_of(params: &Value) -> &str {
    params.get("type").and_then(|v| v.as_str()).unwrap_or("fact")
}

#[async_trait]
impl Skill for RememberSkill {
    fn metadata(&self) -> &SkillMetadata {
        &self.meta
    }

    fn validate(&self, params: &Value) -> std::result::Result<(), String> {
        let content = require_str(params, "content")?;
        if content.chars().count() > MAX_CONTENT_CHARS {
            return Err(format!(
                "Parameter 'content' must be under {MAX_CONTENT_CHARS} characters"
            ));
        }
        if !VALID_TYPES.contains(&kind_of(params)) {
            return Err(format!(
                "Parameter 'type' must be one of: {}",
                VALID_TYPES.join(", ")
            ));
        }
        sanitize_memory(content).map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn execute(&self, params: Value, ctx: &SkillContext) -> Result<SkillResult> {
        let user_id = user_id_of(&params);
        let content = params.get("content").and_then(|v| v.as_str()).unwrap_or("");
        let kind = kind_of(&params).to_string();

        let cleaned = match sanitize_memory(content) {
            Ok(c) => c,
            Err(e) => return Ok(SkillResult::Error(e.to_string())),
        };

        match ctx.memory.add(&cleaned, &kind, &user_id, "agent").await {
            Ok(_memory_id) => Ok(SkillResult::Remembered {
                kind,
                content: cleaned,
            }),
            Err(e) => Ok(SkillResult::Error(e.to_string())),
        }
    }

    fn sanitize(&self, result: SkillResult) -> Result<String> {
        match result {
            SkillResult::Error(msg) => Ok(format!("[remember] {msg}")),
            SkillResult::Remembered { kind, content } => {
                let preview: String = content.chars().take(100).collect();
                Ok(format!("Stored {kind}: {preview}"))
            }
            other => Ok(other.fallback_text()),
        }
    }
}
