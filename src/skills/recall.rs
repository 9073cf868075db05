//! Recall skill — semantic search over long-term agent memory.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::Result;
use crate::policy::RiskLevel;
use crate::store::now_secs;

use super::sanitize::scrub;
use super::{Skill, SkillContext, SkillMetadata, SkillResult, require_str, user_id_of};

const MAX_QUERY_CHARS: usize = 500;
const DEFAULT_RESULTS: usize = 5;

/// Format elapsed seconds as a short age string.
fn format_age(seconds: f64) -> String {
    if seconds < 60.0 {
        return "just now".to_string();
    }
    let minutes = seconds / 60.0;
    if minutes < 60.0 {
        return format!("{}m", minutes as u64);
    }
    let hours = minutes / 60.0;
    if hours < 24.0 {
        return format!("{}h", hours as u64);
    }
    let days = hours / 24.0;
    if days < 7.0 {
        return format!("{}d", days as u64);
    }
    let weeks = days / 7.0;
    if weeks < 4.3 {
        return format!("{}w", weeks as u64);
    }
    format!("{}mo", (days / 30.0) as u64)
}

pub struct RecallSkill {
    meta: SkillMetadata,
}

impl RecallSkill {
    pub fn new() -> Self {
        Self {
            meta: SkillMetadata {
                name: "recall",
                description: "Search long-term memory for stored facts, observations, or \
                              preferences. Use this to retrieve information remembered from \
                              previous conversations.",
                risk_level: RiskLevel::Low,
                rate_limit: "recall",
                requires_approval: false,
                max_calls_per_turn: 5,
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "What to search for in memory (max 500 chars).",
                        },
                        "n_results": {
                            "type": "integer",
                            "description": "Number of results to return (1-10, default 5).",
                        },
                    },
                    "required": ["query"],
                }),
            },
        }
    }
}

impl Default for RecallSkill {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Skill for RecallSkill {
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
        if let Some(n) = params.get("n_results") {
            let n = n
                .as_i64()
                .ok_or("Parameter 'n_results' must be an integer")?;
            if !(1..=10).contains(&n) {
                return Err("Parameter 'n_results' must be between 1 and 10".to_string());
            }
        }
        Ok(())
    }

    async fn execute(&self, params: Value, ctx: &SkillContext) -> Result<SkillResult> {
        let user_id = user_id_of(&params);
        let query = params.get("query").and_then(|v| v.as_str()).unwrap_or("");
        let n = params
            .get("n_results")
            .and_then(|v| v.as_i64())
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_RESULTS);

        match ctx.memory.search(query, &user_id, n).await {
            Ok(entries) => Ok(SkillResult::Memories(entries)),
            Err(e) => Ok(SkillResult::Error(e.to_string())),
        }
    }

    fn sanitize(&self, result: SkillResult) -> Result<String> {
        match result {
            SkillResult::Error(msg) => Ok(format!("[recall] {msg}")),
            SkillResult::Memories(entries) => {
                if entries.is_empty() {
                    return Ok("No memories found.".to_string());
                }
                let now = now_secs();
                let lines: Vec<String> = entries
                    .iter()
                    .enumerate()
                    .map(|(i, entry)| {
                        let age = format_age(now - entry.timestamp);
                        format!("{}. [{}, {age}] {}", i + 1, entry.kind, scrub(&entry.content))
                    })
                    .collect();
                Ok(lines.join("\n"))
            }
            other => Ok(other.fallback_text()),
        }
    }
}
