//! Skill catalog.
//!
//! A skill is one named side-effectful capability exposed to the model. Each
//! one carries typed metadata (JSON-schema parameters, risk level, rate
//! bucket, approval flag, per-turn cap) and three operations: validate,
//! execute, sanitize. The registry is populated once at startup and
//! read-only afterwards.

pub mod sanitize;

pub mod file_read;
pub mod file_write;
pub mod pdf_parse;
pub mod rag_ingest;
pub mod rag_search;
pub mod recall;
pub mod remember;
pub mod url_fetch;
pub mod web_search;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::llm::{ToolFunction, ToolSchema};
use crate::memory::{MemoryEntry, MemoryStore};
use crate::policy::RiskLevel;
use crate::vector::VectorCollection;

/// Reserved parameter key carrying the caller's identity. Injected by the
/// executor after validation so it never interferes with parameter checks.
pub const USER_ID_PARAM: &str = "_user_id";

// ---------------------------------------------------------------------------
// Metadata & results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SkillMetadata {
    pub name: &'static str,
    pub description: &'static str,
    pub risk_level: RiskLevel,
    /// Bucket key into the policy document's rate_limits section.
    pub rate_limit: &'static str,
    pub requires_approval: bool,
    /// Max times this skill fires within a single tool-loop turn.
    pub max_calls_per_turn: u32,
    /// JSON Schema for the accepted arguments.
    pub parameters: Value,
}

/// Typed result shapes skills hand to their own `sanitize`.
#[derive(Debug, Clone)]
pub enum SkillResult {
    /// Expected failure, rendered by sanitize rather than thrown.
    Error(String),
    FileContent {
        path: PathBuf,
        content: String,
        truncated: bool,
    },
    FileWritten {
        path: PathBuf,
        bytes_written: usize,
        appended: bool,
    },
    Document {
        path: PathBuf,
        pages: usize,
        text: String,
    },
    Page {
        url: String,
        status: u16,
        content: String,
    },
    SearchHits(Vec<SearchHit>),
    Documents(Vec<String>),
    Ingested {
        chunks_added: usize,
        source: String,
    },
    Remembered {
        kind: String,
        content: String,
    },
    Memories(Vec<MemoryEntry>),
    Text(String),
}

impl SkillResult {
    /// Last-resort rendering for a variant a sanitizer did not expect.
    pub fn fallback_text(&self) -> String {
        match self {
            Self::Error(msg) => msg.clone(),
            Self::Text(text) => text.clone(),
            other => format!("{other:?}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub title: String,
    pub content: String,
}

/// Shared services handed to every skill execution.
pub struct SkillContext {
    pub http: reqwest::Client,
    pub memory: Arc<MemoryStore>,
    pub knowledge: Arc<dyn VectorCollection>,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Skill: Send + Sync {
    fn metadata(&self) -> &SkillMetadata;

    /// Check parameters before execution. Returns the rejection reason on
    /// failure.
    fn validate(&self, params: &Value) -> std::result::Result<(), String>;

    /// Run the skill. Called only after every policy gate has passed.
    async fn execute(&self, params: Value, ctx: &SkillContext) -> Result<SkillResult>;

    /// Stringify and clean output before it re-enters model context. All
    /// external content is treated as adversarial.
    fn sanitize(&self, result: SkillResult) -> Result<String>;

    fn name(&self) -> &str {
        self.metadata().name
    }

    /// Tool-calling schema derived from metadata.
    fn tool_schema(&self) -> ToolSchema {
        let meta = self.metadata();
        ToolSchema {
            kind: "function".to_string(),
            function: ToolFunction {
                name: meta.name.to_string(),
                description: meta.description.to_string(),
                parameters: meta.parameters.clone(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Central skill registry. Registration order is preserved for the schema
/// list handed to the model.
pub struct SkillRegistry {
    order: Vec<&'static str>,
    skills: HashMap<&'static str, Arc<dyn Skill>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            skills: HashMap::new(),
        }
    }

    /// Register a skill. Panics on duplicate names — that is a wiring bug,
    /// not a runtime condition.
    pub fn register(&mut self, skill: Arc<dyn Skill>) {
        let name = skill.metadata().name;
        assert!(
            !self.skills.contains_key(name),
            "duplicate skill name: {name}"
        );
        self.order.push(name);
        self.skills.insert(name, skill);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Skill>> {
        self.skills.get(name).cloned()
    }

    /// Tool schemas for every registered skill, or None when the catalog is
    /// empty (so callers skip tool calling entirely).
    pub fn tool_schemas(&self) -> Option<Vec<ToolSchema>> {
        if self.order.is_empty() {
            return None;
        }
        Some(
            self.order
                .iter()
                .filter_map(|name| self.skills.get(name))
                .map(|s| s.tool_schema())
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

impl Default for SkillRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Shared parameter helpers
// ---------------------------------------------------------------------------

/// A required string parameter: present, a string, non-empty after trim.
pub(crate) fn require_str<'a>(
    params: &'a Value,
    key: &str,
) -> std::result::Result<&'a str, String> {
    let value = params
        .get(key)
        .ok_or_else(|| format!("Parameter '{key}' is required"))?;
    let s = value
        .as_str()
        .ok_or_else(|| format!("Parameter '{key}' must be a string"))?;
    if s.trim().is_empty() {
        return Err(format!("Parameter '{key}' must not be empty"));
    }
    Ok(s)
}

/// The caller identity injected by the executor.
pub(crate) fn user_id_of(params: &Value) -> String {
    params
        .get(USER_ID_PARAM)
        .and_then(|v| v.as_str())
        .unwrap_or("default")
        .to_string()
}


#[cfg(test)]
mod tests {
    use super::testing::MockSkill;
    use super::*;
    use serde_json::json;

    #[test]
    fn registry_register_get_and_schemas() {
        let mut registry = SkillRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.tool_schemas().is_none());

        registry.register(Arc::new(MockSkill::named("mock_a")));
        registry.register(Arc::new(MockSkill::named("mock_b")));

        assert_eq!(registry.len(), 2);
        assert!(registry.get("mock_a").is_some());
        assert!(registry.get("missing").is_none());

        let schemas = registry.tool_schemas().unwrap();
        assert_eq!(schemas.len(), 2);
        // Registration order is preserved.
        assert_eq!(schemas[0].function.name, "mock_a");
        assert_eq!(schemas[1].function.name, "mock_b");
        assert_eq!(schemas[0].kind, "function");
    }

    #[test]
    #[should_panic(expected = "duplicate skill name")]
    fn registry_rejects_duplicates() {
        let mut registry = SkillRegistry::new();
        registry.register(Arc::new(MockSkill::named("dup")));
        registry.register(Arc::new(MockSkill::named("dup")));
    }

    #[test]
    fn require_str_enforces_shape() {
        assert_eq!(require_str(&json!({"q": "x"}), "q").unwrap(), "x");
        assert!(require_str(&json!({}), "q").is_err());
        assert!(require_str(&json!({"q": 7}), "q").is_err());
        assert!(require_str(&json!({"q": "  "}), "q").is_err());
    }

    #[test]
    fn user_id_defaults_when_absent() {
        assert_eq!(user_id_of(&json!({})), "default");
        assert_eq!(user_id_of(&json!({(USER_ID_PARAM): "u9"})), "u9");
    }

    #[test]
    fn fallback_text_covers_variants() {
        assert_eq!(SkillResult::Error("oops".into()).fallback_text(), "oops");
        assert_eq!(SkillResult::Text("hi".into()).fallback_text(), "hi");
        let other = SkillResult::Documents(vec!["d".into()]);
        assert!(other.fallback_text().contains("Documents"));
    }
}
