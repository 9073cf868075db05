//! File write skill — writes or appends inside the sandbox zone.
//!
//! Writes elsewhere (identity, system) are not exposed through this skill;
//! under the default policy only the sandbox zone allows autonomous writes,
//! and identity-zone writes go through the proposal/approval flow instead.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::Result;
use crate::policy::{ActionKind, PolicyEngine, RiskLevel};

use super::{Skill, SkillContext, SkillMetadata, SkillResult, require_str};

const MAX_CONTENT_CHARS: usize = 100_000;

pub struct FileWriteSkill {
    meta: SkillMetadata,
    policy: Arc<PolicyEngine>,
}

impl FileWriteSkill {
    pub fn new(policy: Arc<PolicyEngine>) -> Self {
        Self {
            meta: SkillMetadata {
                name: "file_write",
                description: "Write or append content to a file in the sandbox (the agent's \
                              workspace). Creates the file and any missing parent directories \
                              automatically. Use mode='write' to create/overwrite, \
                              mode='append' to add to an existing file.",
                risk_level: RiskLevel::Low,
                rate_limit: "file_write",
                requires_approval: false,
                max_calls_per_turn: 10,
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "Absolute path within the sandbox to write to.",
                        },
                        "content": {
                            "type": "string",
                            "description": "Text content to write.",
                        },
                        "mode": {
                            "type": "string",
                            "description": "'write' (default, creates or overwrites) or 'append'.",
                            "enum": ["write", "append"],
                        },
                    },
                    "required": ["path", "content"],
                }),
            },
            policy,
        }
    }
}

fn mode_of(params: &Value) -> &str {
    params.get("mode").and_then(|v| v.as_str()).unwrap_or("write")
}

#[async_trait]
impl Skill for FileWriteSkill {
    fn metadata(&self) -> &SkillMetadata {
        &self.meta
    }

    fn validate(&self, params: &Value) -> std::result::Result<(), String> {
        let path = require_str(params, "path")?;

        let content = params
            .get("content")
            .ok_or("Parameter 'content' is required")?
            .as_str()
            .ok_or("Parameter 'content' must be a string")?;
        if content.chars().count() > MAX_CONTENT_CHARS {
            return Err(format!(
                "Parameter 'content' must be under {MAX_CONTENT_CHARS} characters"
            ));
        }

        if !matches!(mode_of(params), "write" | "append") {
            return Err("Parameter 'mode' must be 'write' or 'append'".to_string());
        }

        let decision = self
            .policy
            .check_file_access(Path::new(path), ActionKind::Write);
        if !decision.is_allowed() {
            return Err(decision.reason);
        }
        Ok(())
    }

    async fn execute(&self, params: Value, _ctx: &SkillContext) -> Result<SkillResult> {
        let path = PathBuf::from(params.get("path").and_then(|v| v.as_str()).unwrap_or(""));
        let content = params
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let appended = mode_of(&params) == "append";

        let write = || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .append(appended)
                .truncate(!appended)
                .open(&path)?;
            file.write_all(content.as_bytes())
        };

        match write() {
            Ok(()) => Ok(SkillResult::FileWritten {
                path: path.canonicalize().unwrap_or(path),
                bytes_written: content.len(),
                appended,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => Ok(
                SkillResult::Error(format!("Permission denied: {}", path.display())),
            ),
            Err(e) => Ok(SkillResult::Error(format!("Could not write file: {e}"))),
        }
    }

    fn sanitize(&self, result: SkillResult) -> Result<String> {
        match result {
            SkillResult::Error(msg) => Ok(format!("[file_write] {msg}")),
            SkillResult::FileWritten {
                path,
                bytes_written,
                appended,
            } => {
                let verb = if appended { "Appended" } else { "Written" };
                Ok(format!("{verb} {bytes_written} bytes to {}.", path.display()))
            }
            other => Ok(other.fallback_text()),
        }
    }
}
