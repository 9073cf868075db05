//! File read skill — reads a file from a readable zone.
//!
//! Zone membership is decided by the policy engine on the symlink-resolved
//! path, so a link inside an allowed zone pointing elsewhere is rejected.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::Result;
use crate::policy::{ActionKind, PolicyEngine, RiskLevel};

use super::sanitize::{clip, scrub};
use super::{Skill, SkillContext, SkillMetadata, SkillResult, require_str};

const MAX_READ_CHARS: usize = 20_000;

pub struct FileReadSkill {
    meta: SkillMetadata,
    policy: Arc<PolicyEngine>,
}

impl FileReadSkill {
    pub fn new(policy: Arc<PolicyEngine>) -> Self {
        Self {
            meta: SkillMetadata {
                name: "file_read",
                description: "Read the contents of a file. Allowed locations: the sandbox \
                              (agent workspace), identity files, and application code. Use \
                              this to inspect files, read notes, or load data.",
                risk_level: RiskLevel::Low,
                rate_limit: "file_read",
                requires_approval: false,
                max_calls_per_turn: 10,
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "Absolute path to the file to read.",
                        }
                    },
                    "required": ["path"],
                }),
            },
            policy,
        }
    }
}

#[async_trait]
impl Skill for FileReadSkill {
    fn metadata(&self) -> &SkillMetadata {
        &self.meta
    }

    fn validate(&self, params: &Value) -> std::result::Result<(), String> {
        let path = require_str(params, "path")?;
        let decision = self.policy.check_file_access(Path::new(path), ActionKind::Read);
        if !decision.is_allowed() {
            return Err(decision.reason);
        }
        Ok(())
    }

    async fn execute(&self, params: Value, _ctx: &SkillContext) -> Result<SkillResult> {
        let path = params.get("path").and_then(|v| v.as_str()).unwrap_or("");
        let path = PathBuf::from(path);
        let display = path.canonicalize().unwrap_or_else(|_| path.clone());

        match std::fs::read(&path) {
            Ok(bytes) => {
                let content = String::from_utf8_lossy(&bytes);
                let (content, truncated) = clip(&content, MAX_READ_CHARS);
                Ok(SkillResult::FileContent {
                    path: display,
                    content,
                    truncated,
                })
            }
            Err(e) => Ok(SkillResult::Error(match e.kind() {
                std::io::ErrorKind::NotFound => format!("File not found: {}", display.display()),
                std::io::ErrorKind::IsADirectory => {
                    format!("Path is a directory, not a file: {}", display.display())
                }
                std::io::ErrorKind::PermissionDenied => {
                    format!("Permission denied: {}", display.display())
                }
                _ => format!("Could not read file: {e}"),
            })),
        }
    }

    fn sanitize(&self, result: SkillResult) -> Result<String> {
        match result {
            SkillResult::Error(msg) => Ok(format!("[file_read] {msg}")),
            SkillResult::FileContent {
                path,
                content,
                truncated,
            } => {
                let suffix = if truncated {
                    format!("\n[truncated at {MAX_READ_CHARS} chars]")
                } else {
                    String::new()
                };
                Ok(format!("[{}]\n{}{suffix}", path.display(), scrub(&content)))
            }
            other => Ok(other.fallback_text()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::testing::context;

    fn policy_with_sandbox() -> (Arc<PolicyEngine>, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let sandbox = tmp.path().join("sandbox");
        std::fs::create_dir_all(&sandbox).unwrap();
        let doc = format!(
            "[zones.sandbox]\npath = \"{}\"\nread = \"allow\"\nwrite = \"allow\"\nexecute = \"deny\"\n",
            sandbox.display()
        );
        let policy_path = tmp.path().join("policy.toml");
        std::fs::write(&policy_path, doc).unwrap();
        let engine = Arc::new(PolicyEngine::load(&policy_path, None).unwrap());
        (engine, tmp)
    }

    #[tokio::test]
    async fn reads_a_sandbox_file() {
        let (policy, tmp) = policy_with_sandbox();
        let file = tmp.path().join("sandbox/notes.txt");
        std::fs::write(&file, "remember the milk").unwrap();

        let skill = FileReadSkill::new(policy);
        let params = json!({"path": file.to_str().unwrap()});
        skill.validate(&params).unwrap();
        let result = skill.execute(params, &context()).await.unwrap();
        let text = skill.sanitize(result).unwrap();
        assert!(text.contains("remember the milk"));
        assert!(text.contains("notes.txt"));
    }

    #[tokio::test]
    async fn rejects_paths_outside_zones() {
        let (policy, _tmp) = policy_with_sandbox();
        let skill = FileReadSkill::new(policy);
        let err = skill
            .validate(&json!({"path": "/etc/passwd"}))
            .unwrap_err();
        assert!(err.contains("outside all known zones"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rejects_symlink_escape() {
        let (policy, tmp) = policy_with_sandbox();
        let outside = tmp.path().join("outside.txt");
        std::fs::write(&outside, "secret").unwrap();
        let link = tmp.path().join("sandbox/link.txt");
        std::os::unix::fs::symlink(&outside, &link).unwrap();

        let skill = FileReadSkill::new(policy);
        let err = skill
            .validate(&json!({"path": link.to_str().unwrap()}))
            .unwrap_err();
        assert!(err.contains("outside all known zones"));
    }

    #[tokio::test]
    async fn missing_file_is_a_soft_error() {
        let (policy, tmp) = policy_with_sandbox();
        let skill = FileReadSkill::new(policy);
        let missing = tmp.path().join("sandbox/nope.txt");
        let result = skill
            .execute(json!({"path": missing.to_str().unwrap()}), &context())
            .await
            .unwrap();
        let text = skill.sanitize(result).unwrap();
        assert!(text.starts_with("[file_read] File not found:"));
    }

    #[tokio::test]
    async fn long_files_are_truncated() {
        let (policy, tmp) = policy_with_sandbox();
        let file = tmp.path().join("sandbox/big.txt");
        std::fs::write(&file, "z".repeat(30_000)).unwrap();

        let skill = FileReadSkill::new(policy);
        let result = skill
            .execute(json!({"path": file.to_str().unwrap()}), &context())
            .await
            .unwrap();
        let text = skill.sanitize(result).unwrap();
        assert!(text.ends_with("[truncated at 20000 chars]"));
    }
}
