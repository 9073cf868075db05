//! PDF parse skill — extracts text from a PDF in the sandbox zone.
//!
//! Pure in-process extraction, no shell calls. Restricted to the sandbox so
//! the model cannot read sensitive PDFs outside its workspace.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::Result;
use crate::policy::{PolicyEngine, RiskLevel, Zone};

use super::sanitize::{clip, scrub};
use super::{Skill, SkillContext, SkillMetadata, SkillResult, require_str};

const MAX_OUTPUT_CHARS: usize = 20_000;

pub struct PdfParseSkill {
    meta: SkillMetadata,
    policy: Arc<PolicyEngine>,
}

impl PdfParseSkill {
    pub fn new(policy: Arc<PolicyEngine>) -> Self {
        Self {
            meta: SkillMetadata {
                name: "pdf_parse",
                description: "Extract and return the text content of a PDF file in the \
                              sandbox. Use this to read documents, papers, or reports that \
                              have been saved to the workspace.",
                risk_level: RiskLevel::Low,
                rate_limit: "pdf_parse",
                requires_approval: false,
                max_calls_per_turn: 5,
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "Absolute path to the PDF file in the sandbox.",
                        }
                    },
                    "required": ["path"],
                }),
            },
            policy,
        }
    }
}

fn extract_pdf_text(path: &Path) -> std::result::Result<(String, usize), String> {
    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => format!("File not found: {}", path.display()),
        _ => format!("Could not read PDF: {e}"),
    })?;

    let reader = oxidize_pdf::parser::reader::PdfReader::new(Cursor::new(bytes))
        .map_err(|e| format!("Could not parse PDF: {e}"))?;
    let doc = oxidize_pdf::parser::document::PdfDocument::new(reader);
    let page_count = doc
        .page_count()
        .map_err(|e| format!("Could not parse PDF: {e}"))? as usize;

    let mut text = String::new();
    for i in 0..page_count as u32 {
        // Pages that are scans or pure images fail extraction; skip them
        // rather than failing the whole document.
        if let Ok(extracted) = doc.extract_text_from_page(i) {
            if !text.is_empty() && !extracted.text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str(&extracted.text);
        }
    }
    Ok((text, page_count))
}

#[async_trait]
impl Skill for PdfParseSkill {
    fn metadata(&self) -> &SkillMetadata {
        &self.meta
    }

    fn validate(&self, params: &Value) -> std::result::Result<(), String> {
        let path = require_str(params, "path")?;
        if !path.to_lowercase().ends_with(".pdf") {
            return Err("Parameter 'path' must point to a .pdf file".to_string());
        }
        if self.policy.resolve_zone(Path::new(path)) != Zone::Sandbox {
            return Err(format!(
                "pdf_parse is restricted to the sandbox zone (got '{path}')"
            ));
        }
        Ok(())
    }

    async fn execute(&self, params: Value, _ctx: &SkillContext) -> Result<SkillResult> {
        let path = PathBuf::from(params.get("path").and_then(|v| v.as_str()).unwrap_or(""));
        let display = path.canonicalize().unwrap_or_else(|_| path.clone());
        match extract_pdf_text(&path) {
            Ok((text, pages)) => Ok(SkillResult::Document {
                path: display,
                pages,
                text,
            }),
            Err(reason) => Ok(SkillResult::Error(reason)),
        }
    }

    fn sanitize(&self, result: SkillResult) -> Result<String> {
        match result {
            SkillResult::Error(msg) => Ok(format!("[pdf_parse] {msg}")),
            SkillResult::Document { path, pages, text } => {
                let (mut text, clipped) = clip(&scrub(&text), MAX_OUTPUT_CHARS);
                if clipped {
                    text.push_str("\n[truncated]");
                }
                let plural = if pages == 1 { "" } else { "s" };
                Ok(format!("[{}] ({pages} page{plural})\n\n{text}", path.display()))
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
        (Arc::new(PolicyEngine::load(&policy_path, None).unwrap()), tmp)
    }

    #[test]
    fn validate_requires_pdf_in_sandbox() {
        let (policy, tmp) = policy_with_sandbox();
        let skill = PdfParseSkill::new(policy);

        let inside = tmp.path().join("sandbox/report.pdf");
        assert!(skill.validate(&json!({"path": inside.to_str().unwrap()})).is_ok());

        let wrong_ext = tmp.path().join("sandbox/report.txt");
        assert!(skill.validate(&json!({"path": wrong_ext.to_str().unwrap()})).is_err());

        assert!(skill.validate(&json!({"path": "/etc/report.pdf"})).is_err());
        assert!(skill.validate(&json!({})).is_err());
    }

    #[tokio::test]
    async fn missing_pdf_is_a_soft_error() {
        let (policy, tmp) = policy_with_sandbox();
        let skill = PdfParseSkill::new(policy);
        let missing = tmp.path().join("sandbox/nope.pdf");
        let result = skill
            .execute(json!({"path": missing.to_str().unwrap()}), &context())
            .await
            .unwrap();
        let text = skill.sanitize(result).unwrap();
        assert!(text.starts_with("[pdf_parse] File not found:"));
    }

    #[tokio::test]
    async fn garbage_bytes_are_a_soft_error() {
        let (policy, tmp) = policy_with_sandbox();
        let skill = PdfParseSkill::new(policy);
        let bogus = tmp.path().join("sandbox/bogus.pdf");
        std::fs::write(&bogus, b"not a pdf at all").unwrap();
        let result = skill
            .execute(json!({"path": bogus.to_str().unwrap()}), &context())
            .await
            .unwrap();
        let text = skill.sanitize(result).unwrap();
        assert!(text.starts_with("[pdf_parse] Could not parse PDF:"));
    }

    #[test]
    fn sanitize_formats_documents() {
        let (policy, _tmp) = policy_with_sandbox();
        let skill = PdfParseSkill::new(policy);
        let doc = SkillResult::Document {
            path: PathBuf::from("/sandbox/paper.pdf"),
            pages: 2,
            text: "Abstract.\n\nBody text.".into(),
        };
        let text = skill.sanitize(doc).unwrap();
        assert!(text.starts_with("[/sandbox/paper.pdf] (2 pages)"));
        assert!(text.contains("Abstract."));

        let single = SkillResult::Document {
            path: PathBuf::from("/sandbox/one.pdf"),
            pages: 1,
            text: "x".repeat(30_000),
        };
        let text = skill.sanitize(single).unwrap();
        assert!(text.contains("(1 page)"));
        assert!(text.ends_with("\n[truncated]"));
    }
}
