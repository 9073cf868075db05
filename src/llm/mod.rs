//! Model endpoint client.
//!
//! The model runner is an opaque chat endpoint with tool-calling; everything
//! the runtime needs is behind the [`ChatModel`] trait so tests can script
//! replies and alternative backends can be dropped in without touching the
//! orchestrator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, WardenError};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::plain(Role::Tool, content)
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }
}

/// A model-emitted request to invoke one skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Arguments arrive either as a structured object or as a JSON-encoded
    /// string depending on the model; the orchestrator normalizes.
    #[serde(default)]
    pub arguments: Value,
}

/// Tool-calling schema advertised to the model, derived from skill metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: ToolFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// One model reply plus the endpoint's token metrics.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub message: ChatMessage,
    pub eval_count: u64,
    pub prompt_eval_count: u64,
    pub total_duration_ms: f64,
}

// ---------------------------------------------------------------------------
// Trait + HTTP client
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolSchema]>,
        num_ctx: usize,
    ) -> Result<ChatReply>;
}

/// Ollama-compatible chat endpoint client.
pub struct OllamaChat {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaChat {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolSchema]>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    num_ctx: usize,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: ChatMessage,
    #[serde(default)]
    eval_count: u64,
    #[serde(default)]
    prompt_eval_count: u64,
    /// Nanoseconds, per the endpoint's contract.
    #[serde(default)]
    total_duration: u64,
}

#[async_trait]
impl ChatModel for OllamaChat {
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolSchema]>,
        num_ctx: usize,
    ) -> Result<ChatReply> {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let body = OllamaRequest {
            model,
            messages,
            tools,
            stream: false,
            options: OllamaOptions { num_ctx },
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| WardenError::Model(format!("chat endpoint unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(WardenError::Model(format!(
                "chat endpoint returned {}",
                response.status()
            )));
        }

        let parsed: OllamaResponse = response
            .json()
            .await
            .map_err(|e| WardenError::Model(format!("malformed chat response: {e}")))?;

        Ok(ChatReply {
            message: parsed.message,
            eval_count: parsed.eval_count,
            prompt_eval_count: parsed.prompt_eval_count,
            total_duration_ms: parsed.total_duration as f64 / 1_000_000.0,
        })
    }
}
