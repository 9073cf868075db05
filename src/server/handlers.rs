use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::error;

use crate::llm::ChatMessage;
use crate::runner::{LoopOptions, run_tool_loop};
use crate::trace::{self, TraceContext};

use super::AppState;

const CLI_CHANNEL: &str = "cli";

#[derive(Deserialize)]
pub struct ChatBody {
    pub message: String,
    pub model: Option<String>,
    pub user_id: Option<String>,
    pub channel: Option<String>,
    #[serde(default)]
    pub auto_approve: bool,
    /// Caller-supplied context. When present it replaces the stored history
    /// for this turn.
    pub history: Option<Vec<ChatMessage>>,
}

#[derive(Serialize, Debug)]
pub struct ChatResponse {
    pub response: String,
    pub model: String,
    pub trace_id: String,
}

pub async fn health() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}

pub async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Json<ChatResponse>, (StatusCode, Json<Value>)> {
    let user_id = body.user_id.clone().unwrap_or_else(|| "default".to_string());
    let channel = body.channel.clone().unwrap_or_else(|| "http".to_string());

    // During onboarding only the local CLI may talk to the agent.
    if state.config.onboarding_mode && channel != CLI_CHANNEL {
        return Err((
            StatusCode::FORBIDDEN,
            Json(json!({"error": "onboarding in progress; chat is limited to the local CLI"})),
        ));
    }

    let ctx = TraceContext::new(&user_id, &channel);
    let trace_id = ctx.trace_id.clone();
    let model_name = body.model.clone().unwrap_or_else(|| state.config.model_name.clone());

    trace::with_context(ctx, async move {
        let started = Instant::now();
        let tracer = &state.env.tracer;
        tracer.chat_request(&body.message, &model_name).await;

        let prior = match body.history {
            Some(history) => history,
            None => state.history.load(&user_id).await,
        };

        // Ground the turn in what the agent already knows about this user.
        // A down memory store degrades to no extra context.
        let mut system_prompt = state.config.system_prompt.clone();
        if let Ok(memories) = state.env.skill_ctx.memory.recent(&user_id, 8).await {
            if !memories.is_empty() {
                system_prompt.push_str("\n\nLong-term memories for this user:");
                for entry in &memories {
                    system_prompt.push_str(&format!("\n- [{}] {}", entry.kind, entry.content));
                }
            }
        }

        let mut messages = Vec::with_capacity(prior.len() + 2);
        messages.push(ChatMessage::system(&system_prompt));
        messages.extend(prior);
        messages.push(ChatMessage::user(&body.message));

        let opts = LoopOptions {
            model: model_name.clone(),
            num_ctx: state.config.num_ctx,
            max_iterations: state.config.max_tool_iterations,
        };
        let schemas = state.registry.tool_schemas();
        let outcome = run_tool_loop(
            state.model.as_ref(),
            messages,
            schemas.as_deref(),
            &opts,
            &state.registry,
            &state.env,
            body.auto_approve,
            &user_id,
        )
        .await;

        let (final_text, _messages, stats) = match outcome {
            Ok(result) => result,
            Err(e) => {
                error!(err = %e, "model endpoint failed during turn");
                return Err((
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({"error": format!("model endpoint unavailable: {e}")})),
                ));
            }
        };

        // Persist only the user/assistant turns; tool turns stay loop-local.
        let _ = state
            .history
            .append(&user_id, &ChatMessage::user(&body.message))
            .await;
        let _ = state
            .history
            .append(&user_id, &ChatMessage::assistant(&final_text))
            .await;

        tracer
            .chat_response(
                &model_name,
                &final_text,
                0,
                0,
                started.elapsed().as_secs_f64() * 1000.0,
            )
            .await;
        tracer
            .emit(
                "chat",
                json!({
                    "iterations": stats.iterations,
                    "skills_called": stats.skills_called,
                }),
            )
            .await;

        Ok(Json(ChatResponse {
            response: final_text,
            model: model_name,
            trace_id,
        }))
    })
    .await
}

pub async fn chat_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<Vec<ChatMessage>> {
    Json(state.history.load(&user_id).await)
}

pub async fn policy_reload(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.env.policy.reload() {
        Ok(()) => Ok(Json(json!({"ok": true}))),
        Err(e) => {
            error!(err = %e, "policy reload failed; previous policy kept");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"ok": false, "error": e.to_string()})),
            ))
        }
    }
}
