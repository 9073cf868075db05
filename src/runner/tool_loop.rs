//! The model↔skills loop for one user turn.
//!
//! The model is called with the conversation plus tool schemas; every tool
//! call it emits is dispatched through the executor and fed back as a
//! tool-role message until the model answers in plain text or the iteration
//! cap trips. Tool calls within one reply run strictly sequentially so later
//! calls observe the side effects of earlier ones.

use serde_json::Value;

use crate::error::Result;
use crate::llm::{ChatMessage, ChatModel, ToolSchema};
use crate::skills::SkillRegistry;

use super::executor::{ExecutionEnv, execute_skill};

/// Synthesized user message injected when the model declines tool use over
/// perceived lack of live access. At most once per turn.
const RETRY_NUDGE: &str = "You have a web_search tool available. Please use it now to find a \
                           current answer rather than relying on training data.";

const FINAL_ANSWER_PROMPT: &str =
    "Please provide your final answer based on the information gathered so far.";

const MAX_ITERATIONS_PREFIX: &str = "[max iterations reached]\n";

#[derive(Debug, Clone)]
pub struct LoopOptions {
    pub model: String,
    pub num_ctx: usize,
    pub max_iterations: u32,
}

#[derive(Debug, Clone, Default)]
pub struct LoopStats {
    pub iterations: u32,
    /// One entry per executed invocation, in order. Calls stopped by a gate
    /// (rate limit, bad params, denied approval) or by the per-turn cap are
    /// not listed.
    pub skills_called: Vec<String>,
}

/// Drive the tool-calling loop.
///
/// Returns the final text, the conversation including all tool turns (for
/// follow-up context only — callers must not persist the tool turns), and
/// the loop stats. Errors only on model-endpoint failure.
pub async fn run_tool_loop(
    model: &dyn ChatModel,
    mut messages: Vec<ChatMessage>,
    tools: Option<&[ToolSchema]>,
    opts: &LoopOptions,
    registry: &SkillRegistry,
    env: &ExecutionEnv,
    auto_approve: bool,
    user_id: &str,
) -> Result<(String, Vec<ChatMessage>, LoopStats)> {
    // No skills: plain chat, no loop needed.
    let Some(tools) = tools.filter(|t| !t.is_empty()) else {
        let reply = model
            .chat(&opts.model, &messages, None, opts.num_ctx)
            .await?;
        let text = reply.message.content.clone();
        messages.push(ChatMessage::assistant(&text));
        return Ok((text, messages, LoopStats::default()));
    };

    let mut stats = LoopStats::default();
    let mut per_skill_counts: std::collections::HashMap<String, u32> =
        std::collections::HashMap::new();
    let mut nudged = false;

    while stats.iterations < opts.max_iterations {
        let reply = model
            .chat(&opts.model, &messages, Some(tools), opts.num_ctx)
            .await?;
        let message = reply.message;

        if message.tool_calls.is_empty() {
            let text = message.content.clone();

            // The model refused to use tools on its first attempt; nudge it
            // once and go around again.
            if stats.iterations == 0
                && stats.skills_called.is_empty()
                && !nudged
                && is_refusal(env, &text)
            {
                nudged = true;
                messages.push(ChatMessage::assistant(&text));
                messages.push(ChatMessage::user(RETRY_NUDGE));
                stats.iterations += 1;
                continue;
            }

            messages.push(ChatMessage::assistant(&text));
            return Ok((text, messages, stats));
        }

        let tool_calls = message.tool_calls.clone();
        messages.push(message);

        for call in tool_calls {
            let name = call.function.name;
            let params = parse_arguments(call.function.arguments);

            let tool_result = match registry.get(&name) {
                None => format!("[{name}] Unknown skill — not registered."),
                Some(skill) => {
                    let cap = skill.metadata().max_calls_per_turn;
                    let count = per_skill_counts.entry(name.clone()).or_insert(0);
                    if *count >= cap {
                        format!(
                            "[{name}] Per-turn call limit ({cap}) reached — try a different approach."
                        )
                    } else {
                        // Reserve the slot up front; release it if the call
                        // never reaches the skill.
                        *count += 1;
                        let outcome =
                            execute_skill(skill.as_ref(), params, env, auto_approve, user_id)
                                .await;
                        if outcome.status.executed() {
                            stats.skills_called.push(name.clone());
                        } else {
                            *per_skill_counts.get_mut(&name).unwrap() -= 1;
                        }
                        outcome.text
                    }
                }
            };
            messages.push(ChatMessage::tool(tool_result));
        }

        stats.iterations += 1;
    }

    // Iteration cap reached: ask for a conclusion with what is known.
    messages.push(ChatMessage::user(FINAL_ANSWER_PROMPT));
    let reply = model
        .chat(&opts.model, &messages, None, opts.num_ctx)
        .await?;
    let text = reply.message.content.clone();
    messages.push(ChatMessage::assistant(&text));
    Ok((
        format!("{MAX_ITERATIONS_PREFIX}{text}"),
        messages,
        stats,
    ))
}

/// Tool-call arguments arrive as an object or a JSON-encoded string; parse
/// failures degrade to an empty object so validation produces the
/// diagnostic.
fn parse_arguments(raw: Value) -> Value {
    match raw {
        Value::Object(_) => raw,
        Value::String(s) => {
            serde_json::from_str::<Value>(&s)
                .ok()
                .filter(Value::is_object)
                .unwrap_or_else(|| Value::Object(Default::default()))
        }
        _ => Value::Object(Default::default()),
    }
}

fn is_refusal(env: &ExecutionEnv, text: &str) -> bool {
    env.policy
        .refusal_patterns()
        .iter()
        .any(|p| p.is_match(text))
}
