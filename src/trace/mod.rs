//! Request tracing fabric.
//!
//! Every request gets a 16-hex-char trace id bound to a task-local
//! [`TraceContext`]; all events emitted while that scope is live carry the
//! same correlation fields. Events go to two sinks: the process log stream
//! (single-line JSON under the `warden::trace` target) and the durable ring
//! buffers `logs:all` (last 1000) / `logs:<event_type>` (last 500 each).
//!
//! Tracing never propagates its own failure — a broken sink is silently
//! absorbed and the request proceeds.

use std::sync::Arc;

use serde_json::{Value, json};
use uuid::Uuid;

use crate::store::{Store, now_secs};

pub const ALL_LOG_CAP: usize = 1000;
pub const TYPE_LOG_CAP: usize = 500;

const MAX_FIELD_LEN: usize = 200;
const PREVIEW_LEN: usize = 100;

const SENSITIVE_KEYS: [&str; 6] = [
    "password",
    "token",
    "secret",
    "api_key",
    "apikey",
    "api_secret",
];

// ---------------------------------------------------------------------------
// Trace context
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: String,
    pub user_id: String,
    pub channel: String,
}

impl TraceContext {
    /// Start a new trace with a fresh 16-hex-char id.
    pub fn new(user_id: impl Into<String>, channel: impl Into<String>) -> Self {
        let mut trace_id = Uuid::new_v4().simple().to_string();
        trace_id.truncate(16);
        Self {
            trace_id,
            user_id: user_id.into(),
            channel: channel.into(),
        }
    }
}

tokio::task_local! {
    static TRACE_CTX: TraceContext;
}

/// Run `fut` with `ctx` as the ambient trace context. Context set this way is
/// visible across every await point inside `fut` and invisible to any other
/// task.
pub async fn with_context<F>(ctx: TraceContext, fut: F) -> F::Output
where
    F: Future,
{
    TRACE_CTX.scope(ctx, fut).await
}

/// The current request's trace context, if one is in scope.
pub fn current() -> Option<TraceContext> {
    TRACE_CTX.try_with(|ctx| ctx.clone()).ok()
}

// ---------------------------------------------------------------------------
// Scrubbing
// ---------------------------------------------------------------------------

/// Redact sensitive keys (any depth) and truncate long strings.
pub fn scrub(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    if SENSITIVE_KEYS.contains(&k.to_lowercase().as_str()) {
                        (k.clone(), Value::String("***REDACTED***".into()))
                    } else {
                        (k.clone(), scrub(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(scrub).collect()),
        Value::String(s) => Value::String(truncate(s, MAX_FIELD_LEN)),
        other => other.clone(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push_str("...");
    out
}

// ---------------------------------------------------------------------------
// Tracer
// ---------------------------------------------------------------------------

pub struct Tracer {
    store: Option<Arc<Store>>,
}

impl Tracer {
    pub fn new(store: Option<Arc<Store>>) -> Self {
        Self { store }
    }

    /// Emit one event: merge trace context and timestamp into `data`, write
    /// single-line JSON to the log stream, push to both ring buffers. Sink
    /// failures are swallowed.
    pub async fn emit(&self, event_type: &str, data: Value) {
        let mut entry = serde_json::Map::new();
        entry.insert("event_type".into(), json!(event_type));
        entry.insert("timestamp".into(), json!(now_secs()));
        let ctx = current();
        let (trace_id, user_id, channel) = ctx
            .map(|c| (c.trace_id, c.user_id, c.channel))
            .unwrap_or_default();
        entry.insert("trace_id".into(), json!(trace_id));
        entry.insert("user_id".into(), json!(user_id));
        entry.insert("channel".into(), json!(channel));
        if let Value::Object(map) = data {
            entry.extend(map);
        }

        let line = Value::Object(entry).to_string();
        tracing::info!(target: "warden::trace", "{line}");

        if let Some(store) = &self.store {
            let _ = store.lpush_trim("logs:all", &line, ALL_LOG_CAP).await;
            let _ = store
                .lpush_trim(&format!("logs:{event_type}"), &line, TYPE_LOG_CAP)
                .await;
        }
    }

    // -- Typed emitters ------------------------------------------------------

    pub async fn chat_request(&self, message: &str, model: &str) {
        self.emit(
            "chat",
            json!({
                "model": model,
                "message_preview": truncate(message, PREVIEW_LEN),
            }),
        )
        .await;
    }

    pub async fn chat_response(
        &self,
        model: &str,
        response_preview: &str,
        eval_count: u64,
        prompt_eval_count: u64,
        total_duration_ms: f64,
    ) {
        self.emit(
            "chat",
            json!({
                "model": model,
                "response_preview": truncate(response_preview, PREVIEW_LEN),
                "metrics": {
                    "eval_count": eval_count,
                    "prompt_eval_count": prompt_eval_count,
                    "total_duration_ms": (total_duration_ms * 100.0).round() / 100.0,
                },
            }),
        )
        .await;
    }

    pub async fn skill_call(&self, skill_name: &str, params: &Value, status: &str, duration_ms: f64) {
        self.emit(
            "skill",
            json!({
                "skill_name": skill_name,
                "params": scrub(params),
                "status": status,
                "duration_ms": (duration_ms * 100.0).round() / 100.0,
            }),
        )
        .await;
    }

    pub async fn policy_decision(
        &self,
        action: &str,
        zone: &str,
        decision: &str,
        risk_level: &str,
        reason: &str,
    ) {
        self.emit(
            "policy",
            json!({
                "action": action,
                "zone": zone,
                "decision": decision,
                "risk_level": risk_level,
                "reason": truncate(reason, MAX_FIELD_LEN),
            }),
        )
        .await;
    }

    pub async fn approval_event(
        &self,
        approval_id: &str,
        action: &str,
        zone: &str,
        risk_level: &str,
        status: &str,
        description: &str,
    ) {
        self.emit(
            "approval",
            json!({
                "approval_id": approval_id,
                "action": action,
                "zone": zone,
                "risk_level": risk_level,
                "status": status,
                "description": truncate(description, MAX_FIELD_LEN),
            }),
        )
        .await;
    }

    pub async fn heartbeat(&self, status: &str, error: Option<&str>) {
        let mut data = json!({ "status": status });
        if let Some(err) = error {
            data["error"] = json!(truncate(err, MAX_FIELD_LEN));
        }
        self.emit("heartbeat", data).await;
    }
}

/// Read recent log entries from a ring buffer, newest first. Unparsable
/// entries are skipped.
pub async fn recent_logs(store: &Store, log_type: &str, count: usize, offset: usize) -> Vec<Value> {
    let key = format!("logs:{log_type}");
    match store.lrange(&key, offset, count).await {
        Ok(entries) => entries
            .iter()
            .filter_map(|e| serde_json::from_str(e).ok())
            .collect(),
        Err(_) => Vec::new(),
    }
}
