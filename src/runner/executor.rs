//! One skill invocation through the full gate pipeline.
//!
//! Order: rate-limit → validate → approval → execute → sanitize → trace.
//! The first failing step terminates the pipeline with a diagnostic string;
//! exactly one skill trace event is recorded either way.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{Value, json};

use crate::approval::ApprovalManager;
use crate::approval::types::ApprovalStatus;
use crate::policy::{PolicyEngine, Zone};
use crate::skills::{Skill, SkillContext, USER_ID_PARAM};
use crate::trace::Tracer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkillStatus {
    Success,
    RateLimited,
    InvalidParams,
    NotApproved,
    Error,
    SanitizeError,
}

impl SkillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::RateLimited => "rate_limited",
            Self::InvalidParams => "invalid_params",
            Self::NotApproved => "not_approved",
            Self::Error => "error",
            Self::SanitizeError => "sanitize_error",
        }
    }

    /// Whether the invocation reached the skill itself. Gate failures stop
    /// short of execution and must not consume a per-turn slot.
    pub fn executed(&self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::SanitizeError)
    }
}

/// What one pipeline run produced. `text` is exactly what re-enters model
/// context.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub text: String,
    pub status: SkillStatus,
}

impl ExecutionOutcome {
    fn new(text: String, status: SkillStatus) -> Self {
        Self { text, status }
    }
}

/// The singletons every skill invocation needs, constructed once at startup
/// and passed by reference.
pub struct ExecutionEnv {
    pub policy: Arc<PolicyEngine>,
    pub approvals: Arc<ApprovalManager>,
    pub tracer: Arc<Tracer>,
    pub skill_ctx: SkillContext,
}

/// Run a skill through the policy pipeline. Never returns an error; every
/// failure mode is a `[<skill>] ...` diagnostic string.
pub async fn execute_skill(
    skill: &dyn Skill,
    params: Value,
    env: &ExecutionEnv,
    auto_approve: bool,
    user_id: &str,
) -> ExecutionOutcome {
    let meta = skill.metadata();
    let name = meta.name;

    // 1. Rate limit
    if !env.policy.check_rate_limit(meta.rate_limit).await {
        env.tracer
            .skill_call(name, &params, SkillStatus::RateLimited.as_str(), 0.0)
            .await;
        return ExecutionOutcome::new(
            format!("[{name}] Rate limit reached — try again later."),
            SkillStatus::RateLimited,
        );
    }

    // 2. Validate
    if let Err(reason) = skill.validate(&params) {
        env.tracer
            .skill_call(name, &params, SkillStatus::InvalidParams.as_str(), 0.0)
            .await;
        return ExecutionOutcome::new(
            format!("[{name}] Invalid parameters: {reason}"),
            SkillStatus::InvalidParams,
        );
    }

    // 3. Approval gate
    if meta.requires_approval && !auto_approve {
        let description = format!("Execute skill '{name}' for user {user_id}");
        let resolution = match env
            .approvals
            .create(
                &format!("skill:{name}"),
                Zone::External,
                meta.risk_level,
                &description,
                name,
                None,
            )
            .await
        {
            Ok(approval_id) => env.approvals.wait(&approval_id, None).await,
            // Fail closed: if the record cannot be persisted, nobody can
            // approve it.
            Err(_) => ApprovalStatus::Timeout,
        };
        if resolution != ApprovalStatus::Approved {
            env.tracer
                .skill_call(name, &params, SkillStatus::NotApproved.as_str(), 0.0)
                .await;
            return ExecutionOutcome::new(
                format!("[{name}] Skill execution was not approved."),
                SkillStatus::NotApproved,
            );
        }
    }

    // 4. Execute, with the caller identity injected after validation so the
    // reserved key never interferes with parameter checks.
    let mut call_params = if params.is_object() {
        params.clone()
    } else {
        json!({})
    };
    call_params[USER_ID_PARAM] = json!(user_id);

    let started = Instant::now();
    let result = skill.execute(call_params, &env.skill_ctx).await;
    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

    let result = match result {
        Ok(result) => result,
        Err(e) => {
            env.tracer
                .skill_call(name, &params, SkillStatus::Error.as_str(), duration_ms)
                .await;
            return ExecutionOutcome::new(
                format!("[{name}] Execution error: {e}"),
                SkillStatus::Error,
            );
        }
    };

    // 5. Sanitize
    let text = match skill.sanitize(result) {
        Ok(text) => text,
        Err(e) => {
            env.tracer
                .skill_call(name, &params, SkillStatus::SanitizeError.as_str(), duration_ms)
                .await;
            return ExecutionOutcome::new(
                format!("[{name}] Output sanitization error: {e}"),
                SkillStatus::SanitizeError,
            );
        }
    };

    // 6. Trace the successful call
    env.tracer
        .skill_call(name, &params, SkillStatus::Success.as_str(), duration_ms)
        .await;
    ExecutionOutcome::new(text, SkillStatus::Success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::env;
    use crate::skills::testing::MockSkill;
    use crate::trace::recent_logs;

    #[tokio::test]
    async fn success_path_returns_sanitized_text() {
        let (env, store, _tmp) = env();
        let skill = MockSkill::named("good");

        let outcome = execute_skill(&skill, json!({"text": "ping"}), &env, false, "u1").await;
        assert_eq!(outcome.status, SkillStatus::Success);
        assert_eq!(outcome.text, "result:ping");
        assert_eq!(skill.call_count(), 1);

        let logs = recent_logs(&store, "skill", 5, 0).await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0]["status"], "success");
        assert_eq!(logs[0]["skill_name"], "good");
        assert!(logs[0]["duration_ms"].is_number());
    }

    #[tokio::test]
    async fn user_identity_is_injected_under_reserved_key() {
        let (env, _store, _tmp) = env();
        let skill = MockSkill::named("good");
        execute_skill(&skill, json!({"text": "x"}), &env, false, "user-42").await;

        let calls = skill.calls.lock().unwrap();
        assert_eq!(calls[0][USER_ID_PARAM], "user-42");
        assert_eq!(calls[0]["text"], "x");
    }

    #[tokio::test]
    async fn rate_limit_stops_the_pipeline() {
        let (env, store, _tmp) = env();
        let skill = MockSkill::named("noisy").with_bucket("zero");

        let outcome = execute_skill(&skill, json!({"text": "x"}), &env, false, "u1").await;
        assert_eq!(outcome.status, SkillStatus::RateLimited);
        assert_eq!(outcome.text, "[noisy] Rate limit reached — try again later.");
        assert_eq!(skill.call_count(), 0);

        let logs = recent_logs(&store, "skill", 5, 0).await;
        assert_eq!(logs[0]["status"], "rate_limited");
    }

    #[tokio::test]
    async fn invalid_params_stop_the_pipeline() {
        let (env, _store, _tmp) = env();
        let skill = MockSkill::named("good");
        let outcome = execute_skill(&skill, json!({}), &env, false, "u1").await;
        assert_eq!(outcome.status, SkillStatus::InvalidParams);
        assert!(outcome.text.starts_with("[good] Invalid parameters:"));
        assert_eq!(skill.call_count(), 0);
    }

    #[tokio::test]
    async fn denied_approval_blocks_execution() {
        let (env, _store, _tmp) = env();
        let skill = MockSkill::named("danger").requiring_approval();

        // Out-of-band resolver denies the pending approval once it appears.
        let approvals = env.approvals.clone();
        let resolver = tokio::spawn(async move {
            loop {
                let pending = approvals.list_pending().await.unwrap();
                if let Some(record) = pending.first() {
                    approvals
                        .resolve(&record.id, ApprovalStatus::Denied, "owner")
                        .await
                        .unwrap();
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        });

        let outcome = execute_skill(&skill, json!({"text": "x"}), &env, false, "u1").await;
        resolver.await.unwrap();

        assert_eq!(outcome.status, SkillStatus::NotApproved);
        assert_eq!(outcome.text, "[danger] Skill execution was not approved.");
        // The skill itself never ran.
        assert_eq!(skill.call_count(), 0);
    }

    #[tokio::test]
    async fn approved_approval_lets_execution_through() {
        let (env, _store, _tmp) = env();
        let skill = MockSkill::named("danger").requiring_approval();

        let approvals = env.approvals.clone();
        tokio::spawn(async move {
            loop {
                let pending = approvals.list_pending().await.unwrap();
                if let Some(record) = pending.first() {
                    approvals
                        .resolve(&record.id, ApprovalStatus::Approved, "owner")
                        .await
                        .unwrap();
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        });

        let outcome = execute_skill(&skill, json!({"text": "ok"}), &env, false, "u1").await;
        assert_eq!(outcome.status, SkillStatus::Success);
        assert_eq!(outcome.text, "result:ok");
    }

    #[tokio::test]
    async fn auto_approve_skips_the_gate() {
        let (env, _store, _tmp) = env();
        let skill = MockSkill::named("danger").requiring_approval();
        let outcome = execute_skill(&skill, json!({"text": "ok"}), &env, true, "u1").await;
        assert_eq!(outcome.status, SkillStatus::Success);
        assert!(env.approvals.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn execution_error_becomes_diagnostic_string() {
        let (env, store, _tmp) = env();
        let skill = MockSkill::named("flaky").failing_execute();
        let outcome = execute_skill(&skill, json!({"text": "x"}), &env, false, "u1").await;
        assert_eq!(outcome.status, SkillStatus::Error);
        assert!(outcome.text.starts_with("[flaky] Execution error:"));
        assert!(outcome.text.contains("mock exploded"));

        let logs = recent_logs(&store, "skill", 5, 0).await;
        assert_eq!(logs[0]["status"], "error");
    }

    #[tokio::test]
    async fn sanitize_error_becomes_diagnostic_string() {
        let (env, _store, _tmp) = env();
        let skill = MockSkill::named("messy").failing_sanitize();
        let outcome = execute_skill(&skill, json!({"text": "x"}), &env, false, "u1").await;
        assert_eq!(outcome.status, SkillStatus::SanitizeError);
        assert!(outcome.text.starts_with("[messy] Output sanitization error:"));
    }

    #[tokio::test]
    async fn broken_trace_sink_never_aborts_the_call() {
        let (env, store, _tmp) = env();
        store.poison().await;
        let skill = MockSkill::named("good");
        let outcome = execute_skill(&skill, json!({"text": "ping"}), &env, false, "u1").await;
        // Result comes back normally even though every sink write failed.
        assert_eq!(outcome.status, SkillStatus::Success);
        assert_eq!(outcome.text, "result:ping");
    }

    #[tokio::test]
    async fn traced_params_are_redacted() {
        let (env, store, _tmp) = env();
        let skill = MockSkill::named("good");
        execute_skill(
            &skill,
            json!({"text": "x", "api_key": "sk-secret"}),
            &env,
            false,
            "u1",
        )
        .await;
        let logs = recent_logs(&store, "skill", 5, 0).await;
        assert_eq!(logs[0]["params"]["api_key"], "***REDACTED***");
        assert!(!logs[0].to_string().contains("sk-secret"));
    }

    #[test]
    fn gate_failures_do_not_count_as_executed() {
        assert!(SkillStatus::Success.executed());
        assert!(SkillStatus::Error.executed());
        assert!(SkillStatus::SanitizeError.executed());
        assert!(!SkillStatus::RateLimited.executed());
        assert!(!SkillStatus::InvalidParams.executed());
        assert!(!SkillStatus::NotApproved.executed());
    }
}
