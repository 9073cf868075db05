//! Approval inspection and resolution endpoints.
//!
//! `respond` is the single externally reachable path that resolves an
//! approval, called by whichever gateway presented the Approve/Deny choice
//! to the operator. Double-resolution is a 409.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::error;

use crate::approval::types::ApprovalStatus;

use super::AppState;

#[derive(Deserialize)]
pub struct ApprovalResponseBody {
    pub status: String,
    #[serde(default = "default_resolved_by")]
    pub resolved_by: String,
}

fn default_resolved_by() -> String {
    "owner".to_string()
}

pub async fn list_pending(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.env.approvals.list_pending().await {
        Ok(pending) => Ok(Json(json!({"pending": pending}))),
        Err(e) => {
            error!(err = %e, "list pending approvals failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "approval storage unavailable"})),
            ))
        }
    }
}

pub async fn get_approval(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.env.approvals.get(&id).await {
        Ok(Some(record)) => Ok(Json(serde_json::to_value(record).unwrap_or_default())),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "approval not found"})),
        )),
        Err(e) => {
            error!(err = %e, "approval lookup failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "approval storage unavailable"})),
            ))
        }
    }
}

pub async fn respond_approval(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ApprovalResponseBody>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let status = match body.status.as_str() {
        "approved" => ApprovalStatus::Approved,
        "denied" => ApprovalStatus::Denied,
        _ => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "status must be 'approved' or 'denied'"})),
            ));
        }
    };

    match state.env.approvals.get(&id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return Err((
                StatusCode::NOT_FOUND,
                Json(json!({"error": "approval not found"})),
            ));
        }
        Err(e) => {
            error!(err = %e, "approval lookup failed");
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "approval storage unavailable"})),
            ));
        }
    }

    match state.env.approvals.resolve(&id, status, &body.resolved_by).await {
        Ok(true) => Ok(Json(json!({"approval_id": id, "status": body.status}))),
        // The record existed a moment ago, so a false write means it is no
        // longer pending.
        Ok(false) => Err((
            StatusCode::CONFLICT,
            Json(json!({"error": "approval already resolved"})),
        )),
        Err(e) => {
            error!(err = %e, "approval resolution failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "approval storage unavailable"})),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::history::History;
    use crate::policy::{RiskLevel, Zone};
    use crate::runner::testing::{MockModel, env};
    use crate::server::AppState;
    use crate::skills::SkillRegistry;
    use std::sync::Arc;

    fn state() -> (AppState, tempfile::TempDir) {
        let (exec_env, store, tmp) = env();
        let config = Config {
            server_bind: "127.0.0.1:0".into(),
            api_key: "k".into(),
            db_path: std::path::PathBuf::from(":memory:"),
            model_endpoint: String::new(),
            model_name: "phi3:latest".into(),
            num_ctx: 4096,
            max_tool_iterations: 5,
            approval_timeout_secs: 300,
            heartbeat_interval_secs: 60,
            policy_path: std::path::PathBuf::from("policy.toml"),
            onboarding_mode: false,
            vector_endpoint: String::new(),
            history_window: 10,
            system_prompt: String::new(),
        };
        let state = AppState {
            config,
            model: Arc::new(MockModel::scripted(vec![])),
            registry: Arc::new(SkillRegistry::new()),
            env: Arc::new(exec_env),
            history: Arc::new(History::new(store, 10)),
        };
        (state, tmp)
    }

    async fn create_pending(state: &AppState) -> String {
        state
            .env
            .approvals
            .create(
                "skill:web_search",
                Zone::External,
                RiskLevel::Low,
                "Execute skill 'web_search' for user u1",
                "web_search",
                None,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn pending_listing_and_lookup() {
        let (state, _tmp) = state();
        let id = create_pending(&state).await;

        let Json(listing) = list_pending(State(state.clone())).await.unwrap();
        assert_eq!(listing["pending"].as_array().unwrap().len(), 1);

        let Json(record) = get_approval(State(state.clone()), Path(id.clone())).await.unwrap();
        assert_eq!(record["id"], id.as_str());
        assert_eq!(record["status"], "pending");

        let (status, _) = get_approval(State(state), Path("missing".into()))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn respond_resolves_once_then_conflicts() {
        let (state, _tmp) = state();
        let id = create_pending(&state).await;

        let body = ApprovalResponseBody {
            status: "approved".into(),
            resolved_by: "owner".into(),
        };
        let Json(ok) = respond_approval(State(state.clone()), Path(id.clone()), Json(body))
            .await
            .unwrap();
        assert_eq!(ok["status"], "approved");

        let again = ApprovalResponseBody {
            status: "denied".into(),
            resolved_by: "owner".into(),
        };
        let (status, _) = respond_approval(State(state), Path(id), Json(again))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn respond_rejects_bad_status() {
        let (state, _tmp) = state();
        let id = create_pending(&state).await;
        let body = ApprovalResponseBody {
            status: "maybe".into(),
            resolved_by: "owner".into(),
        };
        let (status, _) = respond_approval(State(state), Path(id), Json(body))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn respond_on_unknown_id_is_not_found() {
        let (state, _tmp) = state();
        let body = ApprovalResponseBody {
            status: "approved".into(),
            resolved_by: "owner".into(),
        };
        let (status, _) = respond_approval(State(state), Path("ghost".into()), Json(body))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
