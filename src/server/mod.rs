//! HTTP surface.
//!
//! Mutating routes sit behind the shared api-key header; health and approval
//! inspection are open. Everything else about a request — trace scope,
//! history, the tool loop — happens in the handlers.

mod approval_endpoints;
mod auth;
mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::history::History;
use crate::llm::ChatModel;
use crate::runner::ExecutionEnv;
use crate::skills::SkillRegistry;

/// State shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub model: Arc<dyn ChatModel>,
    pub registry: Arc<SkillRegistry>,
    pub env: Arc<ExecutionEnv>,
    pub history: Arc<History>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Authenticated surface
        .route("/chat", post(handlers::chat))
        .route("/chat/history/{user_id}", get(handlers::chat_history))
        .route("/policy/reload", post(handlers::policy_reload))
        .route(
            "/approval/{id}/respond",
            post(approval_endpoints::respond_approval),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ))
        // Open surface, below the auth layer
        .route("/health", get(handlers::health))
        .route("/approval/pending", get(approval_endpoints::list_pending))
        .route("/approval/{id}", get(approval_endpoints::get_approval))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(state: AppState, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    let bind = state.config.server_bind.clone();
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(bind = %bind, "http surface listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}
