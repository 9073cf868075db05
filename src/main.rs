mod approval;
mod bus;
mod config;
mod error;
mod heartbeat;
mod history;
mod llm;
mod memory;
mod policy;
mod runner;
mod secrets;
mod server;
mod skills;
mod store;
mod trace;
mod vector;

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, info};

use crate::approval::ApprovalManager;
use crate::bus::Bus;
use crate::config::Config;
use crate::history::History;
use crate::llm::OllamaChat;
use crate::memory::{MEMORY_COLLECTION, MemoryStore};
use crate::policy::PolicyEngine;
use crate::runner::ExecutionEnv;
use crate::skills::{SkillContext, SkillRegistry};
use crate::store::Store;
use crate::trace::Tracer;
use crate::vector::HttpVectorStore;

const KNOWLEDGE_COLLECTION: &str = "rag_data";

#[tokio::main]
async fn main() {
    // Load .env (if present) before anything reads env vars.
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return;
    }
    if args.iter().any(|a| a == "--default-policy") {
        print!("{}", Config::default_policy_contents());
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("failed to load config: {e}");
            std::process::exit(1);
        }
    };

    info!(
        bind = %config.server_bind,
        model = %config.model_name,
        endpoint = %config.model_endpoint,
        "warden-agent starting"
    );

    // Durable store
    let store = match Store::open(&config.db_path) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("failed to open store at {}: {e}", config.db_path.display());
            std::process::exit(1);
        }
    };

    let bus = Arc::new(Bus::new());
    let tracer = Arc::new(Tracer::new(Some(store.clone())));

    // Policy is fail-closed: write the default document on first launch,
    // refuse to start when it cannot be loaded.
    if !config.policy_path.exists() {
        if let Err(e) = std::fs::write(&config.policy_path, Config::default_policy_contents()) {
            error!(
                "failed to write default policy at {}: {e}",
                config.policy_path.display()
            );
            std::process::exit(1);
        }
        info!(path = %config.policy_path.display(), "default policy document written");
    }
    let policy = match PolicyEngine::load(&config.policy_path, Some(store.clone())) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            error!("failed to load policy: {e}");
            std::process::exit(1);
        }
    };

    let approvals = Arc::new(ApprovalManager::new(
        store.clone(),
        bus.clone(),
        tracer.clone(),
        config.approval_timeout_secs,
    ));

    // External collaborators
    let model = Arc::new(OllamaChat::new(config.model_endpoint.clone()));
    let knowledge = Arc::new(HttpVectorStore::new(
        config.vector_endpoint.clone(),
        KNOWLEDGE_COLLECTION,
    ));
    let memory = Arc::new(MemoryStore::new(Arc::new(HttpVectorStore::new(
        config.vector_endpoint.clone(),
        MEMORY_COLLECTION,
    ))));

    let env = Arc::new(ExecutionEnv {
        policy: policy.clone(),
        approvals: approvals.clone(),
        tracer: tracer.clone(),
        skill_ctx: SkillContext {
            http: reqwest::Client::new(),
            memory,
            knowledge: knowledge.clone(),
        },
    });

    let registry = Arc::new(build_skill_registry(policy.clone()));
    info!(skills = registry.len(), "skill catalog initialized");

    let history = Arc::new(History::new(store.clone(), config.history_window));

    // Shutdown signal
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let heartbeat_handle = heartbeat::start(
        tracer.clone(),
        config.heartbeat_interval_secs,
        shutdown_tx.subscribe(),
    );

    let server_handle = {
        let state = server::AppState {
            config: config.clone(),
            model,
            registry,
            env,
            history,
        };
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = server::serve(state, shutdown_rx).await {
                error!("http surface error: {e}");
                std::process::exit(1);
            }
        })
    };

    info!("warden-agent is running — press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");

    info!("shutdown signal received, stopping...");
    let _ = shutdown_tx.send(());
    let _ = tokio::join!(server_handle, heartbeat_handle);
    info!("warden-agent stopped");
}

/// Register the built-in skills. The catalog is immutable after this.
fn build_skill_registry(policy: Arc<PolicyEngine>) -> SkillRegistry {
    use crate::skills::*;

    let mut registry = SkillRegistry::new();
    registry.register(Arc::new(web_search::WebSearchSkill::new()));
    registry.register(Arc::new(url_fetch::UrlFetchSkill::new(policy.clone())));
    registry.register(Arc::new(file_read::FileReadSkill::new(policy.clone())));
    registry.register(Arc::new(file_write::FileWriteSkill::new(policy.clone())));
    registry.register(Arc::new(pdf_parse::PdfParseSkill::new(policy)));
    registry.register(Arc::new(rag_search::RagSearchSkill::new()));
    registry.register(Arc::new(rag_ingest::RagIngestSkill::new()));
    registry.register(Arc::new(remember::RememberSkill::new()));
    registry.register(Arc::new(recall::RecallSkill::new()));
    registry
}

fn print_usage() {
    println!(
        "warden-agent — policy-gated execution runtime for a local LLM agent

USAGE:
    warden-agent [OPTIONS]

OPTIONS:
    --default-policy    Print the default policy document to stdout and exit
    -h, --help          Print this help message

ENVIRONMENT:
    WARDEN_API_KEY            Required. Shared api key for mutating HTTP routes.
    SERVER_BIND               Bind address (default: 0.0.0.0:8000)
    WARDEN_DB_PATH            SQLite store path (default: data dir)
    MODEL_ENDPOINT            Chat endpoint base URL (default: http://localhost:11434)
    MODEL_NAME                Default model name (default: phi3:latest)
    NUM_CTX                   Model context window (default: 8192)
    MAX_TOOL_ITERATIONS       Tool-loop iteration cap (default: 5)
    APPROVAL_TIMEOUT_SECS     Approval wait timeout (default: 300)
    HEARTBEAT_INTERVAL_SECS   Heartbeat tick interval (default: 60)
    POLICY_PATH               Policy document path (default: config dir)
    ONBOARDING_MODE           When 1/true, /chat only accepts the cli channel
    VECTOR_ENDPOINT           Vector store base URL (default: http://localhost:8001)
    HISTORY_WINDOW            Conversation turns kept per user (default: 40)
    SYSTEM_PROMPT             System prompt prepended to every turn
    TAVILY_API_KEY            Web search credential, read per call
    RUST_LOG                  Tracing filter (default: info)
"
    );
}
