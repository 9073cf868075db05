use std::path::PathBuf;

use crate::error::{Result, WardenError};

/// Runtime configuration, read from the environment at startup.
///
/// Every field has an environment override; `.env` files are honored because
/// `main` loads them with dotenvy before the first read. The api key is the
/// only required value — starting without it would leave the mutating HTTP
/// routes unauthenticated.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address for the HTTP surface (`SERVER_BIND`).
    pub server_bind: String,

    /// Shared api key checked on mutating routes (`WARDEN_API_KEY`, required).
    pub api_key: String,

    /// SQLite database path (`WARDEN_DB_PATH`).
    pub db_path: PathBuf,

    /// Base URL of the model endpoint (`MODEL_ENDPOINT`).
    pub model_endpoint: String,

    /// Default model name (`MODEL_NAME`).
    pub model_name: String,

    /// Context window passed to the model (`NUM_CTX`).
    pub num_ctx: usize,

    /// Hard cap on tool-call rounds per turn (`MAX_TOOL_ITERATIONS`).
    pub max_tool_iterations: u32,

    /// Seconds an approval waiter blocks before auto-timeout
    /// (`APPROVAL_TIMEOUT_SECS`).
    pub approval_timeout_secs: u64,

    /// Seconds between heartbeat ticks (`HEARTBEAT_INTERVAL_SECS`).
    pub heartbeat_interval_secs: u64,

    /// Path to the policy document (`POLICY_PATH`).
    pub policy_path: PathBuf,

    /// When set, `/chat` only accepts requests from the local CLI channel
    /// (`ONBOARDING_MODE`).
    pub onboarding_mode: bool,

    /// Base URL of the vector store service (`VECTOR_ENDPOINT`).
    pub vector_endpoint: String,

    /// Number of conversation turns kept per user (`HISTORY_WINDOW`).
    pub history_window: usize,

    /// System prompt prepended to every conversation (`SYSTEM_PROMPT`).
    pub system_prompt: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("WARDEN_API_KEY")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                WardenError::Config(
                    "WARDEN_API_KEY environment variable is required but not set".to_string(),
                )
            })?;

        Ok(Self {
            server_bind: env_or("SERVER_BIND", "0.0.0.0:8000"),
            api_key,
            db_path: std::env::var("WARDEN_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| Self::data_dir().join("warden-agent.db")),
            model_endpoint: env_or("MODEL_ENDPOINT", "http://localhost:11434"),
            model_name: env_or("MODEL_NAME", "phi3:latest"),
            num_ctx: env_parse("NUM_CTX", 8192),
            max_tool_iterations: env_parse("MAX_TOOL_ITERATIONS", 5),
            approval_timeout_secs: env_parse("APPROVAL_TIMEOUT_SECS", 300),
            heartbeat_interval_secs: env_parse("HEARTBEAT_INTERVAL_SECS", 60),
            policy_path: std::env::var("POLICY_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| Self::config_dir().join("policy.toml")),
            onboarding_mode: matches!(
                std::env::var("ONBOARDING_MODE").as_deref(),
                Ok("1") | Ok("true")
            ),
            vector_endpoint: env_or("VECTOR_ENDPOINT", "http://localhost:8001"),
            history_window: env_parse("HISTORY_WINDOW", 40),
            system_prompt: env_or(
                "SYSTEM_PROMPT",
                "You are a helpful assistant running as a local agent. You have a set \
                 of tools available; use them when they would produce a better answer \
                 than your training data.",
            ),
        })
    }

    /// Data directory for the database and sandbox, created on demand.
    pub fn data_dir() -> PathBuf {
        let dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join("warden-agent");
        std::fs::create_dir_all(&dir).ok();
        dir
    }

    /// Config directory holding the policy document.
    pub fn config_dir() -> PathBuf {
        let dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("warden-agent");
        std::fs::create_dir_all(&dir).ok();
        dir
    }

    /// Default policy document, written on first launch and printable with
    /// `--default-policy`.
    pub fn default_policy_contents() -> &'static str {
        r#"# warden-agent policy document.
# Hot-reloadable via POST /policy/reload. The shell-command deny-list is
# compiled into the binary and cannot be changed here.

[zones.sandbox]
path = "/sandbox"
read = "allow"
write = "allow"
execute = "allow"

[zones.identity]
path = "/agent"
read = "allow"
write = "requires_approval"
execute = "deny"

[zones.system]
path = "/app"
read = "allow"
write = "deny"
execute = "deny"

[rate_limits.default]
max_calls = 30
window_seconds = 60

[rate_limits.web_search]
max_calls = 10
window_seconds = 60

[rate_limits.url_fetch]
max_calls = 10
window_seconds = 60

[rate_limits.file_read]
max_calls = 30
window_seconds = 60

[rate_limits.file_write]
max_calls = 20
window_seconds = 60

[rate_limits.pdf_parse]
max_calls = 10
window_seconds = 60

[rate_limits.rag_search]
max_calls = 20
window_seconds = 60

[rate_limits.rag_ingest]
max_calls = 10
window_seconds = 60

[rate_limits.remember]
max_calls = 20
window_seconds = 60

[rate_limits.recall]
max_calls = 20
window_seconds = 60

[external_access]
http_get = "allow"
http_post = "requires_approval"
http_put = "requires_approval"
http_delete = "deny"
denied_url_patterns = [
    "paypal\\.com",
    "/checkout",
    "/signup",
    "/register",
    "bank",
]
"#
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
