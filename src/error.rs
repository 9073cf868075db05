use thiserror::Error;

#[derive(Error, Debug)]
pub enum WardenError {
    #[error("config error: {0}")]
    Config(String),

    #[error("policy error: {0}")]
    Policy(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("model error: {0}")]
    Model(String),

    #[error("approval error: {0}")]
    Approval(String),

    #[error("skill error: {0}")]
    Skill(String),

    #[error("vector store error: {0}")]
    VectorStore(String),

    #[error("secret not configured: {0}")]
    Secret(String),

    #[error("memory rejected: {0}")]
    MemoryPoisoned(String),
}

pub type Result<T> = std::result::Result<T, WardenError>;
