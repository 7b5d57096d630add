use std::path::PathBuf;

/// Core error type for the bot.
///
/// Adapter crates map their specific errors into this type so the dispatcher
/// can handle failures consistently (fatal at startup vs user-facing notice).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid filter config {path}: {reason}")]
    FilterConfig { path: PathBuf, reason: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("delivery error: {0}")]
    Delivery(String),

    #[error("completion error: {0}")]
    Completion(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
