//! Error types shared across the Insaka crates

use thiserror::Error;

/// Result type alias for configuration and setup operations
pub type InsakaResult<T> = Result<T, InsakaError>;

/// Errors raised while loading configuration or preparing the runtime
#[derive(Error, Debug)]
pub enum InsakaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl InsakaError {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}
