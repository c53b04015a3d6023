//! Error types shared across the workspace

use thiserror::Error;

/// Result type alias for shared operations
pub type Result<T> = std::result::Result<T, NpoError>;

/// Errors raised by shared infrastructure (configuration, logging, serialization)
#[derive(Error, Debug)]
pub enum NpoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging error: {0}")]
    Logging(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl NpoError {
    pub fn config(message: impl Into<String>) -> Self {
        NpoError::Config(message.into())
    }
}
