//! Error types shared across sluice crates

use thiserror::Error;

/// Result type alias for process-level operations
pub type Result<T> = std::result::Result<T, SluiceError>;

/// Errors that are not specific to one pipeline stage
#[derive(Error, Debug)]
pub enum SluiceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid property {key}: {message}")]
    InvalidProperty { key: String, message: String },
}

impl SluiceError {
    pub fn invalid_property(key: impl Into<String>, message: impl Into<String>) -> Self {
        SluiceError::InvalidProperty {
            key: key.into(),
            message: message.into(),
        }
    }
}
