//! Error types for Tolk.

use std::time::Duration;
use thiserror::Error;

/// Library-level error type for Tolk operations.
#[derive(Error, Debug)]
pub enum TolkError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Cancelled after {:.1}s", .0.as_secs_f64())]
    Cancelled(Duration),

    #[error("{stage} failed: {message}")]
    Stage { stage: String, message: String },

    #[error("Transcription failed: {0}")]
    Transcription(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("WAV encoding error: {0}")]
    Wav(#[from] hound::Error),

    #[error("External tool not found: {0}. Please install it and ensure it's in your PATH.")]
    ToolNotFound(String),

    #[error("External tool failed: {0}")]
    ToolFailed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl TolkError {
    /// Build a stage failure for the given stage label.
    pub fn stage(stage: impl std::fmt::Display, message: impl Into<String>) -> Self {
        TolkError::Stage {
            stage: stage.to_string(),
            message: message.into(),
        }
    }

    /// Whether this error is a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TolkError::Cancelled(_))
    }
}

/// Result type alias for Tolk operations.
pub type Result<T> = std::result::Result<T, TolkError>;
