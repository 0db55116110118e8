//! Error types for ttsflow.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TtsError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Synthesis errors
    #[error("Synthesis failed: {message}")]
    Synthesis { message: String },

    #[error("Vendor {vendor} rejected request ({code}): {message}")]
    Vendor {
        vendor: String,
        code: String,
        message: String,
    },

    #[error("Synthesizer rejected configuration update: {message}")]
    ConfigUpdate { message: String },

    // Audio output errors
    #[error("Audio output error: {message}")]
    AudioOutput { message: String },

    // Engine errors
    #[error("Engine is shut down")]
    EngineClosed,

    #[error("Protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl TtsError {
    /// Shorthand for a synthesis failure with a message.
    pub fn synthesis(message: impl Into<String>) -> Self {
        TtsError::Synthesis {
            message: message.into(),
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, TtsError>;
