//! Error types for kikitori.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum KikitoriError {
    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio decode errors
    #[error("Audio decode failed: {message}")]
    Decode { message: String },

    // Acoustic model errors
    #[error("Transcription model not found at {path}")]
    ModelNotFound { path: String },

    #[error("Transcription model unavailable: {message}")]
    ModelUnavailable { message: String },

    #[error("Transcription inference failed: {message}")]
    Transcription { message: String },

    // Post-processing errors
    #[error("Normalization failed: {message}")]
    Normalization { message: String },

    #[error("Translation failed: {message}")]
    Translation { message: String },

    // Wire protocol errors
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Unknown session: {id}")]
    SessionNotFound { id: String },

    #[error("Session already ended")]
    SessionEnded,

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl KikitoriError {
    /// Whether the failure is transient and the operation may be retried.
    ///
    /// Transient transcription errors skip one pass; transient translation
    /// errors are retried with backoff. Everything else is terminal for the
    /// operation that raised it.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            KikitoriError::Transcription { .. } | KikitoriError::Translation { .. }
        )
    }

    /// Wire error code for this error, per the streaming protocol.
    pub fn wire_code(&self) -> &'static str {
        match self {
            KikitoriError::Decode { .. } => "decode",
            KikitoriError::Transcription { .. } | KikitoriError::Translation { .. } => {
                "model_transient"
            }
            KikitoriError::ModelNotFound { .. }
            | KikitoriError::ModelUnavailable { .. }
            | KikitoriError::Normalization { .. } => "model_fatal",
            KikitoriError::Protocol { .. } => "protocol",
            KikitoriError::SessionNotFound { .. } | KikitoriError::SessionEnded => {
                "session_not_found"
            }
            _ => "internal",
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, KikitoriError>;
