//! Error types for cogmap.

use thiserror::Error;

/// Result type alias using cogmap's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while producing a cognitive artifact.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input (empty query, duplicate model indexes, ...).
    /// Fails the run before any stage executes.
    #[error("Invalid input: {0}")]
    Input(String),

    /// Embedding transport exhausted its retries.
    #[error("Embedding failed after {attempts} attempts: {message}")]
    Embedding { message: String, attempts: u32 },

    /// The mapper envelope could not be parsed. The raw envelope is kept
    /// so the caller can retry a different mapper without losing it.
    #[error("Mapper envelope rejected: {message}")]
    Mapper {
        message: String,
        raw: Option<String>,
    },

    /// A stage exceeded its deadline.
    #[error("Stage '{stage}' timed out after {deadline_ms}ms")]
    StageTimeout { stage: String, deadline_ms: u64 },

    /// A cross-reference invariant was violated during assembly.
    #[error("Invariant violation: {0}")]
    Invariant(String),

    /// The run was cancelled cooperatively.
    #[error("Cancelled during stage '{stage}'")]
    Cancelled { stage: String },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create an input error.
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }

    /// Create an embedding error.
    pub fn embedding(message: impl Into<String>, attempts: u32) -> Self {
        Self::Embedding {
            message: message.into(),
            attempts,
        }
    }

    /// Create a mapper error carrying the raw envelope.
    pub fn mapper(message: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::Mapper {
            message: message.into(),
            raw: Some(raw.into()),
        }
    }

    /// Create a stage timeout error.
    pub fn stage_timeout(stage: impl Into<String>, deadline_ms: u64) -> Self {
        Self::StageTimeout {
            stage: stage.into(),
            deadline_ms,
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(stage: impl Into<String>) -> Self {
        Self::Cancelled {
            stage: stage.into(),
        }
    }

    /// Whether this error aborts the whole run. Input and embedding errors
    /// are the only ones the caller sees as `Err`; everything else degrades
    /// to an absent sub-artifact.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Input(_) | Self::Embedding { .. })
    }
}
