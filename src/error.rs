//! Error types for the transcription system

use thiserror::Error;

/// Crate-wide error type. Each variant corresponds to one externally visible
/// failure kind; binaries map `NoEventsDetected` to exit code 2 and everything
/// else to exit code 1.
#[derive(Debug, Error)]
pub enum ScoreError {
    /// File open/read/write failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Input PCM buffer contained no samples
    #[error("Input audio is empty")]
    EmptyInput,

    /// Model file missing, unreadable, or rejected by the inference runtime
    #[error("Model load error: {0}")]
    ModelLoad(String),

    /// Tensor rank or dimension mismatch
    #[error("Tensor shape mismatch: {0}")]
    Shape(String),

    /// Invalid CLI value or out-of-range preset parameter
    #[error("{0}")]
    Arg(String),

    /// The notes pipeline produced zero events
    #[error("No notes detected in uploaded audio.")]
    NoEventsDetected,
}

impl From<std::io::Error> for ScoreError {
    fn from(err: std::io::Error) -> Self {
        ScoreError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ScoreError {
    fn from(err: serde_json::Error) -> Self {
        ScoreError::ModelLoad(format!("invalid model JSON: {}", err))
    }
}

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, ScoreError>;
