//! Error types for the ingestion pipeline

use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Failure taxonomy for the ingestion pipeline.
///
/// Every variant is caught at the runner boundary and converted into a
/// structured per-item outcome; none of them may abort the batch loop.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Source extraction failed: missing/duplicate attachment, connection
    /// failure, malformed MIME.
    #[error("Adapter error: {0}")]
    Adapter(String),

    /// Sender not allowed or file structurally unsound.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Raw artifact persistence failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// File-level parse failure. Always implies quarantine.
    #[error("Parse error: {message} ({dropped_rows}/{total_rows} rows dropped)")]
    Parse {
        message: String,
        dropped_rows: usize,
        total_rows: usize,
    },

    /// Resubmission of an already-processed artifact. Non-fatal, signals skip.
    #[error("Duplicate file detected: {fingerprint}")]
    Duplicate { fingerprint: String },

    /// Illegal status transition requested. Stored state is left unchanged.
    #[error("Invalid state transition: {from} -> {to}")]
    StateTransition { from: String, to: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl IngestError {
    /// Whether this failure should park the artifact for human review
    /// instead of recording a hard failure.
    pub fn should_quarantine(&self) -> bool {
        matches!(self, IngestError::Parse { .. })
    }
}
