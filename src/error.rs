//! Error type shared by every pipeline stage.
//!
//! Stage functions return [`PipelineError`] so callers (the CLI, tests) can
//! match on the failure kind. The binary converts to `anyhow` at the edge.

use pagetrail_core::models::{IngestionStatus, TransitionError, UnknownStatus};
use thiserror::Error;

use crate::source::SourceError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The stage already ran; re-running it needs explicit replace intent.
    #[error("document {document_id} is already {status}; re-run {stage} with --replace to overwrite")]
    AlreadyProcessed {
        document_id: String,
        stage: &'static str,
        status: IngestionStatus,
    },

    #[error("document {0} has no blocks; run parse first")]
    NotParsed(String),

    #[error("no content could be extracted from document {document_id}: {reason}")]
    TotalExtractionFailure { document_id: String, reason: String },

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    /// A status compare-and-swap lost; the stage's writes were rolled back.
    #[error("document {0} changed status while the stage was running; nothing was written")]
    ConcurrentModification(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<UnknownStatus> for PipelineError {
    fn from(err: UnknownStatus) -> Self {
        PipelineError::Corrupt(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
