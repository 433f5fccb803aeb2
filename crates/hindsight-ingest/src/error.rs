//! Error types for the ingestion pipeline.

use hindsight_core::JobStatus;
use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during ingestion.
#[derive(Error, Debug)]
pub enum Error {
    /// The archive's central directory could not be read.
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    /// An archive entry would write outside the extract root.
    #[error("archive entry escapes extract root: {0}")]
    PathEscape(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Document store error.
    #[error("document store error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    /// BSON encoding error.
    #[error("BSON error: {0}")]
    Bson(#[from] bson::ser::Error),

    /// HTTP error talking to the embedding or vector endpoint.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Embedding failed permanently (client error, malformed response).
    /// Recorded as a FailedImport for the affected batch.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Embedding endpoint stayed unavailable after the retry budget
    /// (timeouts, 5xx). Escalates to job ERROR.
    #[error("embedding endpoint unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Embedding dimensionality changed between batches. Escalates to
    /// job ERROR.
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Vector store request failed.
    #[error("vector store error: {0}")]
    VectorStore(String),

    /// Job status transition refused by the state machine.
    #[error("invalid job transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// No job with the given id.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// A start was requested for a job that is already running.
    #[error("job already running: {0}")]
    AlreadyRunning(String),

    /// A resume was requested but the extract directory is gone.
    #[error("extract directory missing: {0}")]
    MissingExtract(String),

    /// The job's cancel flag was observed; unwinds the current stage.
    #[error("job cancelled")]
    Cancelled,

    /// Core error (configuration, status parsing).
    #[error(transparent)]
    Core(hindsight_core::Error),
}

impl From<hindsight_core::Error> for Error {
    fn from(e: hindsight_core::Error) -> Self {
        match e {
            hindsight_core::Error::InvalidTransition { from, to } => {
                Error::InvalidTransition { from, to }
            }
            other => Error::Core(other),
        }
    }
}
