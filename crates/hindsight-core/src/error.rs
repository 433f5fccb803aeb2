//! Shared error types for the core crate.

use crate::status::JobStatus;
use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by core types.
#[derive(Error, Debug)]
pub enum Error {
    /// A job status transition not permitted by the state machine.
    #[error("invalid job transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// Configuration error (missing or malformed environment variable).
    #[error("configuration error: {0}")]
    Config(String),

    /// An unrecognised status string read back from the store.
    #[error("unknown job status: {0}")]
    UnknownStatus(String),
}
