//! Error types for job dispatch.
//!
//! Handler failures never show up here: they are captured by the runner and
//! turned into a failed [`Outcome`](crate::types::Outcome).

use crate::types::JobId;

/// Errors surfaced to the host around a dispatch
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The claimed record could not be turned into a job context.
    /// The job is never handed to a handler.
    #[error("malformed job: {reason}")]
    MalformedJob { job_id: JobId, reason: String },

    #[error("no handler registered for '{0}'")]
    UnknownHandler(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Failures reported by the queue boundary
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to encode outcome: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("{0}")]
    Backend(String),
}

/// Failures reported by a log sink. Always swallowed by the caller.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("log sink unavailable: {0}")]
    Unavailable(String),
}
