//! Workflow error taxonomy.
//!
//! Library operations return [`WorkflowError`]; application glue (CLI, server
//! bootstrap) wraps it in `anyhow`. `InferenceFailure` and `ApprovalRejected`
//! exist so callers can name those outcomes, but the poll contract reports
//! them as terminal job states rather than as `Err`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WorkflowError>;

#[derive(Error, Debug)]
pub enum WorkflowError {
    /// Malformed or missing input, rejected before any state mutation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Referenced clock-in, project, user, or handle does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// E.g. ending a clock-in that is already completed.
    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// Job queue or runner backend unreachable.
    #[error("dispatch unavailable: {0}")]
    DispatchUnavailable(String),

    #[error("inference failure: {0}")]
    InferenceFailure(String),

    #[error("approval rejected: {0}")]
    ApprovalRejected(String),

    /// File write/delete failure.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("ephemeral store error: {0}")]
    Ephemeral(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WorkflowError {
    pub fn validation(msg: impl Into<String>) -> Self {
        WorkflowError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        WorkflowError::NotFound(msg.into())
    }
}
