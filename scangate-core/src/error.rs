use crate::job::JobStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanGateError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("referenced file missing from storage: {0}")]
    FileMissing(String),

    #[error("detector unavailable: {0}")]
    DetectorUnavailable(String),

    #[error("detector error: {0}")]
    DetectorError(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ScanGateError>;
