use crate::store::{JobId, JobStatus, ParseVariantError, StoreError};

/// Errors returned by queue service operations. Each carries a stable code
/// for transports (see [`QueueError::code`]).
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("cannot {op} job {id}: job is {status}")]
    InvalidState {
        id: JobId,
        status: JobStatus,
        op: &'static str,
    },
    #[error("job {id} already used all {max_retries} retries")]
    RetriesExhausted { id: JobId, max_retries: u32 },
    #[error("idempotency key '{key}' is held by job {id} with a different request")]
    AlreadyExists { key: String, id: JobId },
    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

impl QueueError {
    pub fn code(&self) -> &'static str {
        match self {
            QueueError::Validation(_) => "VALIDATION_ERROR",
            QueueError::NotFound(_) => "NOT_FOUND",
            QueueError::InvalidState { .. } => "INVALID_STATE",
            QueueError::RetriesExhausted { .. } => "MAX_RETRIES_REACHED",
            QueueError::AlreadyExists { .. } => "ALREADY_EXISTS",
            QueueError::Store(_) => "STORE_ERROR",
        }
    }
}

impl From<StoreError> for QueueError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => QueueError::NotFound(id),
            other => QueueError::Store(other),
        }
    }
}

impl From<ParseVariantError> for QueueError {
    fn from(e: ParseVariantError) -> Self {
        QueueError::Validation(e.to_string())
    }
}
