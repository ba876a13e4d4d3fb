//! Store error type.

use super::types::JobId;

/// Errors raised by the job store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(JobId),
    /// A row holds a value the current schema cannot decode.
    #[error("corrupt row for job {id}: {reason}")]
    Corrupt { id: JobId, reason: String },
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("state directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("state directory: {0}")]
    Xdg(#[from] xdg::BaseDirectoriesError),
}
