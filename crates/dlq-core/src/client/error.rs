use std::path::PathBuf;

use crate::service::QueueError;
use crate::store::JobId;

/// Mirror database failure.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("mirror database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("mirror row {id} holds an undecodable job: {source}")]
    Decode {
        id: JobId,
        #[source]
        source: serde_json::Error,
    },
    #[error("encode job {id}: {source}")]
    Encode {
        id: JobId,
        #[source]
        source: serde_json::Error,
    },
    #[error("mirror I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XDG base directories: {0}")]
    Xdg(#[from] xdg::BaseDirectoriesError),
}

/// Persisting one completed job into the library failed. Left for the next poll.
#[derive(Debug, thiserror::Error)]
pub enum MaterializationError {
    #[error("job {0} completed without a result reference")]
    MissingResult(JobId),
    #[error("artifact {} is not available: {source}", path.display())]
    ArtifactUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("library I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("library metadata: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("library refused job {id}: {reason}")]
    Rejected { id: JobId, reason: String },
}

/// A poll cycle failed before the mirror could be updated.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Fetching the server snapshot failed; the mirror is untouched.
    #[error("poll failed: {0}")]
    Poll(#[source] QueueError),
    #[error(transparent)]
    Mirror(#[from] MirrorError),
}
