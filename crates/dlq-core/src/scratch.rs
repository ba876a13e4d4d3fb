//! Per-job scratch directories for in-progress artifacts.
//!
//! Each attempt works under `<root>/job-<id>`. The directory is removed when a
//! job is paused, cancelled, removed, cleared, fails, or is recovered after a
//! restart; a completed job keeps it until the client has materialized it
//! and the job is cleared.

use std::io;
use std::path::{Path, PathBuf};

use crate::store::JobId;

#[derive(Debug, Clone)]
pub struct ScratchSpace {
    root: PathBuf,
}

impl ScratchSpace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir_for(&self, job_id: JobId) -> PathBuf {
        self.root.join(format!("job-{job_id}"))
    }

    /// Remove a job's scratch directory. A missing directory is not an error.
    pub async fn release(&self, job_id: JobId) -> io::Result<()> {
        let dir = self.dir_for(job_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                tracing::debug!(job_id, dir = %dir.display(), "scratch released");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Like `release`, but logs instead of failing. Used where a leftover
    /// directory must not block a state transition.
    pub async fn release_logged(&self, job_id: JobId) {
        if let Err(e) = self.release(job_id).await {
            tracing::warn!(job_id, "failed to remove scratch dir: {}", e);
        }
    }
}
