//! Permanent library the client materializes completed jobs into.

use async_trait::async_trait;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::checksum;
use crate::store::QueueJob;

use super::error::MaterializationError;

/// Destination for finished artifacts. Persisting the same job twice must
/// succeed without producing a second copy.
#[async_trait]
pub trait Library: Send + Sync {
    /// Store the artifact and metadata of a completed job; returns where it landed.
    async fn persist(&self, job: &QueueJob) -> Result<PathBuf, MaterializationError>;
}

/// Library backed by a directory: `<root>/<id>.<ext>` plus `<root>/<id>.json`.
#[derive(Debug, Clone)]
pub struct DirLibrary {
    root: PathBuf,
}

impl DirLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_path(&self, job: &QueueJob) -> PathBuf {
        self.root
            .join(format!("{}.{}", job.id, job.output_format.extension()))
    }

    pub fn metadata_path(&self, job: &QueueJob) -> PathBuf {
        self.root.join(format!("{}.json", job.id))
    }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> MaterializationError + '_ {
    move |source| MaterializationError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Produce `dest` through a `.part` file and an atomic rename.
fn write_atomic(dest: &Path, write: impl FnOnce(&Path) -> io::Result<()>) -> Result<(), MaterializationError> {
    let mut part = dest.as_os_str().to_owned();
    part.push(".part");
    let part = PathBuf::from(part);
    write(&part).map_err(io_err(&part))?;
    fs::rename(&part, dest).map_err(io_err(dest))
}

fn persist_blocking(
    artifact: PathBuf,
    metadata: PathBuf,
    root: PathBuf,
    job: QueueJob,
) -> Result<PathBuf, MaterializationError> {
    let src = PathBuf::from(
        job.result_ref
            .as_deref()
            .ok_or(MaterializationError::MissingResult(job.id))?,
    );
    fs::metadata(&src).map_err(|source| MaterializationError::ArtifactUnavailable {
        path: src.clone(),
        source,
    })?;
    fs::create_dir_all(&root).map_err(io_err(&root))?;

    let duplicate = artifact.exists()
        && checksum::same_content(&src, &artifact).map_err(io_err(&artifact))?;
    if duplicate {
        tracing::debug!(job_id = job.id, path = %artifact.display(), "artifact already in library");
    } else {
        write_atomic(&artifact, |part| fs::copy(&src, part).map(|_| ()))?;
    }

    let json = serde_json::to_vec_pretty(&job)?;
    write_atomic(&metadata, |part| fs::write(part, &json))?;
    Ok(artifact)
}

#[async_trait]
impl Library for DirLibrary {
    async fn persist(&self, job: &QueueJob) -> Result<PathBuf, MaterializationError> {
        let artifact = self.artifact_path(job);
        let metadata = self.metadata_path(job);
        let root = self.root.clone();
        let job = job.clone();
        tokio::task::spawn_blocking(move || persist_blocking(artifact, metadata, root, job))
            .await
            .map_err(|e| MaterializationError::Io {
                path: self.root.clone(),
                source: io::Error::new(io::ErrorKind::Other, e.to_string()),
            })?
    }
}
