//! Job executor boundary.
//!
//! The worker pool hands each claimed job to a `JobExecutor` together with a
//! progress reporter and a cancellation token. Executors produce an artifact
//! inside the job's scratch directory and return a `ResultRef` pointing at it,
//! plus whatever media metadata they learned along the way.

mod http;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::retry::ErrorKind;
use crate::store::{JobId, OutputFormat};

pub use crate::store::MediaMetadata;

pub use http::HttpExecutor;

/// Opaque handle to a produced artifact (a filesystem path for the bundled executor).
pub type ResultRef = String;

/// A finished attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutput {
    pub result_ref: ResultRef,
    pub metadata: MediaMetadata,
}

impl From<ResultRef> for ExecutionOutput {
    fn from(result_ref: ResultRef) -> Self {
        Self {
            result_ref,
            metadata: MediaMetadata::default(),
        }
    }
}

/// Everything an executor needs to run one attempt of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub job_id: JobId,
    pub source: String,
    pub output_format: OutputFormat,
    /// Scratch directory owned by this attempt; removed on pause/cancel/failure.
    pub work_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("{message}")]
    Failed { kind: ErrorKind, message: String },
    #[error("execution cancelled")]
    Cancelled,
}

impl ExecutionError {
    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        ExecutionError::Failed {
            kind,
            message: message.into(),
        }
    }
}

/// Runs one attempt of a job.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Produce the artifact for `request`. Must return promptly with
    /// `ExecutionError::Cancelled` once `cancel` fires.
    async fn execute(
        &self,
        request: ExecutionRequest,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<ExecutionOutput, ExecutionError>;
}

/// Progress sink handed to executors. Values are clamped to [0, 1] and never
/// move backwards within one attempt.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Arc<watch::Sender<f64>>,
}

impl ProgressReporter {
    /// Reporter plus the receiver the worker drains into the store.
    pub fn channel() -> (Self, watch::Receiver<f64>) {
        let (tx, rx) = watch::channel(0.0);
        (Self { tx: Arc::new(tx) }, rx)
    }

    pub fn report(&self, fraction: f64) {
        if !fraction.is_finite() {
            return;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        self.tx.send_if_modified(|cur| {
            if fraction > *cur {
                *cur = fraction;
                true
            } else {
                false
            }
        });
    }

    /// Convenience for byte counters; ignored while the total is unknown.
    pub fn report_bytes(&self, done: u64, total: u64) {
        if total > 0 {
            self.report(done as f64 / total as f64);
        }
    }

    pub fn current(&self) -> f64 {
        *self.tx.borrow()
    }
}
