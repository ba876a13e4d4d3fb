//! One attempt of one claimed job: run the executor, persist progress, then
//! write the outcome.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::{add_millis, Clock};
use crate::control::{JobTicket, StopReason};
use crate::executor::{
    ExecutionError, ExecutionOutput, ExecutionRequest, JobExecutor, ProgressReporter, ResultRef,
};
use crate::retry::{ErrorKind, RetryDecision, RetryPolicy};
use crate::scratch::ScratchSpace;
use crate::store::{JobId, JobStatus, JobStore, QueueJob, StoreError};

use super::progress::persist_progress;

/// What happened to a job attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(ResultRef),
    /// Back to pending, claimable after the delay.
    Retrying(Duration),
    Failed(String),
    Paused,
    Cancelled,
    /// Stopped by shutdown; left `downloading` for restart recovery.
    Interrupted,
    /// The row left `downloading` while the executor ran; nothing written.
    Superseded,
}

/// Shared by every job task of a pool.
pub(crate) struct JobContext {
    pub(crate) store: JobStore,
    pub(crate) executor: Arc<dyn JobExecutor>,
    pub(crate) scratch: ScratchSpace,
    pub(crate) retry: RetryPolicy,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) progress_interval: Duration,
}

enum WriteError {
    NotDownloading,
    Store(StoreError),
}

impl From<StoreError> for WriteError {
    fn from(e: StoreError) -> Self {
        WriteError::Store(e)
    }
}

impl JobContext {
    /// Apply `mutate` only if the job is still downloading.
    async fn write_if_downloading<F>(&self, job_id: JobId, mutate: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut QueueJob),
    {
        let res = self
            .store
            .try_update(job_id, |job| {
                if job.status != JobStatus::Downloading {
                    return Err(WriteError::NotDownloading);
                }
                mutate(job);
                Ok(())
            })
            .await;
        match res {
            Ok(_) => Ok(true),
            Err(WriteError::NotDownloading) | Err(WriteError::Store(StoreError::NotFound(_))) => {
                Ok(false)
            }
            Err(WriteError::Store(e)) => Err(e),
        }
    }

    async fn complete(&self, job_id: JobId, output: ExecutionOutput) -> Result<JobOutcome, StoreError> {
        let ExecutionOutput { result_ref: result, metadata } = output;
        let file_size = artifact_size(&result).await;
        let now = self.clock.now_millis();
        let stored = result.clone();
        let written = self
            .write_if_downloading(job_id, move |job| {
                job.status = JobStatus::Completed;
                job.progress = 1.0;
                job.result_ref = Some(stored);
                job.file_size = file_size;
                job.metadata = metadata;
                job.error_message = None;
                job.error_code = None;
                job.retry_at = None;
                job.completed_at = Some(now);
            })
            .await?;
        if !written {
            return Ok(JobOutcome::Superseded);
        }
        tracing::info!(job_id, result = %result, ?file_size, "job completed");
        Ok(JobOutcome::Completed(result))
    }

    async fn stop(&self, job_id: JobId, reason: StopReason) -> Result<JobOutcome, StoreError> {
        self.scratch.release_logged(job_id).await;
        let now = self.clock.now_millis();
        let (status, outcome) = match reason {
            StopReason::Cancel => (JobStatus::Cancelled, JobOutcome::Cancelled),
            _ => (JobStatus::Paused, JobOutcome::Paused),
        };
        let written = self
            .write_if_downloading(job_id, move |job| {
                job.status = status;
                job.result_ref = None;
                if status == JobStatus::Cancelled {
                    job.completed_at = Some(now);
                }
            })
            .await?;
        if !written {
            return Ok(JobOutcome::Superseded);
        }
        tracing::info!(job_id, status = %status, "job stopped");
        Ok(outcome)
    }

    async fn fail(&self, job_id: JobId, kind: ErrorKind, message: String) -> Result<JobOutcome, StoreError> {
        self.scratch.release_logged(job_id).await;
        let now = self.clock.now_millis();
        let policy = self.retry;
        let mut decision = RetryDecision::NoRetry;
        let decided = &mut decision;
        let msg = message.clone();
        let written = self
            .write_if_downloading(job_id, move |job| {
                let attempts = job.retry_count.saturating_add(1);
                *decided = policy.decide(attempts, job.max_retries, kind);
                // Stored count stays within max_retries.
                job.retry_count = attempts.min(job.max_retries);
                job.error_message = Some(msg);
                job.error_code = Some(kind.code().to_string());
                job.progress = 0.0;
                job.started_at = None;
                match *decided {
                    RetryDecision::RetryAfter(delay) => {
                        job.status = JobStatus::Pending;
                        job.retry_at = Some(add_millis(now, delay));
                    }
                    RetryDecision::NoRetry => {
                        job.status = JobStatus::Failed;
                        job.retry_at = None;
                        job.completed_at = Some(now);
                    }
                }
            })
            .await?;
        if !written {
            return Ok(JobOutcome::Superseded);
        }
        match decision {
            RetryDecision::RetryAfter(delay) => {
                tracing::warn!(job_id, code = kind.code(), ?delay, "job attempt failed, will retry: {}", message);
                Ok(JobOutcome::Retrying(delay))
            }
            RetryDecision::NoRetry => {
                tracing::warn!(job_id, code = kind.code(), "job failed: {}", message);
                Ok(JobOutcome::Failed(message))
            }
        }
    }

    async fn finish(
        &self,
        job_id: JobId,
        reason: Option<StopReason>,
        result: Result<ExecutionOutput, ExecutionError>,
    ) -> Result<JobOutcome, StoreError> {
        match (reason, result) {
            (Some(r @ (StopReason::Pause | StopReason::Cancel)), _) => self.stop(job_id, r).await,
            (Some(StopReason::Shutdown), Err(_)) => {
                tracing::info!(job_id, "job interrupted by shutdown");
                Ok(JobOutcome::Interrupted)
            }
            (_, Ok(result)) => self.complete(job_id, result).await,
            (None, Err(ExecutionError::Failed { kind, message })) => {
                self.fail(job_id, kind, message).await
            }
            (None, Err(ExecutionError::Cancelled)) => {
                self.fail(
                    job_id,
                    ErrorKind::Engine,
                    "executor stopped without a stop request".to_string(),
                )
                .await
            }
        }
    }
}

/// Size of the artifact behind `result`, when it names a regular file.
async fn artifact_size(result: &ResultRef) -> Option<u64> {
    match tokio::fs::metadata(result).await {
        Ok(meta) if meta.is_file() => Some(meta.len()),
        _ => None,
    }
}

/// Run one claimed job to its outcome. The ticket is released last, after
/// the final state is written, so stop waiters observe it.
pub(crate) async fn run_job(ctx: Arc<JobContext>, job: QueueJob, ticket: JobTicket) -> (JobId, JobOutcome) {
    let job_id = job.id;
    tracing::info!(job_id, source = %job.source, attempt = job.retry_count + 1, "job started");

    let (reporter, rx) = ProgressReporter::channel();
    let persist = tokio::spawn(persist_progress(
        ctx.store.clone(),
        job_id,
        rx,
        ctx.progress_interval,
    ));

    let request = ExecutionRequest {
        job_id,
        source: job.source,
        output_format: job.output_format,
        work_dir: ctx.scratch.dir_for(job_id),
    };
    let executor = Arc::clone(&ctx.executor);
    let token = ticket.token();
    // Own task so a panicking executor becomes a retryable failure.
    let result = match tokio::spawn(async move { executor.execute(request, reporter, token).await }).await {
        Ok(result) => result,
        Err(e) => Err(ExecutionError::failed(
            ErrorKind::Engine,
            format!("executor task: {e}"),
        )),
    };
    if let Err(e) = persist.await {
        tracing::warn!(job_id, "progress task join: {}", e);
    }

    let outcome = match ctx.finish(job_id, ticket.stop_reason(), result).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!(job_id, "failed to record job outcome: {}", e);
            JobOutcome::Interrupted
        }
    };
    drop(ticket);
    (job_id, outcome)
}
