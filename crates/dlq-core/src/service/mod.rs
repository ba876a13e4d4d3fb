//! Queue service: the operations clients call.
//!
//! Validates requests, applies idempotency, and performs every user-driven
//! state transition. Stops of running jobs go through `JobControl` so the
//! worker releases partial resources before the final state is written.

mod api;
mod error;
mod list;
mod request;

use std::sync::Arc;
use std::time::Duration;

use crate::config::DlqConfig;
use crate::control::{JobControl, StopReason};
use crate::scheduler::assign_positions;
use crate::scratch::ScratchSpace;
use crate::store::{Insertion, JobId, JobStats, JobStatus, JobStore, Priority, QueueJob};

pub use api::QueueApi;
pub use error::QueueError;
pub use request::{AddRequest, JobPage, ListQuery, DEFAULT_LIMIT, MAX_KEY_LEN, MAX_LIMIT};

/// Attempts at a cancel that races with the scheduler's claim.
const CANCEL_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Copied onto each new job.
    pub max_retries: u32,
    pub idempotency_ttl: Duration,
    /// How long pause/cancel waits for a running job to stop.
    pub cancel_timeout: Duration,
}

impl ServiceSettings {
    pub fn from_config(cfg: &DlqConfig) -> Self {
        Self {
            max_retries: cfg.retry_policy().max_retries,
            idempotency_ttl: cfg.idempotency_ttl(),
            cancel_timeout: cfg.cancel_timeout(),
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from_config(&DlqConfig::default())
    }
}

#[derive(Clone)]
pub struct QueueService {
    store: JobStore,
    control: Arc<JobControl>,
    scratch: ScratchSpace,
    settings: ServiceSettings,
}

impl QueueService {
    pub fn new(
        store: JobStore,
        control: Arc<JobControl>,
        scratch: ScratchSpace,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            store,
            control,
            scratch,
            settings,
        }
    }

    /// Submit a job. With an idempotency key, a live job holding the same key
    /// is returned unchanged.
    pub async fn add(&self, request: AddRequest) -> Result<QueueJob, QueueError> {
        let new = request.validate(self.settings.max_retries)?;
        let job = match self
            .store
            .insert_idempotent(&new, self.settings.idempotency_ttl)
            .await?
        {
            Insertion::Created(job) => {
                tracing::info!(job_id = job.id, source = %job.source, priority = %job.priority, "job added");
                job
            }
            Insertion::Existing(job) => {
                if !job.same_request(&new) {
                    return Err(QueueError::AlreadyExists {
                        key: new.idempotency_key.unwrap_or_default(),
                        id: job.id,
                    });
                }
                tracing::debug!(job_id = job.id, "idempotent resubmission");
                job
            }
        };
        self.with_position(job).await
    }

    /// One page of jobs. Positions are computed over the whole queue before
    /// filtering.
    pub async fn list(&self, query: &ListQuery) -> Result<JobPage, QueueError> {
        let snapshot = self.positioned_snapshot().await?;
        let stats = JobStats::from_jobs(&snapshot);
        let mut items: Vec<QueueJob> = snapshot
            .into_iter()
            .filter(|j| query.status.map_or(true, |s| j.status == s))
            .collect();
        items.sort_by(list::listing_order);
        let total = items.len();
        let items = items
            .into_iter()
            .skip(query.offset)
            .take(query.effective_limit())
            .collect();
        Ok(JobPage {
            total,
            items,
            stats,
        })
    }

    pub async fn get(&self, id: JobId) -> Result<QueueJob, QueueError> {
        let job = self.load(id).await?;
        self.with_position(job).await
    }

    /// Change priority of a job still waiting to start.
    pub async fn update_priority(&self, id: JobId, priority: Priority) -> Result<QueueJob, QueueError> {
        let job = self
            .store
            .try_update(id, |job| {
                require(job, "change priority of", &[JobStatus::Pending])?;
                job.priority = priority;
                Ok::<(), QueueError>(())
            })
            .await?;
        tracing::info!(job_id = id, priority = %priority, "priority changed");
        self.with_position(job).await
    }

    /// Pause a downloading job. Returns once the worker has released the
    /// job's resources (or the stop timed out) with the job `paused`.
    pub async fn pause(&self, id: JobId) -> Result<QueueJob, QueueError> {
        let job = self.load(id).await?;
        require(&job, "pause", &[JobStatus::Downloading])?;

        self.stop_running(id, StopReason::Pause).await?;
        let job = self.load(id).await?;
        if job.status != JobStatus::Paused {
            // Finished before the stop took effect.
            return Err(QueueError::InvalidState {
                id,
                status: job.status,
                op: "pause",
            });
        }
        tracing::info!(job_id = id, "job paused");
        self.with_position(job).await
    }

    /// Resume a paused job at the back of its priority tier.
    pub async fn resume(&self, id: JobId) -> Result<QueueJob, QueueError> {
        let now = self.store.now();
        let job = self
            .store
            .try_update(id, |job| {
                require(job, "resume", &[JobStatus::Paused])?;
                job.status = JobStatus::Pending;
                job.queued_at = now;
                job.progress = 0.0;
                job.retry_at = None;
                job.started_at = None;
                Ok::<(), QueueError>(())
            })
            .await?;
        tracing::info!(job_id = id, "job resumed");
        self.with_position(job).await
    }

    /// Put a failed job back in the queue at the back of its priority tier.
    /// The retry count is kept, so a job that used up its retries stays failed.
    pub async fn retry(&self, id: JobId) -> Result<QueueJob, QueueError> {
        let now = self.store.now();
        let job = self
            .store
            .try_update(id, |job| {
                require(job, "retry", &[JobStatus::Failed])?;
                if job.retry_count >= job.max_retries {
                    return Err(QueueError::RetriesExhausted {
                        id: job.id,
                        max_retries: job.max_retries,
                    });
                }
                job.status = JobStatus::Pending;
                job.queued_at = now;
                job.progress = 0.0;
                job.retry_at = None;
                job.started_at = None;
                job.completed_at = None;
                job.error_message = None;
                job.error_code = None;
                Ok::<(), QueueError>(())
            })
            .await?;
        tracing::info!(job_id = id, retry_count = job.retry_count, "failed job requeued");
        self.with_position(job).await
    }

    /// Cancel any non-terminal job. A running executor is stopped and its
    /// partial artifacts removed before the job reads `cancelled`.
    pub async fn cancel(&self, id: JobId) -> Result<QueueJob, QueueError> {
        let mut last_status = JobStatus::Pending;
        for _ in 0..CANCEL_ATTEMPTS {
            let job = self.load(id).await?;
            last_status = job.status;
            match job.status {
                JobStatus::Pending | JobStatus::Paused => {
                    // Leftovers go before the state reads `cancelled`.
                    self.scratch.release_logged(id).await;
                    let now = self.store.now();
                    let res = self
                        .store
                        .try_update(id, |job| {
                            require(job, "cancel", &[JobStatus::Pending, JobStatus::Paused])?;
                            mark_cancelled(job, now);
                            Ok::<(), QueueError>(())
                        })
                        .await;
                    match res {
                        Ok(job) => {
                            tracing::info!(job_id = id, "job cancelled");
                            return Ok(job);
                        }
                        // Claimed in between: go around and stop the worker.
                        Err(QueueError::InvalidState { .. }) => continue,
                        Err(e) => return Err(e),
                    }
                }
                JobStatus::Downloading => {
                    self.stop_running(id, StopReason::Cancel).await?;
                    let job = self.load(id).await?;
                    if job.status == JobStatus::Cancelled {
                        tracing::info!(job_id = id, "job cancelled");
                        return Ok(job);
                    }
                }
                status => {
                    return Err(QueueError::InvalidState {
                        id,
                        status,
                        op: "cancel",
                    })
                }
            }
        }
        Err(QueueError::InvalidState {
            id,
            status: last_status,
            op: "cancel",
        })
    }

    /// Delete one job and its files. Refused while downloading.
    pub async fn remove(&self, id: JobId) -> Result<QueueJob, QueueError> {
        let job = self
            .store
            .delete_checked(id, |job| {
                if job.status == JobStatus::Downloading {
                    return Err(QueueError::InvalidState {
                        id,
                        status: job.status,
                        op: "remove",
                    });
                }
                Ok(())
            })
            .await?;
        self.scratch.release_logged(id).await;
        tracing::info!(job_id = id, status = %job.status, "job removed");
        Ok(job)
    }

    /// Delete every completed and failed job. Returns how many were removed.
    pub async fn clear_completed(&self) -> Result<usize, QueueError> {
        let removed = self.store.delete_finished().await?;
        for job in &removed {
            self.scratch.release_logged(job.id).await;
        }
        tracing::info!(count = removed.len(), "cleared finished jobs");
        Ok(removed.len())
    }

    pub async fn stats(&self) -> Result<JobStats, QueueError> {
        let snapshot = self.store.snapshot().await?;
        Ok(JobStats::from_jobs(&snapshot))
    }

    /// Full snapshot with positions filled in, in id order.
    pub async fn positioned_snapshot(&self) -> Result<Vec<QueueJob>, QueueError> {
        let mut snapshot = self.store.snapshot().await?;
        assign_positions(&mut snapshot);
        Ok(snapshot)
    }

    async fn load(&self, id: JobId) -> Result<QueueJob, QueueError> {
        self.store.get(id).await?.ok_or(QueueError::NotFound(id))
    }

    async fn with_position(&self, mut job: QueueJob) -> Result<QueueJob, QueueError> {
        if job.status.is_terminal() {
            job.position = None;
            return Ok(job);
        }
        let snapshot = self.positioned_snapshot().await?;
        job.position = snapshot
            .iter()
            .find(|j| j.id == job.id)
            .and_then(|j| j.position);
        Ok(job)
    }

    /// Ask the worker to stop a running job and wait for it. Without a live
    /// worker registration (no runner in this process, or the stop timed
    /// out) the state is written here.
    async fn stop_running(&self, id: JobId, reason: StopReason) -> Result<(), QueueError> {
        match self.control.request_stop(id, reason) {
            Some(waiter) => {
                if waiter.wait(self.settings.cancel_timeout).await {
                    return Ok(());
                }
                tracing::warn!(job_id = id, ?reason, "worker did not stop in time, forcing state");
            }
            None => tracing::debug!(job_id = id, ?reason, "no running worker, writing state directly"),
        }
        self.force_stop(id, reason).await
    }

    async fn force_stop(&self, id: JobId, reason: StopReason) -> Result<(), QueueError> {
        self.scratch.release_logged(id).await;
        let now = self.store.now();
        self.store
            .update(id, |job| {
                if job.status != JobStatus::Downloading {
                    return;
                }
                match reason {
                    StopReason::Cancel => mark_cancelled(job, now),
                    _ => job.status = JobStatus::Paused,
                }
            })
            .await?;
        Ok(())
    }
}

fn require(job: &QueueJob, op: &'static str, allowed: &[JobStatus]) -> Result<(), QueueError> {
    if allowed.contains(&job.status) {
        Ok(())
    } else {
        Err(QueueError::InvalidState {
            id: job.id,
            status: job.status,
            op,
        })
    }
}

fn mark_cancelled(job: &mut QueueJob, now: i64) {
    job.status = JobStatus::Cancelled;
    job.retry_at = None;
    job.result_ref = None;
    job.completed_at = Some(now);
}
