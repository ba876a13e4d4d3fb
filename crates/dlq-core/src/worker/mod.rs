//! Worker pool: the scheduling loop and the tasks running claimed jobs.
//!
//! Each tick reaps finished tasks, plans from a fresh store snapshot, then
//! registers and atomically claims each startable job before spawning its
//! task on a `JoinSet`. The claim is the only way into `downloading`, so the
//! concurrency limit holds even if a plan is stale.

mod job;
mod progress;

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::config::DlqConfig;
use crate::control::{JobControl, StopReason};
use crate::executor::JobExecutor;
use crate::retry::RetryPolicy;
use crate::scheduler::Scheduler;
use crate::scratch::ScratchSpace;
use crate::store::{JobId, JobStore, StoreError};

pub use job::JobOutcome;
use job::{run_job, JobContext};

/// Pool tuning, usually taken from `DlqConfig`.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_concurrent: usize,
    pub tick_interval: Duration,
    pub progress_interval: Duration,
    pub retry: RetryPolicy,
}

impl PoolSettings {
    pub fn from_config(cfg: &DlqConfig) -> Self {
        Self {
            max_concurrent: cfg.max_concurrent,
            tick_interval: cfg.tick_interval(),
            progress_interval: cfg.progress_interval(),
            retry: cfg.retry_policy(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from_config(&DlqConfig::default())
    }
}

pub struct WorkerPool {
    ctx: Arc<JobContext>,
    control: Arc<JobControl>,
    scheduler: Scheduler,
    tick_interval: Duration,
    tasks: JoinSet<(JobId, JobOutcome)>,
}

impl WorkerPool {
    pub fn new(
        store: JobStore,
        executor: Arc<dyn JobExecutor>,
        control: Arc<JobControl>,
        scratch: ScratchSpace,
        clock: Arc<dyn Clock>,
        settings: PoolSettings,
    ) -> Self {
        let ctx = JobContext {
            store,
            executor,
            scratch,
            retry: settings.retry,
            clock,
            progress_interval: settings.progress_interval,
        };
        Self {
            ctx: Arc::new(ctx),
            control,
            scheduler: Scheduler::new(settings.max_concurrent),
            tick_interval: settings.tick_interval,
            tasks: JoinSet::new(),
        }
    }

    /// Restart recovery: every job left `downloading` by a previous process
    /// goes back to `pending` and loses its scratch directory. Call once
    /// before the first tick.
    pub async fn recover(&self) -> Result<Vec<JobId>, StoreError> {
        let ids = self.ctx.store.recover_interrupted().await?;
        for &job_id in &ids {
            self.ctx.scratch.release_logged(job_id).await;
        }
        if !ids.is_empty() {
            tracing::info!(count = ids.len(), "recovered interrupted jobs");
        }
        Ok(ids)
    }

    /// Number of job tasks not yet reaped.
    pub fn active_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// One scheduling pass. Returns the ids started.
    pub async fn tick(&mut self) -> Result<Vec<JobId>, StoreError> {
        self.reap();

        let snapshot = self.ctx.store.snapshot().await?;
        let plan = self
            .scheduler
            .plan(&snapshot, self.ctx.clock.now_millis());
        if !plan.startable.is_empty() {
            tracing::debug!(active = plan.active, startable = ?plan.startable, "scheduling pass");
        }

        let mut started = Vec::with_capacity(plan.startable.len());
        for job_id in plan.startable {
            // Registered before the claim so a stop request can never see a
            // downloading job without a ticket.
            let ticket = self.control.register(job_id);
            let Some(job) = self
                .ctx
                .store
                .claim(job_id, self.scheduler.max_concurrent())
                .await?
            else {
                continue;
            };
            self.tasks.spawn(run_job(Arc::clone(&self.ctx), job, ticket));
            started.push(job_id);
        }
        Ok(started)
    }

    /// Drive ticks until `shutdown` fires, then stop running executors and
    /// wait for their tasks. Interrupted jobs stay `downloading` until the
    /// next `recover`.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        tracing::info!(
            max_concurrent = self.scheduler.max_concurrent(),
            tick_ms = self.tick_interval.as_millis() as u64,
            "worker pool started"
        );
        loop {
            if let Err(e) = self.tick().await {
                tracing::warn!("scheduling pass failed: {}", e);
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.tick_interval) => {}
            }
        }

        let stopping = self.control.stop_all(StopReason::Shutdown);
        tracing::info!(stopping, "worker pool shutting down");
        self.drain().await;
        tracing::info!("worker pool stopped");
    }

    /// Wait for every job task to finish.
    pub async fn drain(&mut self) -> Vec<(JobId, JobOutcome)> {
        let mut outcomes = Vec::new();
        while let Some(res) = self.tasks.join_next().await {
            if let Some(done) = Self::joined(res) {
                outcomes.push(done);
            }
        }
        outcomes
    }

    fn reap(&mut self) {
        while let Some(res) = self.tasks.try_join_next() {
            Self::joined(res);
        }
    }

    fn joined(
        res: Result<(JobId, JobOutcome), tokio::task::JoinError>,
    ) -> Option<(JobId, JobOutcome)> {
        match res {
            Ok((job_id, outcome)) => {
                tracing::debug!(job_id, ?outcome, "job task finished");
                Some((job_id, outcome))
            }
            Err(e) => {
                tracing::warn!("job task join: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests;
