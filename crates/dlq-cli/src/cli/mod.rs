//! CLI for the DLQ job queue.

mod commands;
mod control_socket;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dlq_core::clock::{Clock, SystemClock};
use dlq_core::config::{self, DlqConfig};
use dlq_core::control::JobControl;
use dlq_core::scratch::ScratchSpace;
use dlq_core::service::{QueueService, ServiceSettings};
use dlq_core::store::{JobId, JobStatus, JobStore, OutputFormat, Priority};
use std::sync::Arc;

use commands::{
    run_add, run_cancel, run_clear, run_pause, run_priority, run_remove, run_resume,
    run_retry, run_server, run_show, run_stats, run_status, run_sync,
};

/// Top-level CLI for the DLQ job queue.
#[derive(Debug, Parser)]
#[command(name = "dlq")]
#[command(about = "DLQ: durable download-and-convert job queue", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run the worker pool until interrupted (Ctrl-C).
    Run {
        /// Override the configured number of concurrent jobs.
        #[arg(long, value_name = "N")]
        max_concurrent: Option<usize>,
    },

    /// Submit a new job.
    Add {
        /// Source URL (http or https).
        url: String,
        /// Output format: mp3 or m4a.
        #[arg(long, default_value = "mp3")]
        format: OutputFormat,
        /// Priority: high, normal or low.
        #[arg(long, default_value = "normal")]
        priority: Priority,
        /// Idempotency key; resubmitting with the same key returns the same job.
        #[arg(long)]
        key: Option<String>,
    },

    /// List jobs in queue order.
    Status {
        /// Only jobs with this status.
        #[arg(long)]
        status: Option<JobStatus>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Show one job in detail.
    Show {
        /// Job identifier.
        id: JobId,
    },

    /// Change the priority of a pending job.
    Priority {
        /// Job identifier.
        id: JobId,
        /// New priority: high, normal or low.
        level: Priority,
    },

    /// Pause a downloading job.
    Pause {
        /// Job identifier.
        id: JobId,
    },

    /// Resume a paused job (it rejoins the back of its priority tier).
    Resume {
        /// Job identifier.
        id: JobId,
    },

    /// Requeue a failed job that has retries left (the retry count is kept).
    Retry {
        /// Job identifier.
        id: JobId,
    },

    /// Cancel a pending, paused or downloading job.
    Cancel {
        /// Job identifier.
        id: JobId,
    },

    /// Delete a job that is not downloading.
    Remove {
        /// Job identifier.
        id: JobId,
    },

    /// Delete every completed and failed job.
    Clear,

    /// Show job counts per status.
    Stats,

    /// Reconcile the local mirror and materialize finished jobs into the library.
    Sync {
        /// Run a single poll cycle instead of polling until the queue is idle.
        #[arg(long)]
        once: bool,
    },
}

/// Everything a command needs, opened once per invocation.
pub(crate) struct Env {
    pub cfg: DlqConfig,
    pub clock: Arc<dyn Clock>,
    pub store: JobStore,
    pub control: Arc<JobControl>,
    pub scratch: ScratchSpace,
    pub service: QueueService,
}

impl Env {
    async fn open() -> Result<Self> {
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = JobStore::open_default(Arc::clone(&clock))
            .await
            .context("open job store")?;
        let control = Arc::new(JobControl::new());
        let scratch = ScratchSpace::new(cfg.work_root()?);
        let service = QueueService::new(
            store.clone(),
            Arc::clone(&control),
            scratch.clone(),
            ServiceSettings::from_config(&cfg),
        );
        Ok(Self {
            cfg,
            clock,
            store,
            control,
            scratch,
            service,
        })
    }
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let env = Env::open().await?;

        match cli.command {
            CliCommand::Run { max_concurrent } => run_server(env, max_concurrent).await?,
            CliCommand::Add {
                url,
                format,
                priority,
                key,
            } => run_add(&env.service, url, format, priority, key).await?,
            CliCommand::Status {
                status,
                limit,
                offset,
            } => run_status(&env.service, status, limit, offset).await?,
            CliCommand::Show { id } => run_show(&env.service, id).await?,
            CliCommand::Priority { id, level } => run_priority(&env.service, id, level).await?,
            CliCommand::Pause { id } => run_pause(&env.service, id).await?,
            CliCommand::Resume { id } => run_resume(&env.service, id).await?,
            CliCommand::Retry { id } => run_retry(&env.service, id).await?,
            CliCommand::Cancel { id } => run_cancel(&env.service, id).await?,
            CliCommand::Remove { id } => run_remove(&env.service, id).await?,
            CliCommand::Clear => run_clear(&env.service).await?,
            CliCommand::Stats => run_stats(&env.service).await?,
            CliCommand::Sync { once } => run_sync(&env, once).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
