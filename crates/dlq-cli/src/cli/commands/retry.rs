//! `dlq retry <id>` – requeue a failed job that still has retries left.

use anyhow::Result;
use dlq_core::service::QueueService;
use dlq_core::store::JobId;

pub async fn run_retry(service: &QueueService, id: JobId) -> Result<()> {
    let job = service.retry(id).await?;
    let attempts = format!("{}/{}", job.retry_count, job.max_retries);
    match job.position {
        Some(pos) => println!("Requeued job {id} (position {pos}, retries used {attempts})"),
        None => println!("Requeued job {id} (retries used {attempts})"),
    }
    Ok(())
}
