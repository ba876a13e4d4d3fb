//! `dlq remove <id>` – delete a job that is not downloading.

use anyhow::Result;
use dlq_core::service::QueueService;
use dlq_core::store::JobId;

pub async fn run_remove(service: &QueueService, id: JobId) -> Result<()> {
    let job = service.remove(id).await?;
    println!("Removed job {id} ({})", job.status);
    Ok(())
}
