//! `dlq resume <id>` – put a paused job back in the queue.

use anyhow::Result;
use dlq_core::service::QueueService;
use dlq_core::store::JobId;

pub async fn run_resume(service: &QueueService, id: JobId) -> Result<()> {
    let job = service.resume(id).await?;
    match job.position {
        Some(pos) => println!("Resumed job {id} (position {pos})"),
        None => println!("Resumed job {id}"),
    }
    Ok(())
}
