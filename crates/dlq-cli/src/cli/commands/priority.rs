//! `dlq priority <id> <level>` – reprioritize a pending job.

use anyhow::Result;
use dlq_core::service::QueueService;
use dlq_core::store::{JobId, Priority};

pub async fn run_priority(service: &QueueService, id: JobId, level: Priority) -> Result<()> {
    let job = service.update_priority(id, level).await?;
    match job.position {
        Some(pos) => println!("Job {id} is now {level} (position {pos})"),
        None => println!("Job {id} is now {level}"),
    }
    Ok(())
}
