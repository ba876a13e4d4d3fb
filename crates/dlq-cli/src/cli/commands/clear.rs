//! `dlq clear` – delete completed and failed jobs.

use anyhow::Result;
use dlq_core::service::QueueService;

pub async fn run_clear(service: &QueueService) -> Result<()> {
    let n = service.clear_completed().await?;
    println!("Cleared {n} job(s)");
    Ok(())
}
