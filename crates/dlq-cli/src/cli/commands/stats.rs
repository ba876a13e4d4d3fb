//! `dlq stats` – job counts per status.

use anyhow::Result;
use dlq_core::service::QueueService;

pub async fn run_stats(service: &QueueService) -> Result<()> {
    let s = service.stats().await?;
    println!("pending:     {}", s.pending);
    println!("downloading: {}", s.downloading);
    println!("paused:      {}", s.paused);
    println!("completed:   {}", s.completed);
    println!("failed:      {}", s.failed);
    println!("cancelled:   {}", s.cancelled);
    Ok(())
}
