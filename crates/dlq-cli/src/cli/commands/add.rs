//! `dlq add <url>` – submit a job.

use anyhow::Result;
use dlq_core::service::{AddRequest, QueueService};
use dlq_core::store::{OutputFormat, Priority};

pub async fn run_add(
    service: &QueueService,
    url: String,
    format: OutputFormat,
    priority: Priority,
    key: Option<String>,
) -> Result<()> {
    let mut request = AddRequest::new(url).format(format).priority(priority);
    if let Some(key) = key {
        request = request.key(key);
    }
    let job = service.add(request).await?;
    match job.position {
        Some(pos) => println!("Added job {} ({}, position {})", job.id, job.status, pos),
        None => println!("Added job {} ({})", job.id, job.status),
    }
    Ok(())
}
