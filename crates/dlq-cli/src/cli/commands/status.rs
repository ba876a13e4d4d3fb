//! `dlq status` – list jobs in queue order.

use anyhow::Result;
use dlq_core::service::{ListQuery, QueueService};
use dlq_core::store::JobStatus;

pub fn format_progress(fraction: f64) -> String {
    format!("{:.0}%", fraction.clamp(0.0, 1.0) * 100.0)
}

pub async fn run_status(
    service: &QueueService,
    status: Option<JobStatus>,
    limit: Option<usize>,
    offset: usize,
) -> Result<()> {
    let page = service
        .list(&ListQuery {
            status,
            limit,
            offset,
        })
        .await?;
    if page.items.is_empty() {
        println!("No jobs.");
        return Ok(());
    }
    println!(
        "{:<6} {:<12} {:<7} {:<4} {:<5} {}",
        "ID", "STATUS", "PRIO", "POS", "PROG", "SOURCE"
    );
    for j in &page.items {
        let pos = j
            .position
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<6} {:<12} {:<7} {:<4} {:<5} {}",
            j.id,
            j.status.as_str(),
            j.priority.as_str(),
            pos,
            format_progress(j.progress),
            j.source
        );
    }
    println!("({} of {} shown)", page.items.len(), page.total);
    Ok(())
}
