//! Scheduling order and derived positions.

use std::cmp::Ordering;

use crate::store::{JobStatus, QueueJob};

/// Ascending `(priority rank, queued_at, id)`: high before normal before low,
/// FIFO within a tier.
pub fn schedule_order(a: &QueueJob, b: &QueueJob) -> Ordering {
    a.priority
        .rank()
        .cmp(&b.priority.rank())
        .then(a.queued_at.cmp(&b.queued_at))
        .then(a.id.cmp(&b.id))
}

/// Set `position` on every job of a snapshot: 1..N over the non-terminal jobs
/// in scheduling order, `None` for terminal jobs. Slice order is untouched.
pub fn assign_positions(jobs: &mut [QueueJob]) {
    let mut order: Vec<usize> = (0..jobs.len())
        .filter(|&i| !jobs[i].status.is_terminal())
        .collect();
    order.sort_by(|&a, &b| schedule_order(&jobs[a], &jobs[b]));

    for job in jobs.iter_mut() {
        job.position = None;
    }
    for (pos, idx) in order.into_iter().enumerate() {
        jobs[idx].position = Some(pos as u32 + 1);
    }
}

/// Pending and out of backoff at `now`.
pub fn is_eligible(job: &QueueJob, now: i64) -> bool {
    job.status == JobStatus::Pending && job.retry_at.map_or(true, |at| at <= now)
}
