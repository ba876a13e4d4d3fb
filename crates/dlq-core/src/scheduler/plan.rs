//! Startable-job selection under the concurrency limit.

use crate::store::{JobId, JobStatus, QueueJob};

use super::order::{is_eligible, schedule_order};

/// Result of one planning pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulePlan {
    /// Jobs currently downloading.
    pub active: usize,
    /// Pending jobs to claim, best first, at most the free slot count.
    pub startable: Vec<JobId>,
}

#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    max_concurrent: usize,
}

impl Scheduler {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Pick the jobs to start from a snapshot. Paused jobs neither count as
    /// active nor start.
    pub fn plan(&self, jobs: &[QueueJob], now: i64) -> SchedulePlan {
        let active = jobs
            .iter()
            .filter(|j| j.status == JobStatus::Downloading)
            .count();
        let free = self.max_concurrent.saturating_sub(active);
        if free == 0 {
            return SchedulePlan {
                active,
                startable: Vec::new(),
            };
        }

        let mut candidates: Vec<&QueueJob> = jobs.iter().filter(|j| is_eligible(j, now)).collect();
        candidates.sort_by(|a, b| schedule_order(a, b));
        SchedulePlan {
            active,
            startable: candidates.into_iter().take(free).map(|j| j.id).collect(),
        }
    }
}
