//! One poll cycle: fetch, merge into the mirror, materialize completions.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use crate::service::QueueApi;
use crate::store::JobId;

use super::error::ReconcileError;
use super::library::Library;
use super::mirror::{ApplyReport, MirrorDb};

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub applied: ApplyReport,
    /// Non-terminal jobs in the fetched snapshot.
    pub active: usize,
    pub materialized: Vec<JobId>,
    /// Materializations that failed this cycle; retried next poll.
    pub failed: Vec<JobId>,
    /// Skipped because another cycle is already materializing them.
    pub in_flight: Vec<JobId>,
}

/// Marks a job as being materialized; removes the mark on drop.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<JobId>>>,
    id: JobId,
}

impl InFlightGuard {
    fn acquire(set: &Arc<Mutex<HashSet<JobId>>>, id: JobId) -> Option<Self> {
        let inserted = set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
        inserted.then(|| InFlightGuard {
            set: Arc::clone(set),
            id,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Keeps the mirror in line with the server and materializes each completed
/// job into the library exactly once.
#[derive(Clone)]
pub struct Reconciler {
    api: Arc<dyn QueueApi>,
    mirror: MirrorDb,
    library: Arc<dyn Library>,
    in_flight: Arc<Mutex<HashSet<JobId>>>,
}

impl Reconciler {
    pub fn new(api: Arc<dyn QueueApi>, mirror: MirrorDb, library: Arc<dyn Library>) -> Self {
        Self {
            api,
            mirror,
            library,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn mirror(&self) -> &MirrorDb {
        &self.mirror
    }

    /// Run one cycle. A failed fetch leaves the mirror untouched. Completed
    /// entries still lacking the flag (including ones left over from a
    /// previous run) are materialized after the snapshot is applied.
    pub async fn reconcile_once(&self) -> Result<ReconcileReport, ReconcileError> {
        let jobs = self.api.fetch_all().await.map_err(ReconcileError::Poll)?;
        let active = jobs.iter().filter(|j| !j.status.is_terminal()).count();
        let applied = self.mirror.apply_snapshot(&jobs).await?;
        if !applied.deleted.is_empty() {
            tracing::debug!(deleted = ?applied.deleted, "mirror entries removed");
        }

        let mut report = ReconcileReport {
            applied,
            active,
            ..ReconcileReport::default()
        };

        for entry in self.mirror.unmaterialized_completed().await? {
            let id = entry.job.id;
            let Some(_guard) = InFlightGuard::acquire(&self.in_flight, id) else {
                report.in_flight.push(id);
                continue;
            };
            // Another cycle may have finished it since the listing.
            match self.mirror.get(id).await? {
                Some(current) if !current.materialized => {}
                _ => {
                    tracing::debug!(job_id = id, "already materialized, skipping");
                    continue;
                }
            }
            match self.library.persist(&entry.job).await {
                Ok(path) => {
                    if self.mirror.mark_materialized(id).await? {
                        tracing::info!(job_id = id, path = %path.display(), "job materialized");
                        report.materialized.push(id);
                    }
                }
                Err(e) => {
                    tracing::warn!(job_id = id, "materialization failed, will retry: {}", e);
                    report.failed.push(id);
                }
            }
        }
        Ok(report)
    }
}
