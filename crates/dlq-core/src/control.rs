//! Job control for pause/cancel: per-job cancellation tokens plus stop reasons.
//!
//! The worker registers each job it claims and hands the ticket's token to
//! the executor. The queue service (directly, or via the control socket of a
//! running `dlq run`) requests a stop; the worker observes the reason when the
//! executor returns and writes `paused` or `cancelled` after cleaning up.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::store::JobId;

/// Why a running job was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StopReason {
    /// Process shutdown: no state is written, restart recovery picks the job up.
    Shutdown,
    /// User pause: job ends in `paused`.
    Pause,
    /// User cancel: job ends in `cancelled`. Wins over every other reason.
    Cancel,
}

struct Entry {
    generation: u64,
    token: CancellationToken,
    reason: Arc<Mutex<Option<StopReason>>>,
    done: CancellationToken,
}

impl Entry {
    fn stop(&self, reason: StopReason) {
        let mut slot = self.reason.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(slot.map_or(reason, |prev| prev.max(reason)));
        drop(slot);
        self.token.cancel();
    }
}

/// Shared registry of running job id -> cancellation token and stop reason.
#[derive(Default)]
pub struct JobControl {
    jobs: Mutex<HashMap<JobId, Entry>>,
    next_generation: AtomicU64,
}

impl JobControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job about to run. Dropping the ticket unregisters it and
    /// wakes anyone waiting for the job to stop.
    pub fn register(self: &Arc<Self>, job_id: JobId) -> JobTicket {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let reason = Arc::new(Mutex::new(None));
        let done = CancellationToken::new();
        let entry = Entry {
            generation,
            token: token.clone(),
            reason: Arc::clone(&reason),
            done: done.clone(),
        };
        if let Some(stale) = self.lock().insert(job_id, entry) {
            stale.done.cancel();
        }
        JobTicket {
            control: Arc::clone(self),
            job_id,
            generation,
            token,
            reason,
            done,
        }
    }

    pub fn is_registered(&self, job_id: JobId) -> bool {
        self.lock().contains_key(&job_id)
    }

    /// Ask a running job to stop. Returns a waiter that resolves once the
    /// worker has written the final state, or `None` if the job is not running.
    pub fn request_stop(&self, job_id: JobId, reason: StopReason) -> Option<StopWaiter> {
        let jobs = self.lock();
        let entry = jobs.get(&job_id)?;
        entry.stop(reason);
        tracing::debug!(job_id, ?reason, "stop requested");
        Some(StopWaiter {
            done: entry.done.clone(),
        })
    }

    /// Stop every running job (process shutdown).
    pub fn stop_all(&self, reason: StopReason) -> usize {
        let jobs = self.lock();
        for entry in jobs.values() {
            entry.stop(reason);
        }
        jobs.len()
    }

    fn unregister(&self, job_id: JobId, generation: u64) {
        let mut jobs = self.lock();
        if jobs.get(&job_id).is_some_and(|e| e.generation == generation) {
            jobs.remove(&job_id);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, Entry>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registration of one running job. Unregisters on drop.
pub struct JobTicket {
    control: Arc<JobControl>,
    job_id: JobId,
    generation: u64,
    token: CancellationToken,
    reason: Arc<Mutex<Option<StopReason>>>,
    done: CancellationToken,
}

impl JobTicket {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Token passed to the executor; cancelled on any stop request.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        *self.reason.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for JobTicket {
    fn drop(&mut self) {
        self.control.unregister(self.job_id, self.generation);
        self.done.cancel();
    }
}

/// Resolves when the stopped job has released its ticket.
#[derive(Debug, Clone)]
pub struct StopWaiter {
    done: CancellationToken,
}

impl StopWaiter {
    /// Wait up to `timeout`. Returns false on timeout.
    pub async fn wait(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.done.cancelled())
            .await
            .is_ok()
    }
}

/// Default path for the control socket (same XDG state dir as the DB).
pub fn default_control_socket_path() -> std::io::Result<PathBuf> {
    let dir = xdg::BaseDirectories::with_prefix("dlq")?.get_state_home();
    Ok(dir.join("dlq").join("control.sock"))
}
