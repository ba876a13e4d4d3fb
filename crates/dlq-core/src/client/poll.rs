//! Poll driver: when to run the next reconcile cycle.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::error::ReconcileError;
use super::reconcile::{ReconcileReport, Reconciler};

/// `Idle → Active → Draining(n) → Idle`.
///
/// Polling runs while the server reports non-terminal jobs, then for `n`
/// more cycles to pick up late transitions, then stops until woken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Active,
    /// Extra cycles left before going idle.
    Draining(u32),
}

impl PollState {
    pub fn should_poll(self) -> bool {
        !matches!(self, PollState::Idle)
    }

    /// Next state after a successful poll.
    pub fn after_poll(self, has_active_jobs: bool, drain_cycles: u32) -> Self {
        if has_active_jobs {
            return PollState::Active;
        }
        match self {
            PollState::Idle => PollState::Idle,
            PollState::Active if drain_cycles == 0 => PollState::Idle,
            PollState::Active => PollState::Draining(drain_cycles),
            PollState::Draining(n) if n <= 1 => PollState::Idle,
            PollState::Draining(n) => PollState::Draining(n - 1),
        }
    }

    /// A job was submitted: start polling again.
    pub fn wake(self) -> Self {
        PollState::Active
    }
}

/// Handle that wakes an idle poller, e.g. right after submitting a job.
#[derive(Debug, Clone)]
pub struct PollWaker(Arc<Notify>);

impl PollWaker {
    pub fn wake(&self) {
        self.0.notify_one();
    }
}

pub struct Poller {
    reconciler: Reconciler,
    interval: Duration,
    drain_cycles: u32,
    state: PollState,
    waker: Arc<Notify>,
}

impl Poller {
    /// Starts `Active` so the first cycle runs immediately and backfills any
    /// completion left unmaterialized by a previous run.
    pub fn new(reconciler: Reconciler, interval: Duration, drain_cycles: u32) -> Self {
        Self {
            reconciler,
            interval,
            drain_cycles,
            state: PollState::Active,
            waker: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn waker(&self) -> PollWaker {
        PollWaker(Arc::clone(&self.waker))
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Run one cycle and advance the state. A failed poll keeps the state.
    pub async fn poll_once(&mut self) -> Result<ReconcileReport, ReconcileError> {
        let report = self.reconciler.reconcile_once().await?;
        self.state = self.state.after_poll(report.active > 0, self.drain_cycles);
        Ok(report)
    }

    async fn cycle(&mut self) {
        match self.poll_once().await {
            Ok(report) => tracing::debug!(
                active = report.active,
                materialized = report.materialized.len(),
                state = ?self.state,
                "poll cycle done"
            ),
            Err(e) => tracing::warn!("poll cycle failed: {}", e),
        }
    }

    /// Poll until the state goes idle or `shutdown` fires.
    pub async fn run_until_idle(&mut self, shutdown: CancellationToken) {
        while self.state.should_poll() {
            self.cycle().await;
            if !self.state.should_poll() {
                break;
            }
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        tracing::info!("poller idle");
    }

    /// Poll forever; while idle, wait for a wake. Stops when `shutdown` fires.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        loop {
            if self.state.should_poll() {
                self.cycle().await;
            }
            let polling = self.state.should_poll();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.waker.notified() => {
                    self.state = self.state.wake();
                }
                _ = tokio::time::sleep(self.interval), if polling => {}
            }
        }
    }
}
