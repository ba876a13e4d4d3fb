//! Shared fixtures for the integration tests.
#![allow(dead_code)]

pub mod media_server;
pub mod scripted;

use dlq_core::client::{DirLibrary, MirrorDb, Reconciler};
use dlq_core::clock::ManualClock;
use dlq_core::control::JobControl;
use dlq_core::retry::RetryPolicy;
use dlq_core::scratch::ScratchSpace;
use dlq_core::service::{QueueService, ServiceSettings};
use dlq_core::store::JobStore;
use dlq_core::worker::{PoolSettings, WorkerPool};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use scripted::Scripted;

pub const T0: i64 = 1_700_000_000_000;

/// Server side (store, service, pool) plus a client reconciler, all in one
/// temp directory and driven by a manual clock.
pub struct System {
    pub clock: Arc<ManualClock>,
    pub store: JobStore,
    pub control: Arc<JobControl>,
    pub scratch: ScratchSpace,
    pub service: QueueService,
    pub executor: Arc<Scripted>,
    pub pool: WorkerPool,
    pub dir: tempfile::TempDir,
}

pub fn pool_settings(max_concurrent: usize) -> PoolSettings {
    PoolSettings {
        max_concurrent,
        tick_interval: Duration::from_millis(10),
        progress_interval: Duration::ZERO,
        retry: RetryPolicy::default(),
    }
}

pub async fn system(max_concurrent: usize) -> System {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let store = JobStore::open_in_memory(clock.clone()).await.unwrap();
    system_with_store(dir, clock, store, max_concurrent)
}

pub fn system_with_store(
    dir: tempfile::TempDir,
    clock: Arc<ManualClock>,
    store: JobStore,
    max_concurrent: usize,
) -> System {
    let control = Arc::new(JobControl::new());
    let scratch = ScratchSpace::new(dir.path().join("work"));
    let settings = ServiceSettings {
        max_retries: 3,
        idempotency_ttl: Duration::from_secs(24 * 60 * 60),
        cancel_timeout: Duration::from_secs(5),
    };
    let service = QueueService::new(store.clone(), control.clone(), scratch.clone(), settings);
    let executor = Arc::new(Scripted::default());
    let pool = WorkerPool::new(
        store.clone(),
        executor.clone(),
        control.clone(),
        scratch.clone(),
        clock.clone(),
        pool_settings(max_concurrent),
    );
    System {
        clock,
        store,
        control,
        scratch,
        service,
        executor,
        pool,
        dir,
    }
}

impl System {
    pub fn library_root(&self) -> PathBuf {
        self.dir.path().join("library")
    }

    /// Reconciler over this system's service with a directory library.
    pub fn reconciler(&self, mirror: MirrorDb) -> Reconciler {
        Reconciler::new(
            Arc::new(self.service.clone()),
            mirror,
            Arc::new(DirLibrary::new(self.library_root())),
        )
    }

    /// Tick and drain until a tick starts nothing.
    pub async fn settle(&mut self) {
        loop {
            let started = self.pool.tick().await.unwrap();
            self.pool.drain().await;
            if started.is_empty() {
                break;
            }
        }
    }
}

pub fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(rd) => rd
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}
