//! Worker pool tests with a scripted executor and a manual clock.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::clock::ManualClock;
use crate::executor::{ExecutionError, ExecutionOutput, ExecutionRequest, MediaMetadata, ProgressReporter};
use crate::retry::ErrorKind;
use crate::scheduler::assign_positions;
use crate::service::{QueueService, ServiceSettings};
use crate::store::{JobStatus, NewJob, OutputFormat, Priority, QueueJob};

const T0: i64 = 1_700_000_000_000;

#[derive(Debug, Clone, Copy)]
enum Step {
    Succeed,
    Fail(ErrorKind),
    ProgressThenFail(f64, ErrorKind),
    Block,
    Panic,
}

#[derive(Default)]
struct Scripted {
    steps: Mutex<HashMap<String, VecDeque<Step>>>,
}

impl Scripted {
    fn script(&self, source: &str, steps: impl IntoIterator<Item = Step>) {
        self.steps
            .lock()
            .unwrap()
            .entry(source.to_string())
            .or_default()
            .extend(steps);
    }

    fn next(&self, source: &str) -> Step {
        self.steps
            .lock()
            .unwrap()
            .get_mut(source)
            .and_then(|q| q.pop_front())
            .unwrap_or(Step::Succeed)
    }
}

#[async_trait]
impl JobExecutor for Scripted {
    async fn execute(
        &self,
        request: ExecutionRequest,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<ExecutionOutput, ExecutionError> {
        tokio::fs::create_dir_all(&request.work_dir).await.unwrap();
        match self.next(&request.source) {
            Step::Succeed => {
                let path = request
                    .work_dir
                    .join(format!("output.{}", request.output_format.extension()));
                tokio::fs::write(&path, request.source.as_bytes()).await.unwrap();
                progress.report(1.0);
                Ok(ExecutionOutput {
                    result_ref: path.display().to_string(),
                    metadata: MediaMetadata {
                        title: Some("scripted".to_string()),
                        ..MediaMetadata::default()
                    },
                })
            }
            Step::Fail(kind) => Err(ExecutionError::failed(kind, "scripted failure")),
            Step::ProgressThenFail(p, kind) => {
                progress.report(p);
                tokio::task::yield_now().await;
                Err(ExecutionError::failed(kind, "scripted failure"))
            }
            Step::Block => {
                progress.report(0.5);
                cancel.cancelled().await;
                Err(ExecutionError::Cancelled)
            }
            Step::Panic => panic!("scripted panic"),
        }
    }
}

struct Harness {
    store: JobStore,
    clock: Arc<ManualClock>,
    control: Arc<JobControl>,
    executor: Arc<Scripted>,
    scratch: ScratchSpace,
    pool: WorkerPool,
    _dir: tempfile::TempDir,
}

async fn harness(max_concurrent: usize, retry: RetryPolicy) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let store = JobStore::open_in_memory(clock.clone()).await.unwrap();
    let control = Arc::new(JobControl::new());
    let executor = Arc::new(Scripted::default());
    let scratch = ScratchSpace::new(dir.path().join("work"));
    let settings = PoolSettings {
        max_concurrent,
        tick_interval: Duration::from_millis(10),
        progress_interval: Duration::from_millis(0),
        retry,
    };
    let pool = WorkerPool::new(
        store.clone(),
        executor.clone(),
        control.clone(),
        scratch.clone(),
        clock.clone(),
        settings,
    );
    Harness {
        store,
        clock,
        control,
        executor,
        scratch,
        pool,
        _dir: dir,
    }
}

async fn add(store: &JobStore, source: &str, priority: Priority) -> QueueJob {
    add_with_retries(store, source, priority, 3).await
}

async fn add_with_retries(store: &JobStore, source: &str, priority: Priority, max_retries: u32) -> QueueJob {
    store
        .insert(&NewJob {
            source: source.to_string(),
            output_format: OutputFormat::Mp3,
            priority,
            idempotency_key: None,
            max_retries,
        })
        .await
        .unwrap()
}

/// Wait until `cond` holds; the executor runs in its own task.
async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached");
}

async fn job(store: &JobStore, id: JobId) -> QueueJob {
    store.get(id).await.unwrap().unwrap()
}

#[tokio::test]
async fn tick_fills_slots_in_priority_order() {
    let mut h = harness(3, RetryPolicy::default()).await;
    let mut ids = Vec::new();
    for (i, p) in [
        Priority::Normal,
        Priority::High,
        Priority::Normal,
        Priority::High,
        Priority::Normal,
    ]
    .into_iter()
    .enumerate()
    {
        let src = format!("https://example.com/{i}");
        h.executor.script(&src, [Step::Block]);
        ids.push(add(&h.store, &src, p).await.id);
    }

    let mut started = h.pool.tick().await.unwrap();
    started.sort();
    let mut expected = vec![ids[0], ids[1], ids[3]];
    expected.sort();
    assert_eq!(started, expected);
    assert_eq!(h.store.count_with_status(JobStatus::Downloading).await.unwrap(), 3);

    // A second pass with a full pool starts nothing.
    assert!(h.pool.tick().await.unwrap().is_empty());

    let mut snapshot = h.store.snapshot().await.unwrap();
    assign_positions(&mut snapshot);
    let pending: Vec<_> = snapshot
        .iter()
        .filter(|j| j.status == JobStatus::Pending)
        .map(|j| (j.id, j.position))
        .collect();
    assert_eq!(pending, vec![(ids[2], Some(4)), (ids[4], Some(5))]);

    h.control.stop_all(StopReason::Cancel);
    let outcomes = h.pool.drain().await;
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|(_, o)| *o == JobOutcome::Cancelled));
}

#[tokio::test]
async fn successful_job_completes() {
    let mut h = harness(3, RetryPolicy::default()).await;
    let a = add(&h.store, "https://example.com/a", Priority::Normal).await;

    h.pool.tick().await.unwrap();
    let outcomes = h.pool.drain().await;
    assert!(matches!(outcomes[0].1, JobOutcome::Completed(_)));

    let a = job(&h.store, a.id).await;
    assert_eq!(a.status, JobStatus::Completed);
    assert_eq!(a.progress, 1.0);
    assert_eq!(a.completed_at, Some(T0));
    assert_eq!(a.file_size, Some(b"https://example.com/a".len() as u64));
    assert_eq!(a.metadata.title.as_deref(), Some("scripted"));
    let path = a.result_ref.unwrap();
    assert_eq!(std::fs::read(path).unwrap(), b"https://example.com/a");
    assert!(!h.control.is_registered(a.id));
}

#[tokio::test]
async fn failure_after_progress_returns_to_pending_with_backoff() {
    let mut h = harness(3, RetryPolicy::default()).await;
    let src = "https://example.com/flaky";
    h.executor
        .script(src, [Step::ProgressThenFail(0.3, ErrorKind::Timeout)]);
    let a = add(&h.store, src, Priority::Normal).await;

    h.pool.tick().await.unwrap();
    assert_eq!(h.pool.drain().await[0].1, JobOutcome::Retrying(Duration::from_secs(2)));

    let failed = job(&h.store, a.id).await;
    assert_eq!(failed.status, JobStatus::Pending);
    assert_eq!(failed.retry_count, 1);
    assert_eq!(failed.progress, 0.0);
    assert_eq!(failed.retry_at, Some(T0 + 2_000));
    assert_eq!(failed.error_code.as_deref(), Some("TIMEOUT"));
    assert!(!h.scratch.dir_for(a.id).exists());

    // Not eligible until the backoff elapses.
    assert!(h.pool.tick().await.unwrap().is_empty());
    h.clock.advance(Duration::from_secs(2));
    assert_eq!(h.pool.tick().await.unwrap(), vec![a.id]);
    h.pool.drain().await;
    assert_eq!(job(&h.store, a.id).await.status, JobStatus::Completed);
}

#[tokio::test]
async fn permanent_error_fails_without_retry() {
    let mut h = harness(3, RetryPolicy::default()).await;
    let src = "https://example.com/gone";
    h.executor.script(src, [Step::Fail(ErrorKind::Rejected)]);
    let a = add(&h.store, src, Priority::Normal).await;

    h.pool.tick().await.unwrap();
    h.pool.drain().await;
    let a = job(&h.store, a.id).await;
    assert_eq!(a.status, JobStatus::Failed);
    assert_eq!(a.retry_count, 1);
    assert_eq!(a.error_code.as_deref(), Some("REJECTED"));
    assert_eq!(a.error_message.as_deref(), Some("scripted failure"));
    assert!(a.position.is_none());
}

#[tokio::test]
async fn retries_stop_at_max_retries() {
    let retry = RetryPolicy {
        base_delay: Duration::ZERO,
        ..RetryPolicy::default()
    };
    let mut h = harness(3, retry).await;
    let src = "https://example.com/broken";
    h.executor
        .script(src, [Step::Fail(ErrorKind::Connection); 5]);
    let a = add(&h.store, src, Priority::Normal).await;

    for _ in 0..5 {
        h.pool.tick().await.unwrap();
        h.pool.drain().await;
    }
    let a = job(&h.store, a.id).await;
    assert_eq!(a.status, JobStatus::Failed);
    assert_eq!(a.retry_count, 3);
}

#[tokio::test]
async fn zero_max_retries_fails_without_exceeding_the_bound() {
    let mut h = harness(3, RetryPolicy::default()).await;
    let src = "https://example.com/once";
    h.executor.script(src, [Step::Fail(ErrorKind::Engine)]);
    let a = add_with_retries(&h.store, src, Priority::Normal, 0).await;

    h.pool.tick().await.unwrap();
    assert!(matches!(h.pool.drain().await[0].1, JobOutcome::Failed(_)));
    let a = job(&h.store, a.id).await;
    assert_eq!(a.status, JobStatus::Failed);
    assert_eq!(a.max_retries, 0);
    assert_eq!(a.retry_count, 0);
    assert!(a.retry_at.is_none());
}

#[tokio::test]
async fn service_cancel_stops_live_worker() {
    let mut h = harness(3, RetryPolicy::default()).await;
    let service = QueueService::new(
        h.store.clone(),
        h.control.clone(),
        h.scratch.clone(),
        ServiceSettings {
            cancel_timeout: Duration::from_secs(5),
            ..ServiceSettings::default()
        },
    );
    let src = "https://example.com/long";
    h.executor.script(src, [Step::Block]);
    let a = add(&h.store, src, Priority::Normal).await;

    assert_eq!(h.pool.tick().await.unwrap(), vec![a.id]);
    let dir = h.scratch.dir_for(a.id);
    wait_until(|| dir.exists()).await;

    let cancelled = tokio::time::timeout(Duration::from_secs(5), service.cancel(a.id))
        .await
        .expect("cancel waited for the worker")
        .unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());
    assert!(!dir.exists());
    assert!(!h.control.is_registered(a.id));

    // The worker wrote the final state itself; nothing was forced.
    let outcomes = h.pool.drain().await;
    assert_eq!(outcomes, vec![(a.id, JobOutcome::Cancelled)]);
    assert_eq!(job(&h.store, a.id).await.status, JobStatus::Cancelled);
    assert!(h.pool.tick().await.unwrap().is_empty());
}

#[tokio::test]
async fn pause_request_releases_scratch_and_pauses() {
    let mut h = harness(3, RetryPolicy::default()).await;
    let src = "https://example.com/long";
    h.executor.script(src, [Step::Block]);
    let a = add(&h.store, src, Priority::Normal).await;

    h.pool.tick().await.unwrap();
    tokio::task::yield_now().await;
    let waiter = h.control.request_stop(a.id, StopReason::Pause).unwrap();
    h.pool.drain().await;
    assert!(waiter.wait(Duration::from_millis(10)).await);

    let a = job(&h.store, a.id).await;
    assert_eq!(a.status, JobStatus::Paused);
    assert!(!h.scratch.dir_for(a.id).exists());
    // Paused jobs are not picked up again.
    assert!(h.pool.tick().await.unwrap().is_empty());
}

#[tokio::test]
async fn executor_panic_is_a_retryable_failure() {
    let mut h = harness(3, RetryPolicy::default()).await;
    let src = "https://example.com/panic";
    h.executor.script(src, [Step::Panic]);
    let a = add(&h.store, src, Priority::Normal).await;

    h.pool.tick().await.unwrap();
    h.pool.drain().await;
    let a = job(&h.store, a.id).await;
    assert_eq!(a.status, JobStatus::Pending);
    assert_eq!(a.retry_count, 1);
    assert_eq!(a.error_code.as_deref(), Some("ENGINE_ERROR"));
}

#[tokio::test]
async fn shutdown_leaves_job_for_recovery() {
    let mut h = harness(3, RetryPolicy::default()).await;
    let src = "https://example.com/long";
    h.executor.script(src, [Step::Block]);
    let a = add(&h.store, src, Priority::Normal).await;

    let shutdown = CancellationToken::new();
    shutdown.cancel();
    h.pool.run(shutdown).await;
    assert_eq!(h.pool.active_tasks(), 0);
    assert_eq!(job(&h.store, a.id).await.status, JobStatus::Downloading);

    std::fs::create_dir_all(h.scratch.dir_for(a.id)).unwrap();
    assert_eq!(h.pool.recover().await.unwrap(), vec![a.id]);
    let a = job(&h.store, a.id).await;
    assert_eq!(a.status, JobStatus::Pending);
    assert_eq!(a.progress, 0.0);
    assert!(!h.scratch.dir_for(a.id).exists());
}
