//! Progress persistence for one running job.
//!
//! Drains the executor's progress channel into the store, throttled: a value
//! is written when it crosses a whole percent or when `interval` has passed
//! since the last write. The last value is always flushed once the executor
//! drops its reporter.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::store::{JobId, JobStore};

fn whole_percent(fraction: f64) -> i64 {
    (fraction * 100.0).floor() as i64
}

async fn write(store: &JobStore, job_id: JobId, value: f64) {
    if let Err(e) = store.record_progress(job_id, value).await {
        tracing::warn!(job_id, "durable progress update failed: {}", e);
    }
}

pub(super) async fn persist_progress(
    store: JobStore,
    job_id: JobId,
    mut rx: watch::Receiver<f64>,
    interval: Duration,
) {
    let mut written = 0.0_f64;
    let mut last_write: Option<Instant> = None;

    while rx.changed().await.is_ok() {
        let value = *rx.borrow_and_update();
        let crossed = whole_percent(value) > whole_percent(written);
        let due = last_write.map_or(true, |at| at.elapsed() >= interval);
        if value > written && (crossed || due) {
            write(&store, job_id, value).await;
            written = value;
            last_write = Some(Instant::now());
        }
    }

    let last = *rx.borrow();
    if last > written {
        write(&store, job_id, last).await;
    }
}
