//! Tests for the job store (in-memory DB, manual clock).

use std::sync::Arc;
use std::time::Duration;

use crate::clock::ManualClock;
use crate::store::{
    Insertion, JobStatus, JobStore, MediaMetadata, NewJob, OutputFormat, Priority, StoreError,
};

const T0: i64 = 1_700_000_000_000;

async fn store() -> (JobStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(T0));
    let store = JobStore::open_in_memory(clock.clone()).await.unwrap();
    (store, clock)
}

fn new_job(source: &str, priority: Priority) -> NewJob {
    NewJob {
        source: source.to_string(),
        output_format: OutputFormat::Mp3,
        priority,
        idempotency_key: None,
        max_retries: 3,
    }
}

#[tokio::test]
async fn insert_creates_pending_job() {
    let (db, _clock) = store().await;
    let job = db.insert(&new_job("https://a.example/one", Priority::High)).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.progress, 0.0);
    assert_eq!(job.retry_count, 0);
    assert_eq!(job.max_retries, 3);
    assert_eq!(job.priority, Priority::High);
    assert_eq!(job.created_at, T0);
    assert_eq!(job.queued_at, T0);
    assert!(job.started_at.is_none());
    assert!(job.file_size.is_none());
    assert!(job.metadata.is_empty());

    let fetched = db.get(job.id).await.unwrap().unwrap();
    assert_eq!(fetched, job);
}

#[tokio::test]
async fn get_missing_returns_none() {
    let (db, _clock) = store().await;
    assert!(db.get(42).await.unwrap().is_none());
}

#[tokio::test]
async fn list_filters_by_status() {
    let (db, _clock) = store().await;
    let a = db.insert(&new_job("https://a.example/1", Priority::Normal)).await.unwrap();
    let b = db.insert(&new_job("https://a.example/2", Priority::Normal)).await.unwrap();
    db.update(b.id, |j| j.status = JobStatus::Paused).await.unwrap();

    let all = db.list(None).await.unwrap();
    assert_eq!(all.iter().map(|j| j.id).collect::<Vec<_>>(), vec![a.id, b.id]);
    let paused = db.list(Some(JobStatus::Paused)).await.unwrap();
    assert_eq!(paused.len(), 1);
    assert_eq!(paused[0].id, b.id);
    assert_eq!(db.count_with_status(JobStatus::Pending).await.unwrap(), 1);
}

#[tokio::test]
async fn idempotent_insert_returns_live_job() {
    let (db, clock) = store().await;
    let mut req = new_job("https://a.example/song", Priority::Normal);
    req.idempotency_key = Some("key-1".into());

    let first = db.insert_idempotent(&req, Duration::from_secs(60)).await.unwrap();
    assert!(matches!(first, Insertion::Created(_)));

    clock.advance(Duration::from_secs(30));
    let second = db.insert_idempotent(&req, Duration::from_secs(60)).await.unwrap();
    match second {
        Insertion::Existing(job) => assert_eq!(job.id, first.job().id),
        other => panic!("expected existing job, got {other:?}"),
    }
    assert_eq!(db.list(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn expired_idempotency_key_is_released() {
    let (db, clock) = store().await;
    let mut req = new_job("https://a.example/song", Priority::Normal);
    req.idempotency_key = Some("key-1".into());

    let first = db.insert_idempotent(&req, Duration::from_secs(60)).await.unwrap().into_job();
    clock.advance(Duration::from_secs(61));
    let second = db.insert_idempotent(&req, Duration::from_secs(60)).await.unwrap();
    let second = match second {
        Insertion::Created(job) => job,
        other => panic!("expected a new job, got {other:?}"),
    };
    assert_ne!(second.id, first.id);

    let old = db.get(first.id).await.unwrap().unwrap();
    assert!(old.idempotency_key.is_none());
    let holder = db.find_by_idempotency_key("key-1").await.unwrap().unwrap();
    assert_eq!(holder.id, second.id);
}

#[tokio::test]
async fn claim_respects_concurrency_limit() {
    let (db, _clock) = store().await;
    let a = db.insert(&new_job("https://a.example/1", Priority::Normal)).await.unwrap();
    let b = db.insert(&new_job("https://a.example/2", Priority::Normal)).await.unwrap();

    let claimed = db.claim(a.id, 1).await.unwrap().unwrap();
    assert_eq!(claimed.status, JobStatus::Downloading);
    assert_eq!(claimed.started_at, Some(T0));

    assert!(db.claim(b.id, 1).await.unwrap().is_none());
    assert_eq!(db.get(b.id).await.unwrap().unwrap().status, JobStatus::Pending);
}

#[tokio::test]
async fn claim_is_single_shot() {
    let (db, _clock) = store().await;
    let a = db.insert(&new_job("https://a.example/1", Priority::Normal)).await.unwrap();
    assert!(db.claim(a.id, 3).await.unwrap().is_some());
    assert!(db.claim(a.id, 3).await.unwrap().is_none());
}

#[tokio::test]
async fn claim_waits_for_backoff() {
    let (db, clock) = store().await;
    let a = db.insert(&new_job("https://a.example/1", Priority::Normal)).await.unwrap();
    db.update(a.id, |j| {
        j.retry_count = 1;
        j.retry_at = Some(T0 + 2_000);
        j.error_code = Some("TIMEOUT".into());
    })
    .await
    .unwrap();

    assert!(db.claim(a.id, 3).await.unwrap().is_none());
    clock.advance(Duration::from_secs(2));
    let claimed = db.claim(a.id, 3).await.unwrap().unwrap();
    assert!(claimed.retry_at.is_none());
    assert!(claimed.error_code.is_none());
    assert_eq!(claimed.retry_count, 1);
}

#[tokio::test]
async fn concurrent_claims_never_exceed_limit() {
    let (db, _clock) = store().await;
    let mut ids = Vec::new();
    for i in 0..6 {
        let job = db
            .insert(&new_job(&format!("https://a.example/{i}"), Priority::Normal))
            .await
            .unwrap();
        ids.push(job.id);
    }

    let mut set = tokio::task::JoinSet::new();
    for id in ids {
        let db = db.clone();
        set.spawn(async move { db.claim(id, 2).await.unwrap().is_some() });
    }
    let mut claimed = 0;
    while let Some(res) = set.join_next().await {
        if res.unwrap() {
            claimed += 1;
        }
    }
    assert_eq!(claimed, 2);
    assert_eq!(db.count_with_status(JobStatus::Downloading).await.unwrap(), 2);
}

#[tokio::test]
async fn progress_is_monotonic_and_only_while_downloading() {
    let (db, _clock) = store().await;
    let a = db.insert(&new_job("https://a.example/1", Priority::Normal)).await.unwrap();
    assert!(!db.record_progress(a.id, 0.5).await.unwrap());

    db.claim(a.id, 3).await.unwrap().unwrap();
    assert!(db.record_progress(a.id, 0.3).await.unwrap());
    assert!(!db.record_progress(a.id, 0.2).await.unwrap());
    assert!(!db.record_progress(a.id, f64::NAN).await.unwrap());
    assert!(db.record_progress(a.id, 1.7).await.unwrap());
    assert_eq!(db.get(a.id).await.unwrap().unwrap().progress, 1.0);
}

#[tokio::test]
async fn recover_interrupted_resets_downloading_jobs() {
    let (db, _clock) = store().await;
    let a = db.insert(&new_job("https://a.example/1", Priority::Normal)).await.unwrap();
    let b = db.insert(&new_job("https://a.example/2", Priority::Normal)).await.unwrap();
    db.claim(a.id, 3).await.unwrap().unwrap();
    db.record_progress(a.id, 0.4).await.unwrap();

    let reset = db.recover_interrupted().await.unwrap();
    assert_eq!(reset, vec![a.id]);
    let a = db.get(a.id).await.unwrap().unwrap();
    assert_eq!(a.status, JobStatus::Pending);
    assert_eq!(a.progress, 0.0);
    assert_eq!(a.retry_count, 0);
    assert!(a.started_at.is_none());
    assert_eq!(db.get(b.id).await.unwrap().unwrap().status, JobStatus::Pending);
}

#[tokio::test]
async fn try_update_error_leaves_row_untouched() {
    let (db, _clock) = store().await;
    let a = db.insert(&new_job("https://a.example/1", Priority::Normal)).await.unwrap();
    let res: Result<_, StoreError> = db
        .try_update(a.id, |j| {
            j.priority = Priority::Low;
            Err(StoreError::NotFound(j.id))
        })
        .await;
    assert!(res.is_err());
    assert_eq!(db.get(a.id).await.unwrap().unwrap().priority, Priority::Normal);
}

#[tokio::test]
async fn artifact_size_and_metadata_are_stored() {
    let (db, _clock) = store().await;
    let a = db.insert(&new_job("https://a.example/1", Priority::Normal)).await.unwrap();
    let metadata = MediaMetadata {
        title: Some("Song".to_string()),
        artist: Some("Band".to_string()),
        duration_secs: Some(201.5),
        thumbnail: Some("https://a.example/1.jpg".to_string()),
    };
    let meta = metadata.clone();
    db.update(a.id, move |j| {
        j.status = JobStatus::Completed;
        j.file_size = Some(3_000_000_000);
        j.metadata = meta;
    })
    .await
    .unwrap();

    let a = db.get(a.id).await.unwrap().unwrap();
    assert_eq!(a.file_size, Some(3_000_000_000));
    assert_eq!(a.metadata, metadata);
}

#[tokio::test]
async fn update_missing_job_is_not_found() {
    let (db, _clock) = store().await;
    let err = db.update(7, |j| j.status = JobStatus::Paused).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(7)));
}

#[tokio::test]
async fn delete_and_delete_finished() {
    let (db, _clock) = store().await;
    let a = db.insert(&new_job("https://a.example/1", Priority::Normal)).await.unwrap();
    let b = db.insert(&new_job("https://a.example/2", Priority::Normal)).await.unwrap();
    let c = db.insert(&new_job("https://a.example/3", Priority::Normal)).await.unwrap();
    let d = db.insert(&new_job("https://a.example/4", Priority::Normal)).await.unwrap();
    db.update(b.id, |j| j.status = JobStatus::Completed).await.unwrap();
    db.update(c.id, |j| j.status = JobStatus::Failed).await.unwrap();
    db.update(d.id, |j| j.status = JobStatus::Cancelled).await.unwrap();

    let removed = db.delete_finished().await.unwrap();
    assert_eq!(removed.iter().map(|j| j.id).collect::<Vec<_>>(), vec![b.id, c.id]);

    db.delete(a.id).await.unwrap();
    assert!(matches!(db.delete(a.id).await, Err(StoreError::NotFound(_))));
    let left = db.list(None).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, d.id);
}

#[tokio::test]
async fn delete_checked_respects_check() {
    let (db, _clock) = store().await;
    let a = db.insert(&new_job("https://a.example/1", Priority::Normal)).await.unwrap();
    db.claim(a.id, 3).await.unwrap().unwrap();

    let refused: Result<_, StoreError> = db
        .delete_checked(a.id, |j| {
            if j.status == JobStatus::Downloading {
                Err(StoreError::Corrupt {
                    id: j.id,
                    reason: "busy".into(),
                })
            } else {
                Ok(())
            }
        })
        .await;
    assert!(refused.is_err());
    assert!(db.get(a.id).await.unwrap().is_some());

    let removed: QueueJobResult = db.delete_checked(a.id, |_| Ok(())).await;
    assert_eq!(removed.unwrap().id, a.id);
    assert!(db.get(a.id).await.unwrap().is_none());
}

type QueueJobResult = Result<crate::store::QueueJob, StoreError>;

#[tokio::test]
async fn file_backed_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested dir").join("queue.db");
    let clock = Arc::new(ManualClock::new(T0));
    let id = {
        let db = JobStore::open_at(&path, clock.clone()).await.unwrap();
        let job = db.insert(&new_job("https://a.example/1", Priority::Low)).await.unwrap();
        db.claim(job.id, 3).await.unwrap().unwrap();
        job.id
    };
    let db = JobStore::open_at(&path, clock).await.unwrap();
    let job = db.get(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Downloading);
    assert_eq!(job.priority, Priority::Low);
}
