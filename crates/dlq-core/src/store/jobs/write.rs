//! Job write operations: insert, update, claim, progress, recovery, delete.
//!
//! Every method takes the write gate and runs in one transaction.

use sqlx::SqliteConnection;
use std::time::Duration;

use crate::clock::add_millis;

use super::super::db::JobStore;
use super::super::error::StoreError;
use super::super::types::{JobId, NewJob, QueueJob};
use super::row::{fetch_job, rows_to_jobs};

/// Result of an idempotent insert.
#[derive(Debug, Clone, PartialEq)]
pub enum Insertion {
    /// A new pending job was inserted.
    Created(QueueJob),
    /// A live job already holds the idempotency key; nothing was inserted.
    Existing(QueueJob),
}

impl Insertion {
    pub fn job(&self) -> &QueueJob {
        match self {
            Insertion::Created(job) | Insertion::Existing(job) => job,
        }
    }

    pub fn into_job(self) -> QueueJob {
        match self {
            Insertion::Created(job) | Insertion::Existing(job) => job,
        }
    }
}

async fn insert_row(
    conn: &mut SqliteConnection,
    new: &NewJob,
    now: i64,
) -> Result<QueueJob, StoreError> {
    let id = sqlx::query(
        r#"
        INSERT INTO jobs (
            idempotency_key, source, output_format, priority, status,
            progress, retry_count, max_retries, queued_at, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, 'pending',
                  0.0, 0, ?5, ?6, ?6, ?6)
        "#,
    )
    .bind(new.idempotency_key.as_deref())
    .bind(&new.source)
    .bind(new.output_format.as_str())
    .bind(new.priority.as_str())
    .bind(i64::from(new.max_retries))
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    fetch_job(conn, id).await?.ok_or(StoreError::NotFound(id))
}

/// Write back every mutable column. Request fields other than priority never change.
async fn write_row(conn: &mut SqliteConnection, job: &QueueJob) -> Result<(), StoreError> {
    let file_size = job
        .file_size
        .map(i64::try_from)
        .transpose()
        .map_err(|e| StoreError::Corrupt {
            id: job.id,
            reason: format!("file_size: {e}"),
        })?;
    sqlx::query(
        r#"
        UPDATE jobs
        SET priority = ?1,
            status = ?2,
            progress = ?3,
            retry_count = ?4,
            error_message = ?5,
            error_code = ?6,
            result_ref = ?7,
            queued_at = ?8,
            retry_at = ?9,
            started_at = ?10,
            completed_at = ?11,
            updated_at = ?12,
            file_size = ?13,
            title = ?14,
            artist = ?15,
            duration_secs = ?16,
            thumbnail = ?17
        WHERE id = ?18
        "#,
    )
    .bind(job.priority.as_str())
    .bind(job.status.as_str())
    .bind(job.progress)
    .bind(i64::from(job.retry_count))
    .bind(job.error_message.as_deref())
    .bind(job.error_code.as_deref())
    .bind(job.result_ref.as_deref())
    .bind(job.queued_at)
    .bind(job.retry_at)
    .bind(job.started_at)
    .bind(job.completed_at)
    .bind(job.updated_at)
    .bind(file_size)
    .bind(job.metadata.title.as_deref())
    .bind(job.metadata.artist.as_deref())
    .bind(job.metadata.duration_secs)
    .bind(job.metadata.thumbnail.as_deref())
    .bind(job.id)
    .execute(conn)
    .await?;
    Ok(())
}

impl JobStore {
    /// Insert a new pending job.
    pub async fn insert(&self, new: &NewJob) -> Result<QueueJob, StoreError> {
        let _gate = self.write_gate.lock().await;
        let now = self.now();
        let mut tx = self.pool.begin().await?;
        let job = insert_row(&mut tx, new, now).await?;
        tx.commit().await?;
        Ok(job)
    }

    /// Insert unless a job created within `key_ttl` already holds the same
    /// idempotency key. An expired key is released from its old job first.
    pub async fn insert_idempotent(
        &self,
        new: &NewJob,
        key_ttl: Duration,
    ) -> Result<Insertion, StoreError> {
        let Some(key) = new.idempotency_key.as_deref() else {
            return self.insert(new).await.map(Insertion::Created);
        };

        let _gate = self.write_gate.lock().await;
        let now = self.now();
        let mut tx = self.pool.begin().await?;

        let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM jobs WHERE idempotency_key = ?1")
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?;
        if let Some(existing_id) = existing {
            let job = fetch_job(&mut tx, existing_id)
                .await?
                .ok_or(StoreError::NotFound(existing_id))?;
            if add_millis(job.created_at, key_ttl) > now {
                tx.commit().await?;
                return Ok(Insertion::Existing(job));
            }
            sqlx::query("UPDATE jobs SET idempotency_key = NULL, updated_at = ?1 WHERE id = ?2")
                .bind(now)
                .bind(existing_id)
                .execute(&mut *tx)
                .await?;
            tracing::debug!(job_id = existing_id, "released expired idempotency key");
        }

        let job = insert_row(&mut tx, new, now).await?;
        tx.commit().await?;
        Ok(Insertion::Created(job))
    }

    /// Atomic read-modify-write. The mutator sees the current row; if it
    /// returns an error nothing is written.
    pub async fn try_update<F, E>(&self, id: JobId, mutate: F) -> Result<QueueJob, E>
    where
        F: FnOnce(&mut QueueJob) -> Result<(), E>,
        E: From<StoreError>,
    {
        let _gate = self.write_gate.lock().await;
        let now = self.now();
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;
        let mut job = fetch_job(&mut tx, id)
            .await?
            .ok_or(StoreError::NotFound(id))?;

        mutate(&mut job)?;
        job.id = id;
        job.updated_at = now;

        write_row(&mut tx, &job).await?;
        tx.commit().await.map_err(StoreError::from)?;
        Ok(job)
    }

    /// Atomic read-modify-write with an infallible mutator.
    pub async fn update<F>(&self, id: JobId, mutate: F) -> Result<QueueJob, StoreError>
    where
        F: FnOnce(&mut QueueJob),
    {
        self.try_update(id, |job| {
            mutate(job);
            Ok::<(), StoreError>(())
        })
        .await
    }

    /// Atomically move a pending job to downloading.
    ///
    /// Succeeds only if the job is still pending, its backoff has elapsed, and
    /// fewer than `max_concurrent` jobs are downloading. This is the only
    /// place a job enters `downloading`, so the concurrency bound and
    /// single-claim guarantee both hold here. Returns `None` when not claimed.
    pub async fn claim(&self, id: JobId, max_concurrent: usize) -> Result<Option<QueueJob>, StoreError> {
        let _gate = self.write_gate.lock().await;
        let now = self.now();
        let mut tx = self.pool.begin().await?;

        let active: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = 'downloading'")
            .fetch_one(&mut *tx)
            .await?;
        if active.max(0) as usize >= max_concurrent {
            tx.commit().await?;
            return Ok(None);
        }

        let claimed = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'downloading',
                progress = 0.0,
                started_at = ?1,
                retry_at = NULL,
                error_message = NULL,
                error_code = NULL,
                updated_at = ?1
            WHERE id = ?2
              AND status = 'pending'
              AND (retry_at IS NULL OR retry_at <= ?1)
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if claimed == 0 {
            tx.commit().await?;
            return Ok(None);
        }
        let job = fetch_job(&mut tx, id).await?;
        tx.commit().await?;
        Ok(job)
    }

    /// Store a progress fraction for a downloading job. Values that would
    /// move progress backwards are ignored. Returns true if a row changed.
    pub async fn record_progress(&self, id: JobId, fraction: f64) -> Result<bool, StoreError> {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            return Ok(false);
        };
        let _gate = self.write_gate.lock().await;
        let now = self.now();
        let changed = sqlx::query(
            r#"
            UPDATE jobs
            SET progress = ?1,
                updated_at = ?2
            WHERE id = ?3
              AND status = 'downloading'
              AND progress < ?1
            "#,
        )
        .bind(fraction)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(changed > 0)
    }

    /// Reset every `downloading` job to `pending` with zero progress (e.g.
    /// after a crash). Call before scheduling so interrupted jobs are picked
    /// up again. Returns the ids that were reset.
    pub async fn recover_interrupted(&self) -> Result<Vec<JobId>, StoreError> {
        let _gate = self.write_gate.lock().await;
        let now = self.now();
        let mut tx = self.pool.begin().await?;
        let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM jobs WHERE status = 'downloading' ORDER BY id")
            .fetch_all(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                progress = 0.0,
                started_at = NULL,
                updated_at = ?1
            WHERE status = 'downloading'
            "#,
        )
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(ids)
    }

    /// Permanently remove a job row. File cleanup is handled by higher layers.
    pub async fn delete(&self, id: JobId) -> Result<(), StoreError> {
        let _gate = self.write_gate.lock().await;
        let removed = sqlx::query("DELETE FROM jobs WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if removed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    /// Delete a job after `check` accepts its current row, atomically.
    /// Returns the deleted row.
    pub async fn delete_checked<F, E>(&self, id: JobId, check: F) -> Result<QueueJob, E>
    where
        F: FnOnce(&QueueJob) -> Result<(), E>,
        E: From<StoreError>,
    {
        let _gate = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;
        let job = fetch_job(&mut tx, id)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        check(&job)?;
        sqlx::query("DELETE FROM jobs WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from)?;
        tx.commit().await.map_err(StoreError::from)?;
        Ok(job)
    }

    /// Delete every completed or failed job; returns the deleted rows.
    pub async fn delete_finished(&self) -> Result<Vec<QueueJob>, StoreError> {
        let _gate = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(job_select!(
            "WHERE status IN ('completed', 'failed') ORDER BY id ASC"
        ))
        .fetch_all(&mut *tx)
        .await?;
        let jobs = rows_to_jobs(&rows)?;
        sqlx::query("DELETE FROM jobs WHERE status IN ('completed', 'failed')")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(jobs)
    }
}
