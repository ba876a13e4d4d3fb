//! Client-side mirror of the server's jobs (SQLite via sqlx).
//!
//! Each row is the last seen server copy of a job (as JSON) plus the
//! client-only `materialized` flag. Only the reconciler writes here.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashMap;
use std::path::Path;

use crate::store::{JobId, JobStatus, QueueJob};

use super::error::MirrorError;

/// Mirrored job plus the client-only flag.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorEntry {
    pub job: QueueJob,
    /// Set once the artifact is in the permanent library; never cleared.
    pub materialized: bool,
}

/// What one snapshot did to the mirror.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: Vec<JobId>,
    /// Jobs whose mirrored status just became `completed`.
    pub fresh_completions: Vec<JobId>,
}

#[derive(Clone)]
pub struct MirrorDb {
    pool: Pool<Sqlite>,
}

impl MirrorDb {
    /// Open (or create) `~/.local/state/dlq/mirror.db`.
    pub async fn open_default() -> Result<Self, MirrorError> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("dlq")?;
        let path = xdg_dirs.get_state_home().join("dlq").join("mirror.db");
        Self::open_at(path).await
    }

    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self, MirrorError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let uri = crate::store::path_to_sqlite_uri(path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&uri)
            .await?;
        Self::with_pool(pool).await
    }

    pub async fn open_in_memory() -> Result<Self, MirrorError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: Pool<Sqlite>) -> Result<Self, MirrorError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mirror_jobs (
                id INTEGER PRIMARY KEY,
                status TEXT NOT NULL,
                job_json TEXT NOT NULL,
                materialized INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    /// All entries, by id.
    pub async fn entries(&self) -> Result<Vec<MirrorEntry>, MirrorError> {
        let rows = sqlx::query("SELECT id, job_json, materialized FROM mirror_jobs ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode_row).collect()
    }

    pub async fn get(&self, id: JobId) -> Result<Option<MirrorEntry>, MirrorError> {
        let row = sqlx::query("SELECT id, job_json, materialized FROM mirror_jobs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_row).transpose()
    }

    /// Merge a full server snapshot: create or overwrite every job (keeping
    /// `materialized`), delete entries missing from the snapshot. One
    /// transaction.
    pub async fn apply_snapshot(&self, jobs: &[QueueJob]) -> Result<ApplyReport, MirrorError> {
        let mut report = ApplyReport::default();
        let mut tx = self.pool.begin().await?;

        let existing: Vec<(i64, String)> = sqlx::query_as("SELECT id, status FROM mirror_jobs")
            .fetch_all(&mut *tx)
            .await?;
        let mut previous: HashMap<JobId, String> = existing.into_iter().collect();

        for job in jobs {
            let json = serde_json::to_string(job).map_err(|source| MirrorError::Encode {
                id: job.id,
                source,
            })?;
            match previous.remove(&job.id) {
                None => {
                    sqlx::query(
                        "INSERT INTO mirror_jobs (id, status, job_json, materialized, updated_at) VALUES (?1, ?2, ?3, 0, ?4)",
                    )
                    .bind(job.id)
                    .bind(job.status.as_str())
                    .bind(&json)
                    .bind(job.updated_at)
                    .execute(&mut *tx)
                    .await?;
                    report.created += 1;
                    if job.status == JobStatus::Completed {
                        report.fresh_completions.push(job.id);
                    }
                }
                Some(old_status) => {
                    sqlx::query(
                        "UPDATE mirror_jobs SET status = ?1, job_json = ?2, updated_at = ?3 WHERE id = ?4",
                    )
                    .bind(job.status.as_str())
                    .bind(&json)
                    .bind(job.updated_at)
                    .bind(job.id)
                    .execute(&mut *tx)
                    .await?;
                    report.updated += 1;
                    if job.status == JobStatus::Completed && old_status != JobStatus::Completed.as_str() {
                        report.fresh_completions.push(job.id);
                    }
                }
            }
        }

        // Whatever was not matched above is absent from the snapshot.
        let mut gone: Vec<JobId> = previous.into_keys().collect();
        gone.sort_unstable();
        for id in &gone {
            sqlx::query("DELETE FROM mirror_jobs WHERE id = ?1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        report.deleted = gone;

        tx.commit().await?;
        Ok(report)
    }

    /// Completed entries not yet in the library.
    pub async fn unmaterialized_completed(&self) -> Result<Vec<MirrorEntry>, MirrorError> {
        let rows = sqlx::query(
            "SELECT id, job_json, materialized FROM mirror_jobs WHERE status = 'completed' AND materialized = 0 ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_row).collect()
    }

    /// Set the flag. Only a completed, not yet materialized entry changes;
    /// returns whether this call set it.
    pub async fn mark_materialized(&self, id: JobId) -> Result<bool, MirrorError> {
        let changed = sqlx::query(
            "UPDATE mirror_jobs SET materialized = 1 WHERE id = ?1 AND status = 'completed' AND materialized = 0",
        )
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(changed > 0)
    }
}

fn decode_row(row: &sqlx::sqlite::SqliteRow) -> Result<MirrorEntry, MirrorError> {
    let id: i64 = row.try_get("id")?;
    let json: String = row.try_get("job_json")?;
    let materialized: bool = row.try_get("materialized")?;
    let job = serde_json::from_str(&json).map_err(|source| MirrorError::Decode { id, source })?;
    Ok(MirrorEntry { job, materialized })
}
