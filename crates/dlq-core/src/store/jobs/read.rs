//! Job read operations: get, list, snapshot, idempotency lookup.

use super::super::db::JobStore;
use super::super::error::StoreError;
use super::super::types::{JobId, JobStatus, QueueJob};
use super::row::{fetch_job, job_from_row, rows_to_jobs};

impl JobStore {
    /// Fetch a single job.
    pub async fn get(&self, id: JobId) -> Result<Option<QueueJob>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        fetch_job(&mut conn, id).await
    }

    /// List jobs, optionally filtered by status, oldest first.
    pub async fn list(&self, status: Option<JobStatus>) -> Result<Vec<QueueJob>, StoreError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(job_select!("WHERE status = ?1 ORDER BY id ASC"))
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query(job_select!("ORDER BY id ASC"))
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows_to_jobs(&rows)
    }

    /// Every job, read by a single statement so the result is one consistent
    /// snapshot: no job can appear in two different states.
    pub async fn snapshot(&self) -> Result<Vec<QueueJob>, StoreError> {
        self.list(None).await
    }

    /// Job holding the given idempotency key, if any.
    pub async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<QueueJob>, StoreError> {
        let row = sqlx::query(job_select!("WHERE idempotency_key = ?1"))
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    /// Number of jobs in the given status.
    pub async fn count_with_status(&self, status: JobStatus) -> Result<usize, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = ?1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(n.max(0) as usize)
    }
}
