//! Row decoding shared by reads and writes.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::super::error::StoreError;
use super::super::types::{JobId, MediaMetadata, QueueJob};

pub(super) fn job_from_row(row: &SqliteRow) -> Result<QueueJob, StoreError> {
    let id: i64 = row.try_get("id")?;
    let corrupt = |reason: String| StoreError::Corrupt { id, reason };

    let output_format: String = row.try_get("output_format")?;
    let priority: String = row.try_get("priority")?;
    let status: String = row.try_get("status")?;
    let retry_count: i64 = row.try_get("retry_count")?;
    let max_retries: i64 = row.try_get("max_retries")?;
    let file_size: Option<i64> = row.try_get("file_size")?;

    Ok(QueueJob {
        id,
        idempotency_key: row.try_get("idempotency_key")?,
        source: row.try_get("source")?,
        output_format: output_format.parse().map_err(|e| corrupt(format!("{e}")))?,
        priority: priority.parse().map_err(|e| corrupt(format!("{e}")))?,
        status: status.parse().map_err(|e| corrupt(format!("{e}")))?,
        progress: row.try_get("progress")?,
        position: None,
        retry_count: u32::try_from(retry_count).map_err(|e| corrupt(format!("retry_count: {e}")))?,
        max_retries: u32::try_from(max_retries).map_err(|e| corrupt(format!("max_retries: {e}")))?,
        error_message: row.try_get("error_message")?,
        error_code: row.try_get("error_code")?,
        result_ref: row.try_get("result_ref")?,
        file_size: file_size
            .map(u64::try_from)
            .transpose()
            .map_err(|e| corrupt(format!("file_size: {e}")))?,
        metadata: MediaMetadata {
            title: row.try_get("title")?,
            artist: row.try_get("artist")?,
            duration_secs: row.try_get("duration_secs")?,
            thumbnail: row.try_get("thumbnail")?,
        },
        queued_at: row.try_get("queued_at")?,
        retry_at: row.try_get("retry_at")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(super) async fn fetch_job(
    conn: &mut SqliteConnection,
    id: JobId,
) -> Result<Option<QueueJob>, StoreError> {
    let row = sqlx::query(job_select!("WHERE id = ?1"))
        .bind(id)
        .fetch_optional(conn)
        .await?;
    row.as_ref().map(job_from_row).transpose()
}

pub(super) fn rows_to_jobs(rows: &[SqliteRow]) -> Result<Vec<QueueJob>, StoreError> {
    rows.iter().map(job_from_row).collect()
}
