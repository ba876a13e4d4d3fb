//! Job CRUD, claim and recovery, split into read and write halves.

/// `SELECT <all job columns> FROM jobs <tail>` as a static string.
macro_rules! job_select {
    ($tail:literal) => {
        concat!(
            "SELECT id, idempotency_key, source, output_format, priority, status, ",
            "progress, retry_count, max_retries, error_message, error_code, result_ref, ",
            "file_size, title, artist, duration_secs, thumbnail, ",
            "queued_at, retry_at, created_at, started_at, completed_at, updated_at ",
            "FROM jobs ",
            $tail
        )
    };
}

mod read;
mod row;
mod write;

pub use write::Insertion;
