//! SQLite-backed job store implementation.
//!
//! Handles connection, migrations and the write gate. Job CRUD lives in `jobs`.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::sync::Arc;

use crate::clock::Clock;

use super::error::StoreError;

/// Percent-encode a path for use in a sqlite:// URI so spaces and special chars don't break parsing.
pub(crate) fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}", out)
}

/// Handle to the SQLite-backed job store. Cheap to clone.
///
/// The database file is stored under the XDG state directory:
/// `~/.local/state/dlq/queue.db` on Debian.
#[derive(Clone)]
pub struct JobStore {
    pub(crate) pool: Pool<Sqlite>,
    /// Serializes every write transaction in this process, so a
    /// read-modify-write never interleaves with another writer.
    pub(crate) write_gate: Arc<tokio::sync::Mutex<()>>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl JobStore {
    /// Open (or create) the default job database and run migrations.
    pub async fn open_default(clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("dlq")?;
        let db_path = xdg_dirs.get_state_home().join("dlq").join("queue.db");
        Self::open_at(db_path, clock).await
    }

    /// Open (or create) the database at a specific path. Creates parent dirs if needed.
    pub async fn open_at(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let uri = path_to_sqlite_uri(path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&uri)
            .await?;
        Self::with_pool(pool, clock).await
    }

    /// In-memory store (tests, simulations). Single connection so every
    /// query sees the same database.
    pub async fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool, clock).await
    }

    async fn with_pool(pool: Pool<Sqlite>, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let store = JobStore {
            pool,
            write_gate: Arc::new(tokio::sync::Mutex::new(())),
            clock,
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        // - `queued_at` orders jobs within a priority tier (bumped on resume).
        // - `retry_at` holds back a pending job during retry backoff.
        // - `position` is derived on read and never stored.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                idempotency_key TEXT UNIQUE,
                source TEXT NOT NULL,
                output_format TEXT NOT NULL,
                priority TEXT NOT NULL,
                status TEXT NOT NULL,
                progress REAL NOT NULL DEFAULT 0,
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL,
                error_message TEXT,
                error_code TEXT,
                result_ref TEXT,
                file_size INTEGER,
                title TEXT,
                artist TEXT,
                duration_secs REAL,
                thumbnail TEXT,
                queued_at INTEGER NOT NULL,
                retry_at INTEGER,
                created_at INTEGER NOT NULL,
                started_at INTEGER,
                completed_at INTEGER,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS jobs_status ON jobs (status);")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Current time from the injected clock (Unix millis).
    pub(crate) fn now(&self) -> i64 {
        self.clock.now_millis()
    }
}
