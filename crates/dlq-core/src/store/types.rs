//! Types used by the job store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Job identifier (SQLite rowid).
pub type JobId = i64;

/// A string did not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseVariantError {
    pub kind: &'static str,
    pub value: String,
}

/// Job status, stored as a lowercase string in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Downloading,
        JobStatus::Paused,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Downloading => "downloading",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Completed, failed and cancelled jobs never change status again
    /// without an explicit external action.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ParseVariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| ParseVariantError {
                kind: "status",
                value: s.to_string(),
            })
    }
}

/// Scheduling priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    /// Sort rank: lower runs first.
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ParseVariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            _ => Err(ParseVariantError {
                kind: "priority",
                value: s.to_string(),
            }),
        }
    }
}

/// Target format of the produced artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Mp3,
    M4a,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Mp3 => "mp3",
            OutputFormat::M4a => "m4a",
        }
    }

    /// File extension for artifacts of this format.
    pub fn extension(self) -> &'static str {
        self.as_str()
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Mp3
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = ParseVariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mp3" => Ok(OutputFormat::Mp3),
            "m4a" => Ok(OutputFormat::M4a),
            _ => Err(ParseVariantError {
                kind: "format",
                value: s.to_string(),
            }),
        }
    }
}

/// Validated insert request. Built by the queue service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub source: String,
    pub output_format: OutputFormat,
    pub priority: Priority,
    pub idempotency_key: Option<String>,
    pub max_retries: u32,
}

/// Descriptive metadata about the produced media, filled in by the executor
/// when it knows it. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub duration_secs: Option<f64>,
    /// Thumbnail URL.
    pub thumbnail: Option<String>,
}

impl MediaMetadata {
    pub fn is_empty(&self) -> bool {
        *self == MediaMetadata::default()
    }
}

/// Full job record.
///
/// `position` is never stored: it is derived from a snapshot by
/// `scheduler::assign_positions` and is `None` for terminal jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueJob {
    pub id: JobId,
    pub idempotency_key: Option<String>,
    pub source: String,
    pub output_format: OutputFormat,
    pub priority: Priority,
    pub status: JobStatus,
    /// Fraction in [0.0, 1.0].
    pub progress: f64,
    pub position: Option<u32>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    /// Opaque handle to the produced artifact once completed.
    pub result_ref: Option<String>,
    /// Artifact size in bytes, recorded on completion when the result is a readable file.
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub metadata: MediaMetadata,
    /// Ordering key within a priority tier; bumped on resume.
    pub queued_at: i64,
    /// Earliest claim time while in retry backoff.
    pub retry_at: Option<i64>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub updated_at: i64,
}

impl QueueJob {
    /// True when `new` asks for the same work as this job. Priority is left
    /// out because it may have been changed since submission.
    pub fn same_request(&self, new: &NewJob) -> bool {
        self.source == new.source && self.output_format == new.output_format
    }
}

/// Job counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub pending: usize,
    pub downloading: usize,
    pub paused: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl JobStats {
    pub fn from_jobs<'a>(jobs: impl IntoIterator<Item = &'a QueueJob>) -> Self {
        let mut stats = JobStats::default();
        for job in jobs {
            *stats.slot(job.status) += 1;
        }
        stats
    }

    pub fn count(&self, status: JobStatus) -> usize {
        match status {
            JobStatus::Pending => self.pending,
            JobStatus::Downloading => self.downloading,
            JobStatus::Paused => self.paused,
            JobStatus::Completed => self.completed,
            JobStatus::Failed => self.failed,
            JobStatus::Cancelled => self.cancelled,
        }
    }

    /// Jobs that still need work or a user decision.
    pub fn non_terminal(&self) -> usize {
        self.pending + self.downloading + self.paused
    }

    fn slot(&mut self, status: JobStatus) -> &mut usize {
        match status {
            JobStatus::Pending => &mut self.pending,
            JobStatus::Downloading => &mut self.downloading,
            JobStatus::Paused => &mut self.paused,
            JobStatus::Completed => &mut self.completed,
            JobStatus::Failed => &mut self.failed,
            JobStatus::Cancelled => &mut self.cancelled,
        }
    }
}
