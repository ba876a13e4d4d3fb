//! Request and response shapes of the queue service, plus validation.

use serde::{Deserialize, Serialize};

use crate::store::{JobStats, JobStatus, NewJob, OutputFormat, Priority, QueueJob};

use super::error::QueueError;

/// Longest accepted idempotency key.
pub const MAX_KEY_LEN: usize = 128;
/// Page size when the caller gives none.
pub const DEFAULT_LIMIT: usize = 100;
/// Upper bound on a page.
pub const MAX_LIMIT: usize = 500;

/// Submit request for a new job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddRequest {
    pub source: String,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl AddRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            output_format: OutputFormat::default(),
            priority: Priority::default(),
            idempotency_key: None,
        }
    }

    pub fn format(mut self, output_format: OutputFormat) -> Self {
        self.output_format = output_format;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Check the request and turn it into a store insert.
    pub(crate) fn validate(&self, max_retries: u32) -> Result<NewJob, QueueError> {
        let source = self.source.trim();
        let url = url::Url::parse(source)
            .map_err(|e| QueueError::Validation(format!("source '{source}' is not a URL: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(QueueError::Validation(format!(
                "unsupported source scheme '{}' (expected http or https)",
                url.scheme()
            )));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(QueueError::Validation(format!("source '{source}' has no host")));
        }

        let idempotency_key = match self.idempotency_key.as_deref().map(str::trim) {
            None => None,
            Some("") => {
                return Err(QueueError::Validation(
                    "idempotency key must not be empty".to_string(),
                ))
            }
            Some(k) if k.len() > MAX_KEY_LEN => {
                return Err(QueueError::Validation(format!(
                    "idempotency key longer than {MAX_KEY_LEN} bytes"
                )))
            }
            Some(k) => Some(k.to_string()),
        };

        Ok(NewJob {
            source: url.to_string(),
            output_format: self.output_format,
            priority: self.priority,
            idempotency_key,
            max_retries,
        })
    }
}

/// Filter and paging for `list`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub status: Option<JobStatus>,
    /// Defaults to 100, capped at 500.
    pub limit: Option<usize>,
    pub offset: usize,
}

impl ListQuery {
    pub(crate) fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
    }
}

/// One page of jobs plus whole-queue counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPage {
    /// Jobs matching the filter, before paging.
    pub total: usize,
    pub items: Vec<QueueJob>,
    /// Counts over the whole queue, ignoring the filter.
    pub stats: JobStats,
}
