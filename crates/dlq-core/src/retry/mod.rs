//! Retry and backoff policy.
//!
//! Error classification (timeouts, throttling, connection failures, permanent
//! rejections) and exponential backoff decisions shared by the worker pool
//! and the bundled executor.

mod classify;
mod policy;

pub use classify::{classify_curl_error, classify_http_status};
pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
