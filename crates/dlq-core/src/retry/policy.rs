use std::time::Duration;

/// Classification of an execution failure for retry purposes.
///
/// Executors map curl errors, HTTP statuses or engine failures into these
/// kinds; only `Rejected` is permanent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operation timed out (connect/read).
    Timeout,
    /// Source asked us to slow down (e.g. 429, 503).
    Throttled,
    /// Network-level failure (connection reset, DNS, etc.).
    Connection,
    /// Retryable server error (5xx).
    Http5xx(u16),
    /// Extraction or conversion failed; may succeed on a later attempt.
    Engine,
    /// Permanent failure: the source was refused (4xx, unsupported input).
    Rejected,
}

impl ErrorKind {
    /// Stable code stored in `error_code` on the job.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Throttled => "THROTTLED",
            ErrorKind::Connection => "CONNECTION_ERROR",
            ErrorKind::Http5xx(_) => "SERVER_ERROR",
            ErrorKind::Engine => "ENGINE_ERROR",
            ErrorKind::Rejected => "REJECTED",
        }
    }

    pub fn is_permanent(self) -> bool {
        matches!(self, ErrorKind::Rejected)
    }
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Mark the job failed.
    NoRetry,
    /// Return the job to pending, claimable after the given delay.
    RetryAfter(Duration),
}

/// Exponential backoff policy with a cap, built from `[retry]` in config.toml.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failed attempts allowed before the job is marked failed.
    pub max_retries: u32,
    /// Base delay for backoff.
    pub base_delay: Duration,
    /// Upper bound on backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Decide what happens after a failure.
    ///
    /// `retry_count` is the job's count *after* counting this failure (1 = first
    /// failure) and `max_retries` is the bound copied onto the job at insertion.
    pub fn decide(&self, retry_count: u32, max_retries: u32, kind: ErrorKind) -> RetryDecision {
        if kind.is_permanent() || retry_count >= max_retries {
            return RetryDecision::NoRetry;
        }
        RetryDecision::RetryAfter(self.backoff(retry_count))
    }

    /// `base * 2^(retry_count-1)`, capped at `max_delay`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let exp = 1u32 << retry_count.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(exp).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delay(d: RetryDecision) -> Duration {
        match d {
            RetryDecision::RetryAfter(d) => d,
            RetryDecision::NoRetry => panic!("expected retry"),
        }
    }

    #[test]
    fn rejected_is_never_retried() {
        let p = RetryPolicy::default();
        assert_eq!(p.decide(1, 3, ErrorKind::Rejected), RetryDecision::NoRetry);
    }

    #[test]
    fn backoff_doubles_from_base() {
        let p = RetryPolicy::default();
        assert_eq!(delay(p.decide(1, 3, ErrorKind::Timeout)), Duration::from_secs(2));
        assert_eq!(delay(p.decide(2, 3, ErrorKind::Engine)), Duration::from_secs(4));
    }

    #[test]
    fn backoff_is_capped() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff(6), Duration::from_secs(60));
        assert_eq!(p.backoff(40), Duration::from_secs(60));
        assert_eq!(
            delay(p.decide(10, 20, ErrorKind::Throttled)),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn respects_job_max_retries() {
        let p = RetryPolicy::default();
        assert!(matches!(
            p.decide(2, 3, ErrorKind::Connection),
            RetryDecision::RetryAfter(_)
        ));
        assert_eq!(p.decide(3, 3, ErrorKind::Connection), RetryDecision::NoRetry);
        assert_eq!(p.decide(1, 0, ErrorKind::Http5xx(502)), RetryDecision::NoRetry);
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(ErrorKind::Http5xx(500).code(), "SERVER_ERROR");
        assert_eq!(ErrorKind::Rejected.code(), "REJECTED");
    }
}
