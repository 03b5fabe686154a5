//! The single-retry policy applied between extraction attempts.
//!
//! A run makes at most [`MAX_ATTEMPTS`] extraction calls. Parse and
//! validation failures retry immediately with a tightened prompt. Client
//! failures wait first: a fixed delay, or the provider's `Retry-After`
//! hint when honoured.

use std::time::Duration;

use crate::error::PipelineError;

/// Extraction calls per run, retry included.
pub const MAX_ATTEMPTS: u8 = 2;

/// Delay settings for the retry after a client failure.
///
/// ```
/// use schema_extract::retry::RetryPolicy;
/// use schema_extract::PipelineError;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default().with_max_retry_after(Duration::from_secs(5));
/// let throttled = PipelineError::HttpError {
///     status: 429,
///     body: String::new(),
///     retry_after: Some(Duration::from_secs(30)),
/// };
/// assert_eq!(policy.client_delay(&throttled), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait before retrying a failed provider call. Default: 1 second.
    pub client_retry_delay: Duration,

    /// Use the provider's `Retry-After` hint instead of the fixed delay.
    /// Default: `true`.
    pub respect_retry_after: bool,

    /// Upper bound on an honoured `Retry-After`. Default: 10 seconds.
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            client_retry_delay: Duration::from_secs(1),
            respect_retry_after: true,
            max_retry_after: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// No waiting at all; useful in tests.
    pub fn immediate() -> Self {
        Self {
            client_retry_delay: Duration::ZERO,
            respect_retry_after: false,
            max_retry_after: Duration::ZERO,
        }
    }

    pub fn with_client_retry_delay(mut self, delay: Duration) -> Self {
        self.client_retry_delay = delay;
        self
    }

    pub fn with_respect_retry_after(mut self, enabled: bool) -> Self {
        self.respect_retry_after = enabled;
        self
    }

    pub fn with_max_retry_after(mut self, cap: Duration) -> Self {
        self.max_retry_after = cap;
        self
    }

    /// How long to wait after `error` before the retry attempt.
    pub fn client_delay(&self, error: &PipelineError) -> Duration {
        match error.retry_after() {
            Some(hint) if self.respect_retry_after => hint.min(self.max_retry_after),
            _ => self.client_retry_delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttled(secs: u64) -> PipelineError {
        PipelineError::HttpError {
            status: 429,
            body: "rate limited".into(),
            retry_after: Some(Duration::from_secs(secs)),
        }
    }

    #[test]
    fn test_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.client_retry_delay, Duration::from_secs(1));
        assert!(policy.respect_retry_after);
        assert_eq!(policy.max_retry_after, Duration::from_secs(10));
    }

    #[test]
    fn test_fixed_delay_without_hint() {
        let policy = RetryPolicy::default().with_client_retry_delay(Duration::from_millis(250));
        let err = PipelineError::Timeout(Duration::from_secs(60));
        assert_eq!(policy.client_delay(&err), Duration::from_millis(250));
    }

    #[test]
    fn test_retry_after_honoured_and_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.client_delay(&throttled(3)), Duration::from_secs(3));
        assert_eq!(policy.client_delay(&throttled(120)), Duration::from_secs(10));
    }

    #[test]
    fn test_retry_after_ignored_when_disabled() {
        let policy = RetryPolicy::default().with_respect_retry_after(false);
        assert_eq!(policy.client_delay(&throttled(3)), Duration::from_secs(1));
    }

    #[test]
    fn test_immediate() {
        assert_eq!(RetryPolicy::immediate().client_delay(&throttled(3)), Duration::ZERO);
    }
}
