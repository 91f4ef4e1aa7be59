use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(350);
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// How the proxy retries the upstream model call.
///
/// Attempts are numbered from 1. After a failed attempt `n` the proxy sleeps
/// `n * base_delay` before attempt `n + 1`, so delays grow linearly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BACKOFF,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    /// Rate limited (429) or overloaded (503).
    pub fn is_retryable_status(&self, status: u16) -> bool {
        matches!(status, 429 | 503)
    }

    /// Sleep after failed attempt `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Whether another attempt may follow attempt `attempt`.
    pub fn has_attempts_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts.max(1)
    }

    /// All sleeps a fully failing call goes through, in order.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.max_attempts.max(1)).map(|a| self.backoff(a)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_429_and_503_are_retried() {
        let policy = RetryPolicy::default();
        assert!(policy.is_retryable_status(429));
        assert!(policy.is_retryable_status(503));
        for status in [400, 401, 403, 404, 500, 502, 504] {
            assert!(!policy.is_retryable_status(status), "{status}");
        }
    }

    #[test]
    fn backoff_grows_linearly_and_strictly() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.schedule(),
            vec![Duration::from_millis(350), Duration::from_millis(700)]
        );

        let long = RetryPolicy {
            max_attempts: 6,
            ..RetryPolicy::default()
        };
        let schedule = long.schedule();
        assert_eq!(schedule.len(), 5);
        assert!(schedule.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn attempt_budget_is_respected() {
        let policy = RetryPolicy::default();
        assert!(policy.has_attempts_after(1));
        assert!(policy.has_attempts_after(2));
        assert!(!policy.has_attempts_after(3));

        let zero = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert!(!zero.has_attempts_after(1));
        assert!(zero.schedule().is_empty());
    }
}
