//! The retry policy for failed delivery attempts.
//!
//! A job that fails delivery is requeued with a backoff that grows linearly
//! with the attempt number, up to a maximum number of attempts after which
//! the job is dropped as a terminal failure.
use chrono::TimeDelta;

const DEFAULT_BACKOFF_SECONDS: i64 = 60;
const DEFAULT_MAX_ATTEMPTS: u16 = 3;

/// Maps an attempt count to a backoff duration and bounds the total number of
/// delivery attempts.
///
/// # Example
///
/// ```
/// # use dripfeed::retry::RetryPolicy;
/// # use chrono::TimeDelta;
/// let policy = RetryPolicy::default();
///
/// assert_eq!(policy.backoff(1), TimeDelta::seconds(60));
/// assert_eq!(policy.backoff(2), TimeDelta::seconds(120));
/// assert!(!policy.is_exhausted(2));
/// assert!(policy.is_exhausted(3));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    factor: TimeDelta,
    max_attempts: u16,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::linear(TimeDelta::seconds(DEFAULT_BACKOFF_SECONDS))
    }
}

impl RetryPolicy {
    /// Creates a policy whose backoff grows linearly: `factor * attempt`.
    pub fn linear(factor: TimeDelta) -> Self {
        Self {
            factor,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Sets the maximum number of delivery attempts before a job is dropped.
    pub fn with_max_attempts(self, max_attempts: u16) -> Self {
        Self {
            max_attempts,
            ..self
        }
    }

    /// The backoff to wait before retrying after the given failed attempt.
    pub fn backoff(&self, attempt: u16) -> TimeDelta {
        self.factor * attempt.into()
    }

    /// The maximum number of delivery attempts.
    pub fn max_attempts(&self) -> u16 {
        self.max_attempts
    }

    /// Whether a job that has failed `attempt` times should be dropped
    /// instead of retried.
    pub fn is_exhausted(&self, attempt: u16) -> bool {
        attempt >= self.max_attempts
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn backoff_grows_linearly() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), TimeDelta::seconds(60));
        assert_eq!(policy.backoff(2), TimeDelta::seconds(120));
        assert_eq!(policy.backoff(3), TimeDelta::seconds(180));
    }

    #[test]
    fn default_allows_three_attempts() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert!(!policy.is_exhausted(0));
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
        assert!(policy.is_exhausted(4));
    }

    #[test]
    fn max_attempts_can_be_overridden() {
        let policy = RetryPolicy::linear(TimeDelta::seconds(5)).with_max_attempts(1);
        assert_eq!(policy.backoff(1), TimeDelta::seconds(5));
        assert!(policy.is_exhausted(1));
    }
}
