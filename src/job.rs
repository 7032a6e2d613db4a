use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Priority assigned to jobs enqueued without an explicit priority.
///
/// Lower values are more urgent.
pub const DEFAULT_PRIORITY: u8 = 5;

/// Priority assigned to jobs expanded from a broadcast campaign.
pub(crate) const CAMPAIGN_PRIORITY: u8 = 3;

/// Priority given to a job deferred by the rate limiter so it is serviced
/// first once the limit window reopens.
pub(crate) const RATE_LIMITED_PRIORITY: u8 = 1;

/// Amount a job's priority value is lowered (made more urgent) when it is
/// requeued for a retry.
pub(crate) const RETRY_PRIORITY_BOOST: u8 = 2;

/// An opaque handle identifying the recipient of a message.
#[derive(Debug, Eq, PartialEq, Hash, Clone, Copy, Serialize, Deserialize)]
pub struct Destination(i64);

impl From<i64> for Destination {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Destination> for i64 {
    fn from(value: Destination) -> Self {
        value.0
    }
}

impl Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single message delivery unit.
///
/// A job is owned by exactly one queue at a time (or is in flight during a
/// delivery attempt). On a failed attempt the job is reinserted into the
/// deferred queue with an updated [`Job::scheduled_at`], [`Job::attempt`] and
/// a boosted priority; it is dropped after a successful delivery or once
/// retries are exhausted.
#[derive(Debug, Clone)]
pub struct Job {
    /// The recipient of the message.
    pub destination: Destination,
    /// The message content. Immutable once enqueued.
    pub payload: String,
    /// Lower value means higher urgency.
    pub priority: u8,
    /// When the job becomes due. [`None`] means ready immediately.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// When the job was created, used for stable FIFO ordering.
    pub inserted_at: DateTime<Utc>,
    /// Number of failed delivery attempts so far.
    pub attempt: u16,
}

impl Job {
    /// Creates a job that is ready for immediate delivery.
    pub fn immediate(destination: Destination, payload: impl Into<String>) -> Self {
        Self {
            destination,
            payload: payload.into(),
            priority: DEFAULT_PRIORITY,
            scheduled_at: None,
            inserted_at: Utc::now(),
            attempt: 0,
        }
    }

    /// Creates a job that becomes due at `scheduled_at`.
    pub fn scheduled(
        destination: Destination,
        payload: impl Into<String>,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            scheduled_at: Some(scheduled_at),
            ..Self::immediate(destination, payload)
        }
    }

    /// Sets the job's priority. Lower values are serviced first.
    pub fn with_priority(self, priority: u8) -> Self {
        Self { priority, ..self }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn immediate_job_has_no_scheduled_time() {
        let job = Job::immediate(42.into(), "hello");
        assert_eq!(job.scheduled_at, None);
        assert_eq!(job.attempt, 0);
        assert_eq!(job.priority, DEFAULT_PRIORITY);
    }

    #[test]
    fn scheduled_job_is_due_at_the_given_instant() {
        let at = Utc::now() + chrono::TimeDelta::seconds(30);
        let job = Job::scheduled(42.into(), "hello", at).with_priority(2);
        assert_eq!(job.scheduled_at, Some(at));
        assert_eq!(job.priority, 2);
    }

    #[test]
    fn destination_round_trips() {
        let destination = Destination::from(-100123);
        assert_eq!(i64::from(destination), -100123);
        assert_eq!(destination.to_string(), "-100123");
    }
}
