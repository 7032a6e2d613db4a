//! Convenience re-exports for the common case.
pub use crate::campaign::{CampaignBuilder, CampaignId, MessageSource};
pub use crate::job::{Destination, Job};
pub use crate::limiter::{LimitDecision, LimiterConfig, RateLimiter};
pub use crate::queue::JobQueue;
pub use crate::retry::RetryPolicy;
pub use crate::scheduler::{
    RunState, Scheduler, SchedulerConfig, SchedulerError, SchedulerStats, StartOptions, Status,
};
pub use crate::transport::{DeliveryError, Directory, Transport};
