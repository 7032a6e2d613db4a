//! A paced message broadcast scheduler.
//!
//! `dripfeed` queues outbound messages and delivers them one at a time
//! through an injected [`Transport`](transport::Transport), pacing each send
//! with an adaptive delay and enforcing hourly and daily caps so a bulk
//! broadcast looks like organic traffic to the receiving platform.
//!
//! The moving parts:
//!
//! - [`JobQueue`](queue::JobQueue): immediate FIFO plus a time/priority
//!   ordered deferred queue, shared between producers and the scheduler.
//! - [`RateLimiter`](limiter::RateLimiter): caps, cadence-pattern delays,
//!   burst breaks and a persisted send history.
//! - [`RetryPolicy`](retry::RetryPolicy): linear backoff with an attempt cap.
//! - [`Scheduler`](scheduler::Scheduler): the run state machine and the
//!   single processing loop.
//! - [`CampaignBuilder`](campaign::CampaignBuilder): expands broadcast
//!   requests into individual jobs, optionally personalized per recipient.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use async_trait::async_trait;
//! use dripfeed::prelude::*;
//!
//! struct LoggingTransport;
//!
//! #[async_trait]
//! impl Transport for LoggingTransport {
//!     async fn attempt_delivery(
//!         &self,
//!         destination: Destination,
//!         payload: &str,
//!         pre_send_delay: Duration,
//!     ) -> Result<(), DeliveryError> {
//!         tokio::time::sleep(pre_send_delay).await;
//!         println!("-> {destination}: {payload}");
//!         Ok(())
//!     }
//! }
//!
//! struct NoDirectory;
//!
//! impl Directory for NoDirectory {
//!     fn display_name(&self, _destination: Destination) -> Option<String> {
//!         None
//!     }
//!     fn record_successful_send(&self, _destination: Destination) {}
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SchedulerError> {
//!     let queue = Arc::new(JobQueue::new());
//!     let directory = Arc::new(NoDirectory);
//!
//!     let campaigns = CampaignBuilder::new(Arc::clone(&queue), Arc::clone(&directory));
//!     let id = campaigns.create_campaign(
//!         &[1001.into(), 1002.into()],
//!         MessageSource::Personalized,
//!         1,
//!         None,
//!     );
//!     println!("queued campaign {id}");
//!
//!     let scheduler = Scheduler::new(
//!         queue,
//!         RateLimiter::new(LimiterConfig::default()),
//!         RetryPolicy::default(),
//!         Arc::new(LoggingTransport),
//!         directory,
//!     );
//!     scheduler.start(StartOptions::default())?;
//!     // ... the loop drains the queue; stop() shuts it down cooperatively.
//!     scheduler.stop().await
//! }
//! ```
pub mod campaign;
pub mod job;
pub mod limiter;
pub mod prelude;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod transport;

pub use campaign::{CampaignBuilder, CampaignId, MessageSource};
pub use job::{Destination, Job};
pub use limiter::{LimitDecision, LimiterConfig, RateLimiter};
pub use queue::JobQueue;
pub use retry::RetryPolicy;
pub use scheduler::{
    RunState, Scheduler, SchedulerConfig, SchedulerError, SchedulerStats, StartOptions, Status,
};
pub use transport::{DeliveryError, Directory, Transport};
