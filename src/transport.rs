//! The collaborator traits the scheduler depends on.
//!
//! The scheduler does not manage connections, authentication or recipient
//! discovery itself; it only depends on a [`Transport`] through a narrow
//! "attempt delivery" operation and notifies a [`Directory`] of successful
//! sends.
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::job::Destination;

/// A single failed delivery attempt.
///
/// Transient by definition: the scheduler decides whether to retry.
#[derive(Debug, Error)]
#[error("delivery to {destination} failed: {message}")]
pub struct DeliveryError {
    /// The recipient the attempt was addressed to.
    pub destination: Destination,
    /// Platform or network specific detail for the logs.
    pub message: String,
}

/// The delivery client the scheduler hands messages to.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Attempts to deliver `payload` to `destination`.
    ///
    /// The transport must honor `pre_send_delay` by waiting that long
    /// immediately before transmitting (the delay is the scheduler's pacing
    /// decision), and must return promptly on failure: retries are the
    /// scheduler's responsibility, not the transport's.
    async fn attempt_delivery(
        &self,
        destination: Destination,
        payload: &str,
        pre_send_delay: Duration,
    ) -> Result<(), DeliveryError>;
}

/// The recipient directory the scheduler and campaign builder consult.
pub trait Directory: Send + Sync {
    /// The known display name for a destination, if any.
    fn display_name(&self, destination: Destination) -> Option<String>;

    /// Called after every successful delivery so per-recipient statistics
    /// can be maintained elsewhere.
    fn record_successful_send(&self, destination: Destination);
}
