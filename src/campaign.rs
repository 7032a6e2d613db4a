//! Expansion of high-level broadcast requests into individual jobs.
//!
//! A [`CampaignBuilder`] turns a campaign request (a set of destinations, a
//! message or a personalization rule, a per-destination repeat count and an
//! inter-message delay) into [`Job`]s pushed into the shared [`JobQueue`].
//! The builder does not track campaign-level completion; progress is derived
//! from queue and scheduler statistics.
use std::fmt::Display;
use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::job::{Destination, Job, CAMPAIGN_PRIORITY};
use crate::queue::JobQueue;
use crate::transport::Directory;

const CAMPAIGN_ID_LENGTH: usize = 8;

/// Used when the directory has no display name for a destination.
const FALLBACK_NAME: &str = "friend";

const GREETING_TEMPLATES: [&str; 5] = [
    "Hi {name}! How are you doing?",
    "Hey {name}, hope you're having a great day!",
    "Hello {name}! Just wanted to check in.",
    "{name}, good to see you around!",
    "Hey there {name}! How's everything going?",
];

const GREETING_EMOJI: [&str; 8] = ["😊", "👋", "🙂", "✨", "🔥", "👍", "🎉", "💬"];

/// A short opaque identifier for a campaign, for operator reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignId(String);

impl CampaignId {
    fn generate() -> Self {
        let id = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(CAMPAIGN_ID_LENGTH)
            .map(char::from)
            .collect();
        Self(id)
    }
}

impl Display for CampaignId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the payload for each job of a campaign is produced.
#[derive(Debug, Clone)]
pub enum MessageSource {
    /// The same fixed text for every destination.
    Text(String),
    /// A greeting built per destination from its display name, a randomly
    /// chosen template and a randomly chosen emoji.
    Personalized,
}

impl From<&str> for MessageSource {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for MessageSource {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Expands broadcast requests into queued jobs.
pub struct CampaignBuilder<D> {
    queue: Arc<JobQueue>,
    directory: Arc<D>,
}

impl<D> CampaignBuilder<D>
where
    D: Directory,
{
    pub fn new(queue: Arc<JobQueue>, directory: Arc<D>) -> Self {
        Self { queue, directory }
    }

    /// Expands a campaign into `destinations.len() * per_destination` jobs.
    ///
    /// When `delay_between` is given, the repeat with index `i` for each
    /// destination is scheduled at `now + delay_between * (i + 1)`; otherwise
    /// every job is ready immediately. All campaign jobs are queued at the
    /// campaign priority tier, ahead of ordinary enqueues.
    pub fn create_campaign(
        &self,
        destinations: &[Destination],
        message: MessageSource,
        per_destination: u32,
        delay_between: Option<TimeDelta>,
    ) -> CampaignId {
        let campaign_id = CampaignId::generate();
        let now = Utc::now();
        let mut queued = 0_u64;
        for &destination in destinations {
            for i in 0..per_destination {
                let payload = self.resolve_payload(&message, destination);
                let job = match delay_between {
                    Some(delay) => {
                        Job::scheduled(destination, payload, now + delay * (i as i32 + 1))
                    }
                    None => Job::immediate(destination, payload),
                };
                self.queue.push(job.with_priority(CAMPAIGN_PRIORITY));
                queued += 1;
            }
        }
        tracing::info!(
            %campaign_id,
            destinations = destinations.len(),
            jobs = queued,
            "Campaign queued"
        );
        campaign_id
    }

    /// Queues one message per destination at the default priority, staggered
    /// by `delay_between` with the first message ready immediately.
    pub fn broadcast(
        &self,
        destinations: &[Destination],
        message: MessageSource,
        delay_between: TimeDelta,
    ) {
        let now = Utc::now();
        for (i, &destination) in destinations.iter().enumerate() {
            let payload = self.resolve_payload(&message, destination);
            let job = if i == 0 {
                Job::immediate(destination, payload)
            } else {
                Job::scheduled(destination, payload, now + delay_between * i as i32)
            };
            self.queue.push(job);
        }
        tracing::info!(destinations = destinations.len(), "Broadcast queued");
    }

    fn resolve_payload(&self, message: &MessageSource, destination: Destination) -> String {
        match message {
            MessageSource::Text(text) => text.clone(),
            MessageSource::Personalized => {
                let name = self
                    .directory
                    .display_name(destination)
                    .unwrap_or_else(|| FALLBACK_NAME.to_owned());
                let mut rng = rand::thread_rng();
                let template = GREETING_TEMPLATES
                    .choose(&mut rng)
                    .unwrap_or(&GREETING_TEMPLATES[0]);
                let emoji = GREETING_EMOJI.choose(&mut rng).unwrap_or(&GREETING_EMOJI[0]);
                format!("{} {emoji}", template.replace("{name}", &name))
            }
        }
    }
}
