//! Adaptive pacing and hard send caps.
//!
//! A hard cap alone is not enough to stay under a platform's abuse detection:
//! the traffic shape also has to look non-uniform while remaining bounded.
//! The limiter therefore layers several mechanisms:
//!
//! 1. hard hourly and daily caps, answered by [`RateLimiter::check_limits`],
//! 2. a rotating set of fixed cadence patterns with random jitter for the
//!    inter-message delay,
//! 3. widening of the delay as hourly usage approaches the cap,
//! 4. diurnal scaling (shorter delays at night), and
//! 5. periodic short and long breaks between bursts.
//!
//! Every successful send is recorded in a bounded history log which is
//! persisted on a cadence and on shutdown, see [`history`].
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local, TimeDelta, Timelike, Utc};
use rand::Rng;

pub mod history;

use crate::job::Destination;
use history::{SendHistory, SendRecord};

/// The fixed cadence patterns the limiter cycles through when usage is low.
/// Each value is a base delay in seconds; a ±0.5s jitter is applied on top.
const DELAY_PATTERNS: [[f64; 3]; 4] = [
    [3.5, 4.5, 3.2],
    [4.0, 3.0, 5.0],
    [2.5, 3.5, 4.5],
    [3.0, 4.0, 3.5],
];

/// How many characters of the payload are kept in each history record.
const PREVIEW_LENGTH: usize = 50;

/// The daily-cap check only runs once the history holds this many records.
const DAILY_CHECK_THRESHOLD: usize = 100;

/// The daily-cap check scans only this many of the most recent records.
///
/// This is a deliberate accuracy/performance tradeoff carried over from the
/// original design: if more than this many sends happen within 24 hours the
/// daily count undercounts. Widening the bound is a behavior change, not a
/// bug fix.
const DAILY_SCAN_WINDOW: usize = 200;

/// Characters per second of a plausible human typist (200 per minute).
const TYPING_SPEED: f64 = 200.0 / 60.0;

/// Configuration for [`RateLimiter`].
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Maximum sends within any rolling hour.
    pub hourly_limit: u32,
    /// Maximum sends within a day.
    pub daily_limit: u32,
    /// Lower clamp for the adaptive delay, in seconds.
    pub min_delay: f64,
    /// Upper clamp for the adaptive delay, in seconds.
    pub max_delay: f64,
    /// Where the send history is persisted. [`None`] keeps it in memory only.
    pub history_path: Option<PathBuf>,
    /// How many history records are retained and rewritten to disk.
    pub history_keep: usize,
    /// Persist the history every this many sends.
    pub persist_every: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            hourly_limit: 30,
            daily_limit: 200,
            min_delay: 2.0,
            max_delay: 10.0,
            history_path: None,
            history_keep: 1000,
            persist_every: 10,
        }
    }
}

/// The answer to "would sending now breach a cap?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitDecision {
    /// Sending now is within the caps.
    Allowed,
    /// Sending now would breach a cap; wait at least `retry_after`.
    Denied {
        reason: String,
        retry_after: TimeDelta,
    },
}

/// Tracks recent sends and computes adaptive inter-message delays.
pub struct RateLimiter {
    config: LimiterConfig,
    history: SendHistory,
    current_pattern: usize,
    position_in_pattern: usize,
}

impl RateLimiter {
    /// Creates a limiter, loading any previously persisted send history.
    pub fn new(config: LimiterConfig) -> Self {
        let history = SendHistory::load(config.history_path.clone(), config.history_keep);
        Self {
            config,
            history,
            current_pattern: 0,
            position_in_pattern: 0,
        }
    }

    /// Records a successful send and persists the history on its cadence.
    pub fn record_send(&mut self, destination: Destination, payload: &str) {
        let preview: String = payload.chars().take(PREVIEW_LENGTH).collect();
        self.history.append(SendRecord {
            sent_at: Utc::now(),
            destination,
            preview,
            hour: Local::now().hour(),
        });
        if self.history.total() % self.config.persist_every == 0 {
            self.flush();
        }
    }

    /// Persists the send history now.
    ///
    /// A persistence failure is logged and swallowed: the in-memory history
    /// remains authoritative for the current process.
    pub fn flush(&self) {
        if let Err(err) = self.history.save() {
            tracing::warn!(?err, "Failed to persist send history: {err}");
        }
    }

    /// Number of sends recorded within the last hour.
    pub fn sent_last_hour(&self) -> usize {
        self.history.count_since(Utc::now() - TimeDelta::hours(1))
    }

    /// Whether sending one more message now would breach a cap.
    pub fn check_limits(&self) -> LimitDecision {
        let now = Utc::now();

        let last_hour = self.history.count_since(now - TimeDelta::hours(1));
        if last_hour >= self.config.hourly_limit as usize {
            let retry_after = until_next_hour(now);
            return LimitDecision::Denied {
                reason: format!(
                    "hourly limit of {} reached, next window opens in {} min",
                    self.config.hourly_limit,
                    retry_after.num_minutes().max(1),
                ),
                retry_after,
            };
        }

        // The daily count deliberately scans only a recent suffix of the
        // history, see DAILY_SCAN_WINDOW.
        if self.history.len() > DAILY_CHECK_THRESHOLD {
            let last_day = self
                .history
                .count_since_scanning_last(now - TimeDelta::days(1), DAILY_SCAN_WINDOW);
            if last_day >= self.config.daily_limit as usize {
                return LimitDecision::Denied {
                    reason: format!("daily limit of {} reached", self.config.daily_limit),
                    retry_after: TimeDelta::hours(1),
                };
            }
        }

        LimitDecision::Allowed
    }

    /// The pacing delay to apply before the next send.
    ///
    /// Not a rate-limit check: the result widens as hourly usage approaches
    /// the cap, otherwise follows the rotating cadence patterns with jitter,
    /// and is always clamped to `[min_delay, max_delay]` before the nighttime
    /// scaling is applied.
    pub fn next_delay(&mut self) -> Duration {
        self.delay_for_hour(Local::now().hour())
    }

    fn delay_for_hour(&mut self, hour: u32) -> Duration {
        let mut rng = rand::thread_rng();
        let last_hour = self.sent_last_hour() as f64;
        let cap = self.config.hourly_limit as f64;

        let base = if last_hour > cap * 0.8 {
            rng.gen_range(8.0..=15.0)
        } else if last_hour > cap * 0.5 {
            rng.gen_range(5.0..=10.0)
        } else {
            let pattern = &DELAY_PATTERNS[self.current_pattern];
            let base = pattern[self.position_in_pattern] + rng.gen_range(-0.5..=0.5);
            self.position_in_pattern += 1;
            if self.position_in_pattern >= pattern.len() {
                self.position_in_pattern = 0;
                self.current_pattern = (self.current_pattern + 1) % DELAY_PATTERNS.len();
            }
            base
        };

        let mut delay = base.clamp(self.config.min_delay, self.config.max_delay);
        if (0..6).contains(&hour) {
            delay *= 0.7;
        }

        Duration::from_secs_f64((delay * 100.0).round() / 100.0)
    }

    /// How many messages to send in a burst before pausing.
    ///
    /// Advisory only: callers use it to decide when to insert a break, the
    /// limiter does not enforce it.
    pub fn recommended_batch_size(&self) -> usize {
        Self::batch_size_for_hour(Local::now().hour())
    }

    fn batch_size_for_hour(hour: u32) -> usize {
        let mut rng = rand::thread_rng();
        if (8..=20).contains(&hour) {
            rng.gen_range(3..=8)
        } else {
            rng.gen_range(5..=12)
        }
    }

    /// Whether to pause after `burst` consecutive sends, and for how long.
    ///
    /// A short break follows every completed burst; independently there is a
    /// small chance of a long break. At most one break is signaled per call,
    /// with the burst check taking precedence.
    pub fn should_pause(&self, burst: usize) -> Option<Duration> {
        let mut rng = rand::thread_rng();
        if burst >= self.recommended_batch_size() {
            return Some(Duration::from_secs_f64(rng.gen_range(30.0..=180.0)));
        }
        if rng.gen_bool(0.05) {
            return Some(Duration::from_secs_f64(rng.gen_range(300.0..=600.0)));
        }
        None
    }

    /// How long a human would plausibly take to type a payload of
    /// `payload_len` characters, including a thinking pause.
    ///
    /// Offered to transports that imitate typing before transmitting.
    pub fn typing_simulation(&self, payload_len: usize) -> Duration {
        let mut rng = rand::thread_rng();
        let typing = payload_len as f64 / TYPING_SPEED;
        let thinking = rng.gen_range(0.5..=2.0);
        let total = typing + thinking;
        Duration::from_secs_f64((total * 100.0).round() / 100.0)
    }
}

fn until_next_hour(now: DateTime<Utc>) -> TimeDelta {
    let into_hour = i64::from(now.minute()) * 60 + i64::from(now.second());
    TimeDelta::seconds(3600 - into_hour)
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::*;

    fn limiter(config: LimiterConfig) -> RateLimiter {
        RateLimiter::new(config)
    }

    fn record_sends(limiter: &mut RateLimiter, count: usize) {
        for _ in 0..count {
            limiter.record_send(1001.into(), "test message");
        }
    }

    #[test]
    fn delay_stays_within_bounds_for_all_hours_and_loads() {
        for load in [0usize, 18, 28] {
            let mut limiter = limiter(LimiterConfig::default());
            record_sends(&mut limiter, load);
            for hour in 0..24 {
                for _ in 0..20 {
                    let delay = limiter.delay_for_hour(hour).as_secs_f64();
                    assert!(
                        (1.39..=10.01).contains(&delay),
                        "delay {delay} out of bounds at hour {hour} load {load}"
                    );
                }
            }
        }
    }

    #[test]
    fn low_usage_delays_follow_the_cadence_patterns() {
        let mut limiter = limiter(LimiterConfig::default());
        let flattened: Vec<f64> = DELAY_PATTERNS.iter().flatten().copied().collect();
        for cycle in 0..2 {
            for (i, expected) in flattened.iter().enumerate() {
                let delay = limiter.delay_for_hour(12).as_secs_f64();
                let clamped_low = (expected - 0.5).max(2.0);
                let clamped_high = (expected + 0.5).min(10.0);
                assert!(
                    (clamped_low - 0.01..=clamped_high + 0.01).contains(&delay),
                    "delay {delay} does not match pattern value {expected} (cycle {cycle}, position {i})"
                );
            }
        }
    }

    #[test]
    fn high_usage_widens_the_delay() {
        let mut limiter = limiter(LimiterConfig {
            hourly_limit: 10,
            ..Default::default()
        });
        record_sends(&mut limiter, 9);
        for _ in 0..20 {
            let delay = limiter.delay_for_hour(12).as_secs_f64();
            // Sampled from [8, 15] then clamped to the 10s maximum.
            assert!((7.99..=10.01).contains(&delay), "delay {delay}");
        }
    }

    #[test]
    fn nighttime_scales_the_delay_down() {
        let mut limiter = limiter(LimiterConfig::default());
        for _ in 0..20 {
            let night = limiter.delay_for_hour(3).as_secs_f64();
            assert!(night <= 10.0 * 0.7 + 0.01, "night delay {night}");
            assert!(night >= 2.0 * 0.7 - 0.01, "night delay {night}");
        }
    }

    #[test]
    fn allows_sending_below_the_hourly_cap() {
        let mut limiter = limiter(LimiterConfig {
            hourly_limit: 5,
            ..Default::default()
        });
        record_sends(&mut limiter, 4);
        assert_matches!(limiter.check_limits(), LimitDecision::Allowed);
    }

    #[test]
    fn denies_at_the_hourly_cap() {
        let mut limiter = limiter(LimiterConfig {
            hourly_limit: 5,
            ..Default::default()
        });
        record_sends(&mut limiter, 5);
        assert_matches!(
            limiter.check_limits(),
            LimitDecision::Denied { reason, retry_after } => {
                assert!(reason.contains("hourly limit"), "{reason}");
                assert!(retry_after > TimeDelta::zero());
                assert!(retry_after <= TimeDelta::hours(1));
            }
        );
    }

    #[test]
    fn denies_at_the_daily_cap() {
        let mut limiter = limiter(LimiterConfig {
            hourly_limit: 1000,
            daily_limit: 120,
            ..Default::default()
        });
        record_sends(&mut limiter, 150);
        assert_matches!(
            limiter.check_limits(),
            LimitDecision::Denied { reason, .. } => {
                assert!(reason.contains("daily limit"), "{reason}");
            }
        );
    }

    #[test]
    fn daily_cap_is_not_checked_for_small_histories() {
        let mut limiter = limiter(LimiterConfig {
            hourly_limit: 1000,
            daily_limit: 10,
            ..Default::default()
        });
        record_sends(&mut limiter, 90);
        assert_matches!(limiter.check_limits(), LimitDecision::Allowed);
    }

    #[test]
    fn history_is_persisted_every_tenth_send() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let mut limiter = limiter(LimiterConfig {
            history_path: Some(path.clone()),
            ..Default::default()
        });

        record_sends(&mut limiter, 9);
        assert!(!path.exists());
        record_sends(&mut limiter, 1);
        assert!(path.exists());
    }

    #[test]
    fn payload_preview_is_truncated_to_fifty_characters() {
        let mut limiter = limiter(LimiterConfig::default());
        let payload = "é".repeat(120);
        limiter.record_send(1001.into(), &payload);

        assert_eq!(limiter.sent_last_hour(), 1);
        // Truncation counts characters, not bytes.
        let records = limiter.history.records();
        assert_eq!(records[0].preview.chars().count(), 50);
    }

    #[test]
    fn batch_size_is_smaller_during_the_day() {
        for _ in 0..100 {
            let day = RateLimiter::batch_size_for_hour(12);
            assert!((3..=8).contains(&day), "day batch {day}");
            let night = RateLimiter::batch_size_for_hour(23);
            assert!((5..=12).contains(&night), "night batch {night}");
        }
    }

    #[test]
    fn completed_burst_triggers_a_short_break() {
        let limiter = limiter(LimiterConfig::default());
        // 12 is the maximum batch size, so the burst check always fires.
        let pause = limiter.should_pause(12).expect("break expected");
        assert!(pause >= Duration::from_secs(30));
        assert!(pause <= Duration::from_secs(180));
    }

    #[test]
    fn small_bursts_only_pause_occasionally_and_for_longer() {
        let limiter = limiter(LimiterConfig::default());
        for _ in 0..100 {
            if let Some(pause) = limiter.should_pause(0) {
                assert!(pause >= Duration::from_secs(300));
                assert!(pause <= Duration::from_secs(600));
            }
        }
    }

    #[test]
    fn typing_simulation_scales_with_payload_length() {
        let limiter = limiter(LimiterConfig::default());
        let short = limiter.typing_simulation(10);
        assert!(short >= Duration::from_secs_f64(10.0 / TYPING_SPEED + 0.5 - 0.01));
        assert!(short <= Duration::from_secs_f64(10.0 / TYPING_SPEED + 2.0 + 0.01));

        let long = limiter.typing_simulation(400);
        assert!(long >= Duration::from_secs_f64(400.0 / TYPING_SPEED + 0.5 - 0.01));
    }
}
