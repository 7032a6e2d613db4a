//! The dispatch scheduler.
//!
//! A [`Scheduler`] owns the run/pause/stop state machine and a single
//! processing loop which pulls jobs from the shared [`JobQueue`], gates each
//! send through the [`RateLimiter`], delegates delivery to the injected
//! [`Transport`] and applies the [`RetryPolicy`] on failure.
//!
//! Delivery is strictly serialized through the one loop so the global pacing
//! guarantees stay meaningful. Control operations (`start`, `pause`,
//! `resume`, `stop`, `status`) are safe to call from any task; `stop` is
//! cooperative and observed at loop iteration boundaries.
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::job::{Job, RATE_LIMITED_PRIORITY, RETRY_PRIORITY_BOOST};
use crate::limiter::{LimitDecision, RateLimiter};
use crate::queue::JobQueue;
use crate::retry::RetryPolicy;
use crate::transport::{Directory, Transport};

/// How long a job denied by the rate limiter is deferred before it is looked
/// at again.
const RATE_LIMIT_DEFERRAL_MINUTES: i64 = 5;

/// A statistics snapshot is logged every this many successful sends.
const STATS_SNAPSHOT_EVERY: u64 = 10;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// `start` was called while a run was already in progress.
    #[error("scheduler is already running")]
    AlreadyRunning,
    /// The processing loop did not exit within the shutdown timeout and must
    /// be treated as abandoned.
    #[error("processing loop did not stop within {0:?}")]
    ShutdownTimeout(Duration),
}

/// The scheduler's run state.
///
/// `Idle` → `Running` on start; `Running` ↔ `Paused` on pause/resume;
/// `Stopped` when explicitly stopped, when the send cap is reached, or when
/// the queue drains with auto-stop enabled. `Stopped` is terminal for a run;
/// a new `start` reinitializes to `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Paused,
    Stopped,
}

/// Aggregate delivery statistics, owned by the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Successful deliveries across all runs.
    pub total_sent: u64,
    /// Failed delivery attempts across all runs.
    pub total_failed: u64,
    /// When the current run started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the most recent successful delivery happened.
    pub last_sent_at: Option<DateTime<Utc>>,
}

/// A point-in-time view of the scheduler, see [`Scheduler::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub immediate_queued: usize,
    pub deferred_queued: usize,
    pub state: RunState,
    pub stats: SchedulerStats,
}

/// Options for a single run, see [`Scheduler::start`].
#[derive(Debug, Clone, Copy)]
pub struct StartOptions {
    /// Stop after this many successful sends. [`None`] means unbounded.
    pub max_messages: Option<u64>,
    /// Transition to `Stopped` when the cap is reached or the queue drains.
    pub auto_stop: bool,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            max_messages: None,
            auto_stop: true,
        }
    }
}

/// Tuning knobs for the processing loop.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// How long the loop idles when paused or when no job is ready.
    pub idle_wait: Duration,
    /// How long [`Scheduler::stop`] waits for the loop to exit.
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_wait: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// The message dispatch scheduler.
///
/// All collaborators are injected at construction; the scheduler holds no
/// process-wide state, so isolated instances can run side by side (and under
/// test with stub collaborators).
pub struct Scheduler<T, D> {
    inner: Arc<Inner<T, D>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

struct Inner<T, D> {
    queue: Arc<JobQueue>,
    limiter: Mutex<RateLimiter>,
    retry: RetryPolicy,
    transport: Arc<T>,
    directory: Arc<D>,
    config: SchedulerConfig,
    state: Mutex<RunState>,
    stats: Mutex<SchedulerStats>,
    cancel: Mutex<CancellationToken>,
}

impl<T, D> Scheduler<T, D>
where
    T: Transport + 'static,
    D: Directory + 'static,
{
    /// Creates a scheduler over the given queue and collaborators.
    pub fn new(
        queue: Arc<JobQueue>,
        limiter: RateLimiter,
        retry: RetryPolicy,
        transport: Arc<T>,
        directory: Arc<D>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue,
                limiter: Mutex::new(limiter),
                retry,
                transport,
                directory,
                config: SchedulerConfig::default(),
                state: Mutex::new(RunState::Idle),
                stats: Mutex::new(SchedulerStats::default()),
                cancel: Mutex::new(CancellationToken::new()),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Overrides the loop tuning knobs.
    pub fn with_config(self, config: SchedulerConfig) -> Self {
        let inner = Arc::into_inner(self.inner)
            .expect("with_config must be called before the scheduler is shared");
        Self {
            inner: Arc::new(Inner { config, ..inner }),
            handle: self.handle,
        }
    }

    /// Starts a run: transitions to `Running` and spawns the processing loop.
    ///
    /// Fails with [`SchedulerError::AlreadyRunning`] unless the scheduler is
    /// `Idle` or `Stopped`.
    pub fn start(&self, options: StartOptions) -> Result<(), SchedulerError> {
        {
            let mut state = self.inner.state.lock().expect("run state lock poisoned");
            match *state {
                RunState::Idle | RunState::Stopped => *state = RunState::Running,
                RunState::Running | RunState::Paused => {
                    return Err(SchedulerError::AlreadyRunning)
                }
            }
        }
        self.inner
            .stats
            .lock()
            .expect("stats lock poisoned")
            .started_at = Some(Utc::now());

        let token = CancellationToken::new();
        *self.inner.cancel.lock().expect("cancel lock poisoned") = token.clone();

        tracing::debug!(?options, "Starting broadcast scheduler");
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.process(options, token).await });
        *self.handle.lock().expect("handle lock poisoned") = Some(handle);
        Ok(())
    }

    /// Pauses job processing. An in-flight delivery is not interrupted.
    pub fn pause(&self) {
        let mut state = self.inner.state.lock().expect("run state lock poisoned");
        if *state == RunState::Running {
            *state = RunState::Paused;
            tracing::debug!("Broadcast paused");
        }
    }

    /// Resumes a paused run.
    pub fn resume(&self) {
        let mut state = self.inner.state.lock().expect("run state lock poisoned");
        if *state == RunState::Paused {
            *state = RunState::Running;
            tracing::debug!("Broadcast resumed");
        }
    }

    /// Stops the current run and waits for the processing loop to exit.
    ///
    /// Cooperative: the loop observes the stop at its next iteration
    /// boundary. If it does not exit within the shutdown timeout the loop is
    /// treated as abandoned and [`SchedulerError::ShutdownTimeout`] returned.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        {
            let mut state = self.inner.state.lock().expect("run state lock poisoned");
            if matches!(*state, RunState::Running | RunState::Paused) {
                *state = RunState::Stopped;
            }
        }
        self.inner
            .cancel
            .lock()
            .expect("cancel lock poisoned")
            .cancel();

        let handle = self.handle.lock().expect("handle lock poisoned").take();
        if let Some(handle) = handle {
            let timeout = self.inner.config.shutdown_timeout;
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::error!(?err, "Processing loop task failed: {err}"),
                Err(_) => return Err(SchedulerError::ShutdownTimeout(timeout)),
            }
        }
        tracing::debug!("Broadcast scheduler stopped");
        Ok(())
    }

    /// A non-blocking snapshot of the queues, run state and statistics.
    pub fn status(&self) -> Status {
        let (immediate_queued, deferred_queued) = self.inner.queue.len();
        Status {
            immediate_queued,
            deferred_queued,
            state: *self.inner.state.lock().expect("run state lock poisoned"),
            stats: self
                .inner
                .stats
                .lock()
                .expect("stats lock poisoned")
                .clone(),
        }
    }
}

impl<T, D> Inner<T, D>
where
    T: Transport,
    D: Directory,
{
    async fn process(self: Arc<Self>, options: StartOptions, cancel: CancellationToken) {
        tracing::debug!("Processing loop started");
        let mut sent_this_run: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            match self.run_state() {
                RunState::Stopped | RunState::Idle => break,
                RunState::Paused => {
                    self.idle_wait(&cancel).await;
                    continue;
                }
                RunState::Running => {}
            }

            if let Some(max) = options.max_messages {
                if sent_this_run >= max {
                    tracing::debug!(sent_this_run, "Send cap reached");
                    if options.auto_stop {
                        self.set_stopped();
                    }
                    break;
                }
            }

            let Some(job) = self.queue.pop_ready() else {
                if options.auto_stop && self.queue.is_empty() {
                    tracing::debug!("Queue drained, stopping");
                    self.set_stopped();
                    break;
                }
                self.idle_wait(&cancel).await;
                continue;
            };

            let decision = self
                .limiter
                .lock()
                .expect("rate limiter lock poisoned")
                .check_limits();
            if let LimitDecision::Denied {
                reason,
                retry_after,
            } = decision
            {
                tracing::warn!(
                    %reason,
                    retry_after_minutes = retry_after.num_minutes(),
                    destination = %job.destination,
                    "Delivery deferred by rate limiter"
                );
                self.queue.push(Job {
                    scheduled_at: Some(
                        Utc::now() + TimeDelta::minutes(RATE_LIMIT_DEFERRAL_MINUTES),
                    ),
                    priority: RATE_LIMITED_PRIORITY,
                    ..job
                });
                continue;
            }

            let delay = self
                .limiter
                .lock()
                .expect("rate limiter lock poisoned")
                .next_delay();

            let destination = job.destination;
            match self
                .transport
                .attempt_delivery(destination, &job.payload, delay)
                .await
            {
                Ok(()) => {
                    sent_this_run += 1;
                    let total_sent = {
                        let mut stats = self.stats.lock().expect("stats lock poisoned");
                        stats.total_sent += 1;
                        stats.last_sent_at = Some(Utc::now());
                        stats.total_sent
                    };
                    self.limiter
                        .lock()
                        .expect("rate limiter lock poisoned")
                        .record_send(destination, &job.payload);
                    self.directory.record_successful_send(destination);
                    tracing::debug!(%destination, "Message delivered");
                    if total_sent % STATS_SNAPSHOT_EVERY == 0 {
                        self.log_stats();
                    }
                }
                Err(err) => {
                    self.stats
                        .lock()
                        .expect("stats lock poisoned")
                        .total_failed += 1;
                    let attempt = job.attempt + 1;
                    if self.retry.is_exhausted(attempt) {
                        tracing::error!(
                            %err,
                            %destination,
                            attempts = attempt,
                            "Delivery abandoned after {attempt} attempts"
                        );
                    } else {
                        let backoff = self.retry.backoff(attempt);
                        tracing::warn!(
                            %err,
                            %destination,
                            attempt,
                            "Delivery failed, retrying in {backoff}"
                        );
                        self.queue.push(Job {
                            attempt,
                            scheduled_at: Some(Utc::now() + backoff),
                            priority: job.priority.saturating_sub(RETRY_PRIORITY_BOOST),
                            ..job
                        });
                    }
                }
            }
        }

        self.limiter
            .lock()
            .expect("rate limiter lock poisoned")
            .flush();
        tracing::debug!("Processing loop exited");
    }

    fn run_state(&self) -> RunState {
        *self.state.lock().expect("run state lock poisoned")
    }

    fn set_stopped(&self) {
        let mut state = self.state.lock().expect("run state lock poisoned");
        if matches!(*state, RunState::Running | RunState::Paused) {
            *state = RunState::Stopped;
        }
    }

    async fn idle_wait(&self, cancel: &CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(self.config.idle_wait) => {}
        }
    }

    fn log_stats(&self) {
        let stats = self.stats.lock().expect("stats lock poisoned").clone();
        let sent_last_hour = self
            .limiter
            .lock()
            .expect("rate limiter lock poisoned")
            .sent_last_hour();
        let runtime = stats.started_at.map(|started_at| Utc::now() - started_at);
        tracing::info!(
            total_sent = stats.total_sent,
            total_failed = stats.total_failed,
            sent_last_hour,
            runtime = ?runtime,
            "Broadcast statistics"
        );
    }
}
