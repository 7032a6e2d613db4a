//! The shared job queue.
//!
//! Two ordering structures back the queue: an insertion-ordered FIFO for jobs
//! with no explicit send time, and a min-heap for deferred/retry jobs keyed by
//! `(priority, scheduled_at)` ascending. [`JobQueue::pop_ready`] merges both
//! into a single "next ready job" operation.
//!
//! All operations take a single internal lock, which is only ever held for the
//! duration of the push/pop itself. The queue is the one piece of shared
//! mutable state between producers (campaigns, retry reinsertion) and the
//! scheduler's processing loop.
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::job::Job;

/// A thread-safe queue of pending [`Job`]s.
#[derive(Default)]
pub struct JobQueue {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    immediate: VecDeque<Job>,
    deferred: BinaryHeap<Reverse<Deferred>>,
    seq: u64,
}

struct Deferred {
    priority: u8,
    at: DateTime<Utc>,
    seq: u64,
    job: Job,
}

impl Deferred {
    fn key(&self) -> (u8, DateTime<Utc>, u64) {
        (self.priority, self.at, self.seq)
    }
}

impl PartialEq for Deferred {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Deferred {}

impl PartialOrd for Deferred {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Deferred {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl JobQueue {
    /// Creates a new empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a job to the queue.
    ///
    /// Jobs without a [`Job::scheduled_at`] go to the FIFO and are ready
    /// immediately; jobs with one go to the deferred structure and become
    /// ready once their scheduled time passes.
    pub fn push(&self, job: Job) {
        let mut inner = self.inner.lock().expect("job queue lock poisoned");
        match job.scheduled_at {
            None => inner.immediate.push_back(job),
            Some(at) => {
                inner.seq += 1;
                let seq = inner.seq;
                inner.deferred.push(Reverse(Deferred {
                    priority: job.priority,
                    at,
                    seq,
                    job,
                }));
            }
        }
    }

    /// Removes and returns the next ready job.
    ///
    /// The deferred structure's minimum is preferred; if it is not yet due it
    /// stays put and the FIFO is popped instead. Returns [`None`] when both
    /// structures are empty or the only deferred jobs are not yet due.
    pub fn pop_ready(&self) -> Option<Job> {
        let mut inner = self.inner.lock().expect("job queue lock poisoned");
        let now = Utc::now();
        if let Some(Reverse(head)) = inner.deferred.peek() {
            if head.at <= now {
                return inner.deferred.pop().map(|Reverse(deferred)| deferred.job);
            }
        }
        inner.immediate.pop_front()
    }

    /// Returns `true` when both backing structures are empty.
    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock().expect("job queue lock poisoned");
        inner.immediate.is_empty() && inner.deferred.is_empty()
    }

    /// Returns the number of `(immediate, deferred)` jobs currently queued.
    pub fn len(&self) -> (usize, usize) {
        let inner = self.inner.lock().expect("job queue lock poisoned");
        (inner.immediate.len(), inner.deferred.len())
    }

    #[cfg(test)]
    pub(crate) fn deferred_jobs(&self) -> Vec<Job> {
        let inner = self.inner.lock().expect("job queue lock poisoned");
        let mut jobs: Vec<_> = inner
            .deferred
            .iter()
            .map(|Reverse(deferred)| deferred.job.clone())
            .collect();
        jobs.sort_by_key(|job| (job.priority, job.scheduled_at));
        jobs
    }
}
