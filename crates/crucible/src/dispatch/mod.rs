//! Submission queue and scheduling.
//!
//! The dispatcher holds pending jobs in priority order (higher integer
//! first, insertion order as the tiebreak), refuses work past the queue
//! bound, hands jobs to long-lived workers at most once each, and routes
//! cancellations: a pending job is removed before it ever runs, a running
//! job gets its cancellation token tripped.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::submission::SubmissionId;

/// Returned by [`Dispatcher::submit`] when the pending queue is at
/// capacity; callers translate this into a client-visible
/// "too many requests" signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("submission queue is full")]
pub struct QueueFullError;

/// Outcome of a cancellation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Removed from the pending queue before it ever ran
    Removed,

    /// Running; its cancellation token has been tripped
    Cancelling,

    /// The dispatcher has never seen this id
    NotFound,

    /// Already finished; nothing to cancel
    AlreadyDone,
}

/// A job popped from the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Job {
    pub id: SubmissionId,
    pub priority: i32,
}

/// Queue counters; `completed` and `failed` count since engine start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherStats {
    pub pending: usize,
    pub running: usize,
    pub completed: u64,
    pub failed: u64,
}

/// BTreeMap iteration order is ascending, so `Reverse(priority)` puts the
/// highest priority first and `seq` keeps FIFO within a priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct JobKey {
    priority: std::cmp::Reverse<i32>,
    seq: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: BTreeMap<JobKey, Job>,
    index: HashMap<SubmissionId, JobKey>,
    running: HashMap<SubmissionId, CancellationToken>,
    /// Every id ever accepted; makes dispatch at-most-once per id
    known: HashSet<SubmissionId>,
    next_seq: u64,
}

#[derive(Debug)]
pub struct Dispatcher {
    state: Mutex<QueueState>,
    wakeup: Notify,
    max_queue_size: usize,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl Dispatcher {
    pub fn new(max_queue_size: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            wakeup: Notify::new(),
            max_queue_size,
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Enqueue a submission for execution.
    ///
    /// Idempotent: re-submitting a known id is a no-op returning Ok, so a
    /// retried intake can never cause a second execution.
    pub fn submit(&self, id: SubmissionId, priority: i32) -> Result<(), QueueFullError> {
        let mut state = self.lock_state();

        if state.known.contains(&id) {
            return Ok(());
        }
        if state.pending.len() >= self.max_queue_size {
            return Err(QueueFullError);
        }

        let key = JobKey {
            priority: std::cmp::Reverse(priority),
            seq: state.next_seq,
        };
        state.next_seq += 1;
        state.known.insert(id);
        state.index.insert(id, key);
        state.pending.insert(key, Job { id, priority });
        drop(state);

        debug!(id, priority, "submission enqueued");
        self.wakeup.notify_one();
        Ok(())
    }

    /// Cancel a submission wherever it currently is
    pub fn cancel(&self, id: SubmissionId) -> CancelOutcome {
        let mut state = self.lock_state();

        if let Some(key) = state.index.remove(&id) {
            state.pending.remove(&key);
            debug!(id, "pending job removed by cancellation");
            return CancelOutcome::Removed;
        }
        if let Some(token) = state.running.get(&id) {
            token.cancel();
            debug!(id, "running job signalled to cancel");
            return CancelOutcome::Cancelling;
        }
        if state.known.contains(&id) {
            return CancelOutcome::AlreadyDone;
        }
        CancelOutcome::NotFound
    }

    /// Wait for the next job. Long-lived workers call this in a loop; each
    /// job is handed out exactly once, with a fresh cancellation token
    /// registered under its id.
    pub async fn next_job(&self) -> (Job, CancellationToken) {
        loop {
            // Arm the notification before checking so a submit between the
            // check and the await cannot be missed
            let notified = self.wakeup.notified();
            if let Some(job) = self.try_pop() {
                return job;
            }
            notified.await;
        }
    }

    fn try_pop(&self) -> Option<(Job, CancellationToken)> {
        let mut state = self.lock_state();
        let (key, job) = state.pending.pop_first()?;
        debug_assert_eq!(state.index.get(&job.id), Some(&key));
        state.index.remove(&job.id);

        let token = CancellationToken::new();
        state.running.insert(job.id, token.clone());
        Some((job, token))
    }

    /// Record that a worker finished a job (whatever the outcome)
    pub fn complete(&self, id: SubmissionId, success: bool) {
        let mut state = self.lock_state();
        state.running.remove(&id);
        drop(state);

        if success {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> DispatcherStats {
        let state = self.lock_state();
        DispatcherStats {
            pending: state.pending.len(),
            running: state.running.len(),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
