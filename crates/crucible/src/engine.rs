//! The engine handle.
//!
//! One [`Engine`] owns the whole pipeline — registry, dispatcher, worker
//! pool, store, callbacks — with an explicit lifecycle, so tests can run
//! several engines in one process and nothing lives in ambient state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::callback::CallbackEmitter;
use crate::config::EngineConfig;
use crate::dispatch::{CancelOutcome, Dispatcher, DispatcherStats, QueueFullError};
use crate::events::{StatusBroadcast, StatusEvent};
use crate::executor::Executor;
use crate::sandbox::{DirectSandbox, SandboxBackend, Workspace};
use crate::store::{MemoryStore, SubmissionStore, TerminalUpdate};
use crate::submission::{Submission, SubmissionRequest, SubmissionStatus};
use crate::types::ResourceLimits;

/// Upper bound on `source_code + stdin + additional_files` at intake
const MAX_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Extra wait allowed beyond the submission's own time budget in wait mode
const WAIT_SLACK: Duration = Duration::from_secs(5);

/// Compile-phase wall allowance folded into the wait-mode deadline
const WAIT_COMPILE_ALLOWANCE: Duration = Duration::from_secs(60);

/// Intake faults; these are returned synchronously and never reach a worker
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("language '{0}' is not supported")]
    UnknownLanguage(String),

    #[error("source code is required")]
    MissingSource,

    #[error("submission payload is too large ({size} bytes, limit {limit})")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error(transparent)]
    QueueFull(#[from] QueueFullError),

    #[error("store failed: {0}")]
    Store(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store failed: {0}")]
    Store(String),
}

pub struct Engine {
    config: Arc<EngineConfig>,
    store: Arc<dyn SubmissionStore>,
    dispatcher: Arc<Dispatcher>,
    executor: Executor,
    events: StatusBroadcast,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl Engine {
    /// Start an engine with the in-memory store and the direct sandbox
    pub async fn start(config: EngineConfig) -> Self {
        Self::start_with(config, Arc::new(MemoryStore::new()), None).await
    }

    /// Start an engine over an existing store and an optional custom
    /// backend; reconciles store leftovers and spawns the worker pool.
    pub async fn start_with(
        config: EngineConfig,
        store: Arc<dyn SubmissionStore>,
        backend: Option<Arc<dyn SandboxBackend>>,
    ) -> Self {
        let backend = backend.unwrap_or_else(|| {
            Arc::new(DirectSandbox::with_identity(
                config.sandbox_uid,
                config.sandbox_gid,
            ))
        });

        let config = Arc::new(config);
        let dispatcher = Arc::new(Dispatcher::new(config.max_queue_size));
        let events = StatusBroadcast::new();
        let callbacks = CallbackEmitter::new(config.callback_timeout_ms);
        let executor = Executor::new(
            config.clone(),
            store.clone(),
            backend,
            events.clone(),
            callbacks,
        );

        let engine = Self {
            config,
            store,
            dispatcher,
            executor,
            events,
            next_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        };

        engine.recover().await;
        engine.spawn_workers();
        engine
    }

    /// Restart reconciliation: `running` records whose execution died with
    /// the previous engine become `internal_error`; `queued` records are
    /// re-enqueued. A `running` record whose workspace still exists is
    /// left alone — its execution is still in flight.
    async fn recover(&self) {
        let unfinished = match self.store.list_unfinished().await {
            Ok(unfinished) => unfinished,
            Err(e) => {
                warn!(error = %e, "could not list unfinished submissions for recovery");
                return;
            }
        };

        let workspace_root = self.config.workspace_root();
        for submission in unfinished {
            // Keep fresh ids above anything already in the store
            self.next_id.fetch_max(submission.id + 1, Ordering::Relaxed);

            match submission.status {
                SubmissionStatus::Running => {
                    // Workspaces are removed on every terminal path, so a
                    // surviving one marks an execution that may still be
                    // running under another supervisor
                    if Workspace::exists_for(&workspace_root, submission.id).await {
                        info!(
                            id = submission.id,
                            "workspace still present; leaving running record untouched"
                        );
                        continue;
                    }
                    info!(id = submission.id, "reconciling orphaned running submission");
                    let _ = self.executor.fail(submission.id, "engine restart").await;
                }
                SubmissionStatus::Queued => {
                    if self
                        .dispatcher
                        .submit(submission.id, submission.priority)
                        .is_err()
                    {
                        let _ = self
                            .executor
                            .fail(submission.id, "engine restart: queue full")
                            .await;
                    }
                }
                _ => {}
            }
        }
    }

    /// Long-lived workers; each pulls jobs in sequence and never dies with
    /// a submission — a panicking job is translated into `internal_error`.
    fn spawn_workers(&self) {
        for worker in 0..self.config.max_concurrent {
            let dispatcher = self.dispatcher.clone();
            let executor = self.executor.clone();
            let shutdown = self.shutdown.clone();

            tokio::spawn(async move {
                loop {
                    let (job, cancel) = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        job = dispatcher.next_job() => job,
                    };

                    debug!(worker, id = job.id, "worker picked up submission");
                    let task = {
                        let executor = executor.clone();
                        tokio::spawn(async move { executor.execute(job.id, cancel).await })
                    };

                    let status = match task.await {
                        Ok(status) => status,
                        Err(e) if e.is_panic() => {
                            warn!(worker, id = job.id, "submission execution panicked");
                            executor.fail(job.id, "execution panicked").await
                        }
                        Err(_) => None,
                    };

                    let success = !matches!(status, Some(SubmissionStatus::InternalError) | None);
                    dispatcher.complete(job.id, success);
                }
            });
        }
    }

    /// Accept a submission; returns the initial queued record with its token
    #[instrument(skip(self, request), fields(language = %request.language))]
    pub async fn submit(&self, request: SubmissionRequest) -> Result<Submission, SubmitError> {
        self.config
            .get_language(&request.language)
            .map_err(|_| SubmitError::UnknownLanguage(request.language.clone()))?;

        if request.source_code.is_empty() {
            return Err(SubmitError::MissingSource);
        }

        let size = request.source_code.len()
            + request.stdin.len()
            + request.additional_files.as_ref().map_or(0, String::len);
        if size > MAX_PAYLOAD_BYTES {
            return Err(SubmitError::PayloadTooLarge {
                size,
                limit: MAX_PAYLOAD_BYTES,
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = Uuid::new_v4().to_string();
        let priority = request.priority;
        let limits = request.limits.clone();
        let submission = Submission::queued(id, token, request, limits);

        // Admission (capacity + at-most-once) happens in the dispatcher;
        // the executor tolerates the insert landing a moment later
        self.dispatcher.submit(id, priority)?;

        if let Err(e) = self.store.insert(submission.clone()).await {
            self.dispatcher.cancel(id);
            return Err(SubmitError::Store(e.to_string()));
        }

        self.events.emit(id, &submission.token, SubmissionStatus::Queued);
        Ok(submission)
    }

    /// Synchronous mode: submit and block until the record is terminal,
    /// bounded by the submission's own time budget plus a small slack.
    pub async fn submit_wait(&self, request: SubmissionRequest) -> Result<Submission, SubmitError> {
        let mut events = self.events.subscribe();

        let language = self
            .config
            .get_language(&request.language)
            .map_err(|_| SubmitError::UnknownLanguage(request.language.clone()))?;
        let limits = self.config.effective_limits(language, Some(&request.limits));
        let deadline = wait_deadline(&limits, language.is_compiled());

        let submitted = self.submit(request).await?;
        let id = submitted.id;

        let waited = tokio::time::timeout(deadline, async {
            loop {
                match events.recv().await {
                    Ok(StatusEvent { id: event_id, status, .. })
                        if event_id == id && status.is_terminal() =>
                    {
                        break;
                    }
                    Ok(_) => {}
                    // Lagged or closed: fall back to polling the store
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if let Ok(Some(record)) = self.store.get(id).await
                            && record.is_terminal()
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
        .await;

        if waited.is_err() {
            debug!(id, "wait-mode deadline elapsed; returning current record");
        }

        match self.store.get(id).await {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(SubmitError::Store("submission vanished".to_owned())),
            Err(e) => Err(SubmitError::Store(e.to_string())),
        }
    }

    /// Batch intake: per-item outcome, order preserved
    pub async fn submit_batch(
        &self,
        requests: Vec<SubmissionRequest>,
    ) -> Vec<Result<Submission, SubmitError>> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.submit(request).await);
        }
        results
    }

    /// Current record by token, including interim states
    pub async fn get(&self, token: &str) -> Result<Option<Submission>, EngineError> {
        self.store
            .get_by_token(token)
            .await
            .map_err(|e| EngineError::Store(e.to_string()))
    }

    /// Batch retrieval by comma-separated token list; missing tokens come
    /// back as explicit None in the same positions.
    pub async fn get_many(&self, tokens: &str) -> Result<Vec<Option<Submission>>, EngineError> {
        let mut records = Vec::new();
        for token in tokens.split(',').map(str::trim) {
            if token.is_empty() {
                records.push(None);
                continue;
            }
            records.push(self.get(token).await?);
        }
        Ok(records)
    }

    /// Cancel by token. A non-terminal submission is cancelled (pending
    /// jobs never spawn a process); a terminal one is returned untouched —
    /// there is nothing left to cancel.
    #[instrument(skip(self))]
    pub async fn cancel(&self, token: &str) -> Result<Option<Submission>, EngineError> {
        let Some(record) = self.get(token).await? else {
            return Ok(None);
        };
        if record.is_terminal() {
            return Ok(Some(record));
        }

        match self.dispatcher.cancel(record.id) {
            CancelOutcome::Removed => {
                let cancelled = self
                    .store
                    .mark_terminal(
                        record.id,
                        TerminalUpdate::status_only(
                            SubmissionStatus::Cancelled,
                            "Execution cancelled",
                        ),
                    )
                    .await
                    .map_err(|e| EngineError::Store(e.to_string()))?;
                if let Some(ref record) = cancelled {
                    self.events.emit(record.id, &record.token, record.status);
                }
                Ok(cancelled)
            }
            // The running worker observes the token and finishes the
            // transition itself
            CancelOutcome::Cancelling => self.get(token).await,
            CancelOutcome::NotFound | CancelOutcome::AlreadyDone => self.get(token).await,
        }
    }

    /// Subscribe to status transitions (queued, running, terminal)
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> DispatcherStats {
        self.dispatcher.stats()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Stop the worker pool; running children finish their current job
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Wait-mode upper bound: per-run wall budget times runs, plus a compile
/// allowance for compiled languages, plus slack
fn wait_deadline(limits: &ResourceLimits, compiled: bool) -> Duration {
    let wall = limits.wall_time_limit.unwrap_or(10.0).max(0.0);
    let runs = limits.runs() as f64;
    let mut deadline = Duration::from_secs_f64(wall * runs) + WAIT_SLACK;
    if compiled {
        deadline += WAIT_COMPILE_ALLOWANCE;
    }
    deadline
}
