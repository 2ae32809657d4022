//! A multi-language code execution engine.
//!
//! Crucible accepts a source program plus an input stream, compiles and
//! runs it in a resource-bounded sandbox, and returns stdout/stderr, exit
//! status, and CPU/memory/time measurements. Submissions run through a
//! priority queue with a bounded worker pool; results are persisted to a
//! pluggable store, streamed to subscribers, and optionally delivered to
//! a webhook.
//!
//! # Features
//!
//! - **Sandboxed execution** — per-submission workspaces, rlimits,
//!   process groups, CPU/memory sampling, and ordered limit
//!   classification.
//! - **Multi-language** — TOML-configured toolchains for compiled and
//!   interpreted languages, with template argv expansion and JVM-style
//!   class name detection.
//! - **Queueing** — priority FIFO with backpressure, idempotent intake,
//!   at-most-once dispatch, and cancellation of pending and running work.
//! - **Async and sync intake** — token-based polling, blocking wait mode,
//!   batches, status broadcast, webhook callbacks.

pub use config::{ConfigError, EXAMPLE_CONFIG, EngineConfig, Language};
pub use dispatch::{CancelOutcome, DispatcherStats, QueueFullError};
pub use engine::{Engine, EngineError, SubmitError};
pub use events::StatusEvent;
pub use render::{RenderError, RenderOptions, render_submission};
pub use sandbox::{DirectSandbox, SandboxBackend, SandboxError, Workspace};
pub use store::{MemoryStore, StoreError, SubmissionStore};
pub use submission::{Submission, SubmissionId, SubmissionRequest, SubmissionStatus};
pub use types::{ExecutionFlags, ResourceLimits, RunOutcome, Termination};

pub mod callback;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod events;
pub mod executor;
pub mod render;
pub mod sandbox;
pub mod store;
pub mod submission;
pub mod types;
