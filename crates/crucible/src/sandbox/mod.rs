//! Sandboxed execution of toolchain steps.
//!
//! A [`SandboxBackend`] runs one argv vector in one workspace under one set
//! of resource limits and reports a structured [`RunOutcome`]. The shipped
//! backend is [`DirectSandbox`] (child processes under rlimits and process
//! groups); the trait seam exists so a container-based backend can be
//! swapped in at engine construction without touching the executor.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use crate::sandbox::process::DirectSandbox;
pub use crate::sandbox::stats::ProcessStats;
pub use crate::sandbox::workspace::{INPUT_FILE_NAME, Workspace};
use crate::types::{ExecutionFlags, ResourceLimits, RunOutcome};

mod process;
mod stats;
mod workspace;

/// Errors that occur while managing sandbox workspaces
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to create workspace under {path}: {source}")]
    WorkspaceCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("failed to expand additional files: {0}")]
    Archive(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything a backend needs to run one toolchain step
#[derive(Debug)]
pub struct RunRequest<'a> {
    /// Program and arguments, already template-expanded; no shell is used
    pub argv: &'a [String],

    /// Working directory, the only writable path the child should rely on
    pub workspace: &'a Path,

    /// Bytes fully written to the child's stdin, which is then closed
    pub stdin: &'a [u8],

    /// Extra environment variables (the child does not inherit the engine's)
    pub env: &'a HashMap<String, String>,

    /// PATH visible to the child
    pub path_var: &'a str,

    /// Limits to enforce; unset fields are unenforced
    pub limits: &'a ResourceLimits,

    pub flags: ExecutionFlags,

    /// Cancelling this token terminates the child's whole process group
    pub cancel: CancellationToken,
}

/// Capability for executing one prepared step under enforcement.
///
/// Implementations never fail at the Rust level: every way the child can
/// stop — including failing to start — is encoded in
/// [`RunOutcome::termination`], so the executor has a single
/// classification path.
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    async fn run(&self, request: RunRequest<'_>) -> RunOutcome;
}
