//! The submission store contract.
//!
//! The engine treats persistence as a collaborator: anything that can
//! atomically read and transition submission records can back it. The
//! shipped [`MemoryStore`] keeps records in process; a database-backed
//! implementation only needs this trait.

use async_trait::async_trait;
use thiserror::Error;

pub use crate::store::memory::MemoryStore;
use crate::submission::{Submission, SubmissionId, SubmissionStatus};
use crate::types::ResourceLimits;

mod memory;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store rejected the operation: {0}")]
    Rejected(String),

    #[error("store backend failed: {0}")]
    Backend(String),
}

/// Partial update applied to an interim (non-terminal) submission.
///
/// Updates against a terminal record are ignored; terminal records are
/// frozen.
#[derive(Debug, Clone, Default)]
pub struct SubmissionUpdate {
    pub status: Option<SubmissionStatus>,

    /// Resolved limits persisted at dispatch time so the record is
    /// self-describing
    pub limits: Option<ResourceLimits>,
}

/// The one-shot transition into a terminal status.
///
/// `finished_at` is stamped by the store at the moment of transition.
#[derive(Debug, Clone)]
pub struct TerminalUpdate {
    pub status: SubmissionStatus,
    pub stdout: Option<Vec<u8>>,
    pub stderr: Option<Vec<u8>>,
    pub compile_output: Option<String>,
    pub exit_code: Option<i32>,
    pub exit_signal: Option<i32>,
    pub time: Option<f64>,
    pub wall_time: Option<f64>,
    pub memory: Option<u64>,
    pub message: Option<String>,
}

impl TerminalUpdate {
    /// A terminal update carrying only a status and a message
    pub fn status_only(status: SubmissionStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            stdout: None,
            stderr: None,
            compile_output: None,
            exit_code: None,
            exit_signal: None,
            time: None,
            wall_time: None,
            memory: None,
            message: Some(message.into()),
        }
    }
}

/// Durable submission storage with atomic transitions.
///
/// All operations must be atomic with respect to concurrent readers;
/// per-id status transitions observed through this trait are
/// linearizable.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Store a fresh record; fails if the id or token already exists
    async fn insert(&self, submission: Submission) -> Result<(), StoreError>;

    async fn get(&self, id: SubmissionId) -> Result<Option<Submission>, StoreError>;

    async fn get_by_token(&self, token: &str) -> Result<Option<Submission>, StoreError>;

    /// Apply interim fields; no-op returning None for an unknown id, no-op
    /// returning the frozen record for a terminal one
    async fn update(
        &self,
        id: SubmissionId,
        fields: SubmissionUpdate,
    ) -> Result<Option<Submission>, StoreError>;

    /// Transition into a terminal status. Rejected if the record is
    /// already terminal — the current record is returned unchanged.
    async fn mark_terminal(
        &self,
        id: SubmissionId,
        fields: TerminalUpdate,
    ) -> Result<Option<Submission>, StoreError>;

    /// All records still in `queued` or `running` (restart reconciliation)
    async fn list_unfinished(&self) -> Result<Vec<Submission>, StoreError>;
}
