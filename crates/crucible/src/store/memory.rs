//! In-process submission store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::store::{StoreError, SubmissionStore, SubmissionUpdate, TerminalUpdate};
use crate::submission::{Submission, SubmissionId};

/// Map-backed store; atomicity comes from holding the write lock across
/// each read-modify-write.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    by_id: HashMap<SubmissionId, Submission>,
    by_token: HashMap<String, SubmissionId>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.inner.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.by_id.is_empty()
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn insert(&self, submission: Submission) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;

        if inner.by_id.contains_key(&submission.id) {
            return Err(StoreError::Rejected(format!(
                "submission id {} already exists",
                submission.id
            )));
        }
        if inner.by_token.contains_key(&submission.token) {
            return Err(StoreError::Rejected(format!(
                "submission token {} already exists",
                submission.token
            )));
        }

        debug!(id = submission.id, token = %submission.token, "stored submission");
        inner.by_token.insert(submission.token.clone(), submission.id);
        inner.by_id.insert(submission.id, submission);
        Ok(())
    }

    async fn get(&self, id: SubmissionId) -> Result<Option<Submission>, StoreError> {
        Ok(self.inner.read().await.by_id.get(&id).cloned())
    }

    async fn get_by_token(&self, token: &str) -> Result<Option<Submission>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_token
            .get(token)
            .and_then(|id| inner.by_id.get(id))
            .cloned())
    }

    async fn update(
        &self,
        id: SubmissionId,
        fields: SubmissionUpdate,
    ) -> Result<Option<Submission>, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(record) = inner.by_id.get_mut(&id) else {
            return Ok(None);
        };

        // Terminal records are frozen
        if !record.is_terminal() {
            if let Some(status) = fields.status {
                record.status = status;
            }
            if let Some(limits) = fields.limits {
                record.limits = limits;
            }
        }

        Ok(Some(record.clone()))
    }

    async fn mark_terminal(
        &self,
        id: SubmissionId,
        fields: TerminalUpdate,
    ) -> Result<Option<Submission>, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(record) = inner.by_id.get_mut(&id) else {
            return Ok(None);
        };

        if record.is_terminal() {
            return Ok(Some(record.clone()));
        }

        record.status = fields.status;
        record.stdout = fields.stdout;
        record.stderr = fields.stderr;
        record.compile_output = fields.compile_output;
        record.exit_code = fields.exit_code;
        record.exit_signal = fields.exit_signal;
        record.time = fields.time;
        record.wall_time = fields.wall_time;
        record.memory = fields.memory;
        record.message = fields.message;
        record.finished_at = Some(Utc::now());

        debug!(id, status = %record.status, "submission reached terminal status");
        Ok(Some(record.clone()))
    }

    async fn list_unfinished(&self) -> Result<Vec<Submission>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .by_id
            .values()
            .filter(|s| !s.is_terminal())
            .cloned()
            .collect())
    }
}
