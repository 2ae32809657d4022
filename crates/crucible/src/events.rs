//! In-process status transition broadcast.
//!
//! Every store transition the engine makes is mirrored onto a broadcast
//! channel so transports can push updates instead of polling the store.
//! The guarantee is linearizable transitions per submission, not
//! real-time delivery; slow subscribers lose old events, never order.

use tokio::sync::broadcast;

use crate::submission::{SubmissionId, SubmissionStatus};

const CHANNEL_CAPACITY: usize = 1024;

/// One status transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub id: SubmissionId,
    pub token: String,
    pub status: SubmissionStatus,
}

/// Cloneable sender side of the status stream
#[derive(Debug, Clone)]
pub struct StatusBroadcast {
    sender: broadcast::Sender<StatusEvent>,
}

impl StatusBroadcast {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish a transition; having no subscribers is not an error
    pub fn emit(&self, id: SubmissionId, token: &str, status: SubmissionStatus) {
        let _ = self.sender.send(StatusEvent {
            id,
            token: token.to_owned(),
            status,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }
}

impl Default for StatusBroadcast {
    fn default() -> Self {
        Self::new()
    }
}
