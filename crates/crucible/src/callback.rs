//! Webhook delivery for terminal submissions.
//!
//! Single best-effort POST of the terminal record; the store stays the
//! source of truth, so a failed delivery is logged and dropped rather
//! than retried.

use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::submission::Submission;

#[derive(Debug, Clone)]
pub struct CallbackEmitter {
    client: reqwest::Client,
    timeout: Duration,
}

impl CallbackEmitter {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    /// POST the terminal record to its callback URL, if one was requested.
    ///
    /// Never fails the submission: non-2xx and transport errors are logged
    /// and the record stands as persisted.
    #[instrument(skip(self, submission), fields(id = submission.id))]
    pub async fn deliver(&self, submission: &Submission) {
        let Some(url) = submission.callback_url.as_deref() else {
            return;
        };

        let result = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(submission)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(url, "callback delivered");
            }
            Ok(response) => {
                warn!(url, status = %response.status(), "callback rejected by receiver");
            }
            Err(e) => {
                warn!(url, error = %e, "callback delivery failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submission::SubmissionRequest;
    use crate::types::ResourceLimits;

    fn terminal_record(callback_url: Option<&str>) -> Submission {
        let mut sub = Submission::queued(
            1,
            "tok".to_owned(),
            SubmissionRequest {
                language: "python".to_owned(),
                source_code: b"print(1)".to_vec(),
                callback_url: callback_url.map(String::from),
                ..Default::default()
            },
            ResourceLimits::default(),
        );
        sub.status = crate::submission::SubmissionStatus::Accepted;
        sub
    }

    #[tokio::test]
    async fn deliver_without_url_is_noop() {
        let emitter = CallbackEmitter::new(100);
        emitter.deliver(&terminal_record(None)).await;
    }

    #[tokio::test]
    async fn deliver_to_unreachable_url_does_not_fail() {
        let emitter = CallbackEmitter::new(200);
        // Reserved TEST-NET address; delivery fails fast and is swallowed
        emitter
            .deliver(&terminal_record(Some("http://192.0.2.1:9/callback")))
            .await;
    }
}
