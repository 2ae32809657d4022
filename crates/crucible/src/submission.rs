//! Submission records and their status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ExecutionFlags, ResourceLimits};

/// Stable internal identifier of a submission
pub type SubmissionId = u64;

/// Lifecycle status of a submission.
///
/// `Queued` and `Running` are interim; everything else is terminal and
/// frozen — once a submission reaches a terminal status no field other
/// than administrative metadata changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Queued,
    Running,
    Accepted,
    WrongAnswer,
    CompilationError,
    RuntimeError,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    InternalError,
    Cancelled,
}

impl SubmissionStatus {
    /// True when no further transitions can occur
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SubmissionStatus::Queued | SubmissionStatus::Running)
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SubmissionStatus::Queued => "queued",
            SubmissionStatus::Running => "running",
            SubmissionStatus::Accepted => "accepted",
            SubmissionStatus::WrongAnswer => "wrong_answer",
            SubmissionStatus::CompilationError => "compilation_error",
            SubmissionStatus::RuntimeError => "runtime_error",
            SubmissionStatus::TimeLimitExceeded => "time_limit_exceeded",
            SubmissionStatus::MemoryLimitExceeded => "memory_limit_exceeded",
            SubmissionStatus::InternalError => "internal_error",
            SubmissionStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// What a client hands the engine to get code executed.
///
/// `limits` defaults to all-None so that unspecified fields resolve from
/// the language defaults at dispatch time, not from the global defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRequest {
    /// Language catalog key (e.g. "python", "cpp")
    pub language: String,

    /// Program source
    #[serde(with = "serde_bytes_vec")]
    pub source_code: Vec<u8>,

    /// Standard input for the program
    #[serde(default, with = "serde_bytes_vec")]
    pub stdin: Vec<u8>,

    /// Free-form options spliced into the compile step
    #[serde(default)]
    pub compiler_options: Option<String>,

    /// Free-form arguments appended to the run step
    #[serde(default)]
    pub command_line_arguments: Option<String>,

    /// Base64-encoded zip archive expanded into the workspace root
    #[serde(default)]
    pub additional_files: Option<String>,

    /// Expected stdout; when present a successful run is compared against it
    #[serde(default)]
    pub expected_output: Option<String>,

    /// Resource limit overrides (missing fields fall back to the language defaults)
    #[serde(default = "ResourceLimits::none")]
    pub limits: ResourceLimits,

    /// Execution flags
    #[serde(default)]
    pub flags: ExecutionFlags,

    /// URL POSTed the terminal record once the submission finishes
    #[serde(default)]
    pub callback_url: Option<String>,

    /// Scheduling priority; higher dispatches first
    #[serde(default)]
    pub priority: i32,
}

impl Default for SubmissionRequest {
    fn default() -> Self {
        Self {
            language: String::new(),
            source_code: Vec::new(),
            stdin: Vec::new(),
            compiler_options: None,
            command_line_arguments: None,
            additional_files: None,
            expected_output: None,
            limits: ResourceLimits::none(),
            flags: ExecutionFlags::default(),
            callback_url: None,
            priority: 0,
        }
    }
}

/// One unit of work, as stored.
///
/// Interim fields (`stdout`, `time`, …) are `None` until the submission
/// reaches a terminal status; the resolved `limits` are persisted at
/// dispatch time so every record is self-describing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    /// Stable internal identifier
    pub id: SubmissionId,

    /// Opaque public handle, unique and never reassigned
    pub token: String,

    pub language: String,

    #[serde(with = "serde_bytes_vec")]
    pub source_code: Vec<u8>,

    #[serde(default, with = "serde_bytes_vec")]
    pub stdin: Vec<u8>,

    pub compiler_options: Option<String>,

    pub command_line_arguments: Option<String>,

    pub additional_files: Option<String>,

    pub expected_output: Option<String>,

    /// Fully resolved limits (defaults → language → request overrides)
    pub limits: ResourceLimits,

    pub flags: ExecutionFlags,

    pub callback_url: Option<String>,

    pub priority: i32,

    pub status: SubmissionStatus,

    #[serde(default, with = "serde_opt_bytes_vec")]
    pub stdout: Option<Vec<u8>>,

    #[serde(default, with = "serde_opt_bytes_vec")]
    pub stderr: Option<Vec<u8>>,

    pub compile_output: Option<String>,

    pub exit_code: Option<i32>,

    pub exit_signal: Option<i32>,

    /// CPU time used in seconds
    pub time: Option<f64>,

    /// Wall clock time used in seconds
    pub wall_time: Option<f64>,

    /// Peak memory usage in kilobytes
    pub memory: Option<u64>,

    /// Final reason in free form (limit name, cancellation, engine fault)
    pub message: Option<String>,

    pub created_at: DateTime<Utc>,

    /// Set exactly when the status becomes terminal
    pub finished_at: Option<DateTime<Utc>>,
}

impl Submission {
    /// Build a fresh queued record from an intake request.
    ///
    /// `limits` must already be resolved against the language defaults.
    pub fn queued(
        id: SubmissionId,
        token: String,
        request: SubmissionRequest,
        limits: ResourceLimits,
    ) -> Self {
        Self {
            id,
            token,
            language: request.language,
            source_code: request.source_code,
            stdin: request.stdin,
            compiler_options: request.compiler_options,
            command_line_arguments: request.command_line_arguments,
            additional_files: request.additional_files,
            expected_output: request.expected_output,
            limits,
            flags: request.flags,
            callback_url: request.callback_url,
            priority: request.priority,
            status: SubmissionStatus::Queued,
            stdout: None,
            stderr: None,
            compile_output: None,
            exit_code: None,
            exit_signal: None,
            time: None,
            wall_time: None,
            memory: None,
            message: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// True when no further transitions can occur
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Byte fields serialize as UTF-8 when possible and as byte arrays otherwise;
/// the render layer (not serde) decides on base64 for client-facing output.
mod serde_bytes_vec {
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        match std::str::from_utf8(bytes) {
            Ok(s) => serializer.serialize_str(s),
            Err(_) => serializer.serialize_bytes(bytes),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        struct Visitor;

        impl<'de> serde::de::Visitor<'de> for Visitor {
            type Value = Vec<u8>;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a string or byte array")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(v.as_bytes().to_vec())
            }

            fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                Ok(v.to_vec())
            }

            fn visit_seq<A: serde::de::SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> Result<Self::Value, A::Error> {
                let mut out = Vec::new();
                while let Some(byte) = seq.next_element::<u8>()? {
                    out.push(byte);
                }
                Ok(out)
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}

mod serde_opt_bytes_vec {
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => super::serde_bytes_vec::serialize(b, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        struct OptVisitor;

        impl<'de> serde::de::Visitor<'de> for OptVisitor {
            type Value = Option<Vec<u8>>;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a string, byte array, or null")
            }

            fn visit_none<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(None)
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(None)
            }

            fn visit_some<D2: Deserializer<'de>>(
                self,
                deserializer: D2,
            ) -> Result<Self::Value, D2::Error> {
                super::serde_bytes_vec::deserialize(deserializer).map(Some)
            }
        }

        deserializer.deserialize_option(OptVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> SubmissionRequest {
        SubmissionRequest {
            language: "python".to_owned(),
            source_code: b"print(42)".to_vec(),
            ..Default::default()
        }
    }

    #[test]
    fn status_terminality() {
        assert!(!SubmissionStatus::Queued.is_terminal());
        assert!(!SubmissionStatus::Running.is_terminal());
        assert!(SubmissionStatus::Accepted.is_terminal());
        assert!(SubmissionStatus::WrongAnswer.is_terminal());
        assert!(SubmissionStatus::CompilationError.is_terminal());
        assert!(SubmissionStatus::RuntimeError.is_terminal());
        assert!(SubmissionStatus::TimeLimitExceeded.is_terminal());
        assert!(SubmissionStatus::MemoryLimitExceeded.is_terminal());
        assert!(SubmissionStatus::InternalError.is_terminal());
        assert!(SubmissionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn status_display_matches_wire_names() {
        assert_eq!(SubmissionStatus::TimeLimitExceeded.to_string(), "time_limit_exceeded");
        assert_eq!(SubmissionStatus::Accepted.to_string(), "accepted");
        assert_eq!(SubmissionStatus::WrongAnswer.to_string(), "wrong_answer");
    }

    #[test]
    fn queued_record_starts_clean() {
        let limits = ResourceLimits::default();
        let sub = Submission::queued(7, "tok".to_owned(), sample_request(), limits.clone());

        assert_eq!(sub.id, 7);
        assert_eq!(sub.token, "tok");
        assert_eq!(sub.status, SubmissionStatus::Queued);
        assert_eq!(sub.limits, limits);
        assert!(sub.stdout.is_none());
        assert!(sub.finished_at.is_none());
        assert!(!sub.is_terminal());
    }

    #[test]
    fn queued_record_keeps_request_fields() {
        let mut request = sample_request();
        request.priority = 3;
        request.callback_url = Some("http://example.test/cb".to_owned());
        let sub = Submission::queued(1, "t".to_owned(), request, ResourceLimits::default());

        assert_eq!(sub.language, "python");
        assert_eq!(sub.source_code, b"print(42)");
        assert_eq!(sub.priority, 3);
        assert_eq!(sub.callback_url.as_deref(), Some("http://example.test/cb"));
    }

    #[test]
    fn submission_serializes_text_bytes_as_strings() {
        let sub = Submission::queued(
            1,
            "t".to_owned(),
            sample_request(),
            ResourceLimits::default(),
        );
        let json = serde_json::to_value(&sub).unwrap();
        assert_eq!(json["source_code"], "print(42)");
        assert_eq!(json["status"], "queued");
    }
}
