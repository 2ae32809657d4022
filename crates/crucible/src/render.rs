//! Client-facing rendering of submission records.
//!
//! Retrieval supports projecting a named subset of fields and choosing
//! between text and base64 for the binary-safe fields (`source_code`,
//! `stdin`, `stdout`, `stderr`, `compile_output`). When a binary field
//! holds non-text bytes and base64 was not requested, rendering fails
//! with [`RenderError::Base64Required`] instead of corrupting the data.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::submission::Submission;

/// Every field name `fields` projection accepts
pub const FIELD_NAMES: &[&str] = &[
    "token",
    "language",
    "source_code",
    "stdin",
    "compiler_options",
    "command_line_arguments",
    "additional_files",
    "expected_output",
    "cpu_time_limit",
    "cpu_extra_time",
    "wall_time_limit",
    "memory_limit",
    "stack_limit",
    "max_processes_and_or_threads",
    "max_file_size",
    "number_of_runs",
    "redirect_stderr_to_stdout",
    "enable_network",
    "enable_per_process_and_thread_time_limit",
    "enable_per_process_and_thread_memory_limit",
    "callback_url",
    "status",
    "stdout",
    "stderr",
    "compile_output",
    "exit_code",
    "exit_signal",
    "time",
    "wall_time",
    "memory",
    "message",
    "created_at",
    "finished_at",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("field '{0}' contains non-text bytes; request base64 encoding")]
    Base64Required(String),

    #[error("unknown field '{0}'")]
    UnknownField(String),
}

/// How a record should be rendered
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Encode binary-safe fields as base64 instead of text
    pub base64: bool,

    /// Project only these fields; None renders everything
    pub fields: Option<Vec<String>>,
}

impl RenderOptions {
    /// Parse a comma-separated field list (e.g. `"token,status,stdout"`)
    pub fn with_fields(mut self, list: &str) -> Self {
        self.fields = Some(
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
        );
        self
    }

    pub fn base64(mut self, enabled: bool) -> Self {
        self.base64 = enabled;
        self
    }

    fn includes(&self, name: &str) -> bool {
        self.fields
            .as_ref()
            .is_none_or(|fields| fields.iter().any(|f| f == name))
    }
}

/// Render one record as JSON under the given options
pub fn render_submission(
    submission: &Submission,
    options: &RenderOptions,
) -> Result<Value, RenderError> {
    if let Some(ref fields) = options.fields {
        for field in fields {
            if !FIELD_NAMES.contains(&field.as_str()) {
                return Err(RenderError::UnknownField(field.clone()));
            }
        }
    }

    let mut map = Map::new();
    let mut put = |name: &str, value: Value| {
        if options.includes(name) {
            map.insert(name.to_owned(), value);
        }
    };

    put("token", json!(submission.token));
    put("language", json!(submission.language));
    put(
        "source_code",
        bytes_value("source_code", Some(&submission.source_code), options.base64)?,
    );
    put(
        "stdin",
        bytes_value("stdin", Some(&submission.stdin), options.base64)?,
    );
    put("compiler_options", json!(submission.compiler_options));
    put(
        "command_line_arguments",
        json!(submission.command_line_arguments),
    );
    put("additional_files", json!(submission.additional_files));
    put("expected_output", json!(submission.expected_output));

    let limits = &submission.limits;
    put("cpu_time_limit", json!(limits.cpu_time_limit));
    put("cpu_extra_time", json!(limits.cpu_extra_time));
    put("wall_time_limit", json!(limits.wall_time_limit));
    put("memory_limit", json!(limits.memory_limit));
    put("stack_limit", json!(limits.stack_limit));
    put("max_processes_and_or_threads", json!(limits.max_processes));
    put("max_file_size", json!(limits.max_file_size));
    put("number_of_runs", json!(limits.number_of_runs));

    let flags = &submission.flags;
    put(
        "redirect_stderr_to_stdout",
        json!(flags.redirect_stderr_to_stdout),
    );
    put("enable_network", json!(flags.enable_network));
    put(
        "enable_per_process_and_thread_time_limit",
        json!(flags.enable_per_process_and_thread_time_limit),
    );
    put(
        "enable_per_process_and_thread_memory_limit",
        json!(flags.enable_per_process_and_thread_memory_limit),
    );

    put("callback_url", json!(submission.callback_url));
    put("status", json!(submission.status));
    put(
        "stdout",
        bytes_value("stdout", submission.stdout.as_deref(), options.base64)?,
    );
    put(
        "stderr",
        bytes_value("stderr", submission.stderr.as_deref(), options.base64)?,
    );
    put(
        "compile_output",
        text_value("compile_output", submission.compile_output.as_deref(), options.base64),
    );
    put("exit_code", json!(submission.exit_code));
    put("exit_signal", json!(submission.exit_signal));
    put("time", json!(submission.time));
    put("wall_time", json!(submission.wall_time));
    put("memory", json!(submission.memory));
    put("message", json!(submission.message));
    put("created_at", json!(submission.created_at));
    put("finished_at", json!(submission.finished_at));

    Ok(Value::Object(map))
}

fn bytes_value(name: &str, bytes: Option<&[u8]>, base64: bool) -> Result<Value, RenderError> {
    let Some(bytes) = bytes else {
        return Ok(Value::Null);
    };
    if base64 {
        return Ok(Value::String(BASE64.encode(bytes)));
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => Ok(Value::String(text.to_owned())),
        Err(_) => Err(RenderError::Base64Required(name.to_owned())),
    }
}

fn text_value(_name: &str, text: Option<&str>, base64: bool) -> Value {
    match text {
        Some(text) if base64 => Value::String(BASE64.encode(text.as_bytes())),
        Some(text) => Value::String(text.to_owned()),
        None => Value::Null,
    }
}
