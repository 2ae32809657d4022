//! Per-submission execution: stage, compile, run, classify, persist.
//!
//! One [`Executor`] is shared by all workers; [`Executor::execute`] drives
//! a single submission from `running` to a terminal status. Every await
//! participates in cancellation, and the workspace is removed on every
//! exit path.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use crate::callback::CallbackEmitter;
use crate::config::{CommandContext, EngineConfig, Language};
use crate::events::StatusBroadcast;
use crate::sandbox::{INPUT_FILE_NAME, RunRequest, SandboxBackend, Workspace};
use crate::store::{SubmissionStore, SubmissionUpdate, TerminalUpdate};
use crate::submission::{Submission, SubmissionId, SubmissionStatus};
use crate::types::{ExecutionFlags, ResourceLimits, RunOutcome, Termination};

/// Upper bound on any single store operation; past it the engine treats
/// the store as failed
const STORE_OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Compile-phase limit profile; conservative, overridable per language
fn default_compile_limits() -> ResourceLimits {
    ResourceLimits {
        cpu_time_limit: Some(30.0),
        cpu_extra_time: Some(0.0),
        wall_time_limit: Some(60.0),
        memory_limit: Some(524_288), // 512 MB
        stack_limit: Some(131_072),
        max_processes: Some(16),
        max_file_size: Some(65_536), // compilers write big intermediates
        number_of_runs: Some(1),
    }
}

#[derive(Clone)]
pub struct Executor {
    config: Arc<EngineConfig>,
    store: Arc<dyn SubmissionStore>,
    backend: Arc<dyn SandboxBackend>,
    events: StatusBroadcast,
    callbacks: CallbackEmitter,
}

impl Executor {
    pub fn new(
        config: Arc<EngineConfig>,
        store: Arc<dyn SubmissionStore>,
        backend: Arc<dyn SandboxBackend>,
        events: StatusBroadcast,
        callbacks: CallbackEmitter,
    ) -> Self {
        Self {
            config,
            store,
            backend,
            events,
            callbacks,
        }
    }

    /// Drive one submission to a terminal status.
    ///
    /// Returns the terminal status for the caller's bookkeeping; `None`
    /// when the submission vanished or the store failed before any
    /// transition could be recorded.
    #[instrument(skip(self, cancel))]
    pub async fn execute(
        &self,
        id: SubmissionId,
        cancel: CancellationToken,
    ) -> Option<SubmissionStatus> {
        // The dispatcher admits a job before the intake's insert is
        // guaranteed visible, so tolerate a brief read-after-write gap
        let mut submission = None;
        for attempt in 0..5 {
            match self.store_op(self.store.get(id)).await {
                Ok(Some(found)) => {
                    submission = Some(found);
                    break;
                }
                Ok(None) if attempt < 4 => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                Ok(None) => {}
                Err(message) => {
                    error!(id, message, "store failed before execution");
                    return None;
                }
            }
        }
        let Some(submission) = submission else {
            warn!(id, "dispatched submission not found in store");
            return None;
        };

        if submission.is_terminal() {
            debug!(id, "submission already terminal; nothing to do");
            return Some(submission.status);
        }

        let terminal = self.run_to_terminal(&submission, &cancel).await;
        self.finish(&submission, terminal).await
    }

    /// Force a submission into `internal_error`, e.g. after a worker panic
    /// or on restart reconciliation. A no-op for terminal submissions.
    pub async fn fail(&self, id: SubmissionId, message: &str) -> Option<SubmissionStatus> {
        let submission = match self.store_op(self.store.get(id)).await {
            Ok(Some(submission)) => submission,
            _ => return None,
        };
        if submission.is_terminal() {
            return Some(submission.status);
        }
        self.finish(
            &submission,
            TerminalUpdate::status_only(SubmissionStatus::InternalError, message),
        )
        .await
    }

    /// Everything between `running` and the terminal decision
    async fn run_to_terminal(
        &self,
        submission: &Submission,
        cancel: &CancellationToken,
    ) -> TerminalUpdate {
        // Resolve the toolchain before any state transition so an unknown
        // language fails cleanly
        let language = match self.config.get_language(&submission.language) {
            Ok(language) => language.clone(),
            Err(e) => {
                return TerminalUpdate::status_only(SubmissionStatus::InternalError, e.to_string());
            }
        };

        let limits = self
            .config
            .effective_limits(&language, Some(&submission.limits));

        let marked = self
            .store_op(self.store.update(
                submission.id,
                SubmissionUpdate {
                    status: Some(SubmissionStatus::Running),
                    limits: Some(limits.clone()),
                },
            ))
            .await;
        if let Err(message) = marked {
            return TerminalUpdate::status_only(SubmissionStatus::InternalError, message);
        }
        self.events
            .emit(submission.id, &submission.token, SubmissionStatus::Running);

        let mut workspace = match self.prepare_workspace(submission, &language).await {
            Ok(workspace) => workspace,
            Err(message) => {
                return TerminalUpdate::status_only(SubmissionStatus::InternalError, message);
            }
        };

        let terminal = self
            .compile_and_run(submission, &language, &limits, &workspace, cancel)
            .await;

        if let Err(e) = workspace.cleanup().await {
            warn!(id = submission.id, error = %e, "workspace cleanup failed");
        }

        terminal
    }

    /// Stage source, stdin, and additional files into a fresh workspace
    async fn prepare_workspace(
        &self,
        submission: &Submission,
        language: &Language,
    ) -> Result<Workspace, String> {
        let workspace = Workspace::create(&self.config.workspace_root(), submission.id)
            .await
            .map_err(|e| format!("workspace creation failed: {e}"))?;

        let source_name = language.source_name(&submission.source_code);
        workspace
            .write_file(&source_name, &submission.source_code)
            .await
            .map_err(|e| format!("failed to stage source: {e}"))?;

        workspace
            .write_file(INPUT_FILE_NAME, &submission.stdin)
            .await
            .map_err(|e| format!("failed to stage stdin: {e}"))?;

        if let Some(ref archive) = submission.additional_files {
            workspace
                .expand_archive(archive)
                .await
                .map_err(|e| format!("failed to expand additional files: {e}"))?;
        }

        Ok(workspace)
    }

    async fn compile_and_run(
        &self,
        submission: &Submission,
        language: &Language,
        limits: &ResourceLimits,
        workspace: &Workspace,
        cancel: &CancellationToken,
    ) -> TerminalUpdate {
        if cancel.is_cancelled() {
            return cancelled_update();
        }

        let classname = language.class_name(&submission.source_code);
        let source_name = language.source_name(&submission.source_code);
        let compiler_options = split_words(submission.compiler_options.as_deref());
        let args = split_words(submission.command_line_arguments.as_deref());

        let binary = language
            .compile
            .as_ref()
            .map(|c| c.output_name.clone())
            .unwrap_or_default();
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let option_refs: Vec<&str> = compiler_options.iter().map(String::as_str).collect();
        let ctx = CommandContext {
            source: &source_name,
            binary: &binary,
            classname: classname.as_deref().unwrap_or(""),
            args: &arg_refs,
            compiler_options: &option_refs,
        };

        // Compile phase
        if let Some(compile) = language.compile.as_ref() {
            let outcome = self
                .run_compile(language, compile, limits, &ctx, workspace, cancel)
                .await;

            if cancel.is_cancelled() || outcome.termination == Termination::Killed {
                return cancelled_update();
            }
            if let Termination::SpawnFailed(ref reason) = outcome.termination {
                return TerminalUpdate::status_only(
                    SubmissionStatus::InternalError,
                    format!("failed to start compiler: {reason}"),
                );
            }
            if !outcome.is_success() {
                return compilation_error(&outcome);
            }

            // The run step depends on these; a compiler that exits 0
            // without producing them is an engine-side toolchain problem
            for artifact in compile.artifact_names(&ctx) {
                match workspace.file_exists(&artifact).await {
                    Ok(true) => {}
                    Ok(false) => {
                        return TerminalUpdate::status_only(
                            SubmissionStatus::InternalError,
                            format!("compile step produced no '{artifact}'"),
                        );
                    }
                    Err(e) => {
                        return TerminalUpdate::status_only(
                            SubmissionStatus::InternalError,
                            format!("failed to check compile artifact: {e}"),
                        );
                    }
                }
            }
        }

        // Run phase, `number_of_runs` times; outputs come from the last
        // run, measurements are the max across runs
        let argv = Language::expand_command(&language.run.command, &ctx);
        let mut flags = submission.flags;
        flags.enable_network = flags.enable_network || self.config.enable_network_default;

        let mut last: Option<RunOutcome> = None;
        let mut max_cpu = 0.0f64;
        let mut max_wall = 0.0f64;
        let mut max_memory = 0u64;

        for run_index in 1..=limits.runs() {
            if cancel.is_cancelled() {
                return cancelled_update();
            }

            debug!(id = submission.id, run_index, "starting run step");
            let outcome = self
                .backend
                .run(RunRequest {
                    argv: &argv,
                    workspace: workspace.path(),
                    stdin: &submission.stdin,
                    env: &language.run.env,
                    path_var: &language.run.path,
                    limits,
                    flags,
                    cancel: cancel.clone(),
                })
                .await;

            max_cpu = max_cpu.max(outcome.cpu_time);
            max_wall = max_wall.max(outcome.wall_time);
            max_memory = max_memory.max(outcome.max_memory);

            let stop = outcome.termination.is_resource_fault()
                || outcome.termination.is_engine_fault()
                || outcome.termination == Termination::Killed;
            last = Some(outcome);
            if stop {
                break;
            }
        }

        let Some(outcome) = last else {
            // runs() is always >= 1, so this cannot happen
            return TerminalUpdate::status_only(
                SubmissionStatus::InternalError,
                "no run was executed",
            );
        };

        if cancel.is_cancelled() || outcome.termination == Termination::Killed {
            return cancelled_update();
        }

        self.classify_run(submission, outcome, max_cpu, max_wall, max_memory)
    }

    async fn run_compile(
        &self,
        language: &Language,
        compile: &crate::config::CompileStep,
        user_limits: &ResourceLimits,
        ctx: &CommandContext<'_>,
        workspace: &Workspace,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        // Compile profile: fixed conservative base, never less memory than
        // the user run gets, per-language overrides on top
        let mut limits = default_compile_limits();
        if let (Some(base), Some(user)) = (limits.memory_limit, user_limits.memory_limit) {
            limits.memory_limit = Some(base.max(user));
        }
        if let Some(ref overrides) = compile.limits {
            limits = limits.with_overrides(overrides);
        }

        let argv = Language::expand_command(&compile.command, ctx);
        let flags = ExecutionFlags {
            enable_network: language.requires_network_for_build,
            ..ExecutionFlags::default()
        };

        self.backend
            .run(RunRequest {
                argv: &argv,
                workspace: workspace.path(),
                stdin: b"",
                env: &compile.env,
                path_var: &language.run.path,
                limits: &limits,
                flags,
                cancel: cancel.clone(),
            })
            .await
    }

    /// The spec's termination → status table
    fn classify_run(
        &self,
        submission: &Submission,
        outcome: RunOutcome,
        max_cpu: f64,
        max_wall: f64,
        max_memory: u64,
    ) -> TerminalUpdate {
        let (status, message) = match outcome.termination {
            Termination::CpuLimitExceeded => (
                SubmissionStatus::TimeLimitExceeded,
                Some("CPU time limit exceeded".to_owned()),
            ),
            Termination::WallLimitExceeded => (
                SubmissionStatus::TimeLimitExceeded,
                Some("Wall time limit exceeded".to_owned()),
            ),
            Termination::MemoryLimitExceeded => (SubmissionStatus::MemoryLimitExceeded, None),
            Termination::OutputLimitExceeded => (
                SubmissionStatus::RuntimeError,
                Some("Output size limit exceeded".to_owned()),
            ),
            Termination::Signalled(_) => (SubmissionStatus::RuntimeError, None),
            Termination::Exited(0) => {
                if let Some(expected) = submission.expected_output.as_deref() {
                    if output_matches(&outcome.stdout, expected) {
                        (SubmissionStatus::Accepted, None)
                    } else {
                        (SubmissionStatus::WrongAnswer, None)
                    }
                } else {
                    (SubmissionStatus::Accepted, None)
                }
            }
            Termination::Exited(_) => (SubmissionStatus::RuntimeError, None),
            Termination::SpawnFailed(ref reason) => (
                SubmissionStatus::InternalError,
                Some(format!("failed to start program: {reason}")),
            ),
            Termination::Killed => (
                SubmissionStatus::Cancelled,
                Some("Execution cancelled".to_owned()),
            ),
        };

        TerminalUpdate {
            status,
            stdout: Some(outcome.stdout),
            stderr: Some(outcome.stderr),
            compile_output: None,
            exit_code: outcome.exit_code,
            exit_signal: outcome.exit_signal,
            time: Some(max_cpu),
            wall_time: Some(max_wall),
            memory: Some(max_memory),
            message,
        }
    }

    /// Persist the terminal record, publish the transition, fire the webhook
    async fn finish(
        &self,
        submission: &Submission,
        terminal: TerminalUpdate,
    ) -> Option<SubmissionStatus> {
        let status = terminal.status;
        let record = match self
            .store_op(self.store.mark_terminal(submission.id, terminal))
            .await
        {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(id = submission.id, "submission vanished before terminal write");
                return None;
            }
            Err(message) => {
                error!(id = submission.id, message, "failed to persist terminal record");
                return None;
            }
        };

        self.events.emit(record.id, &record.token, record.status);

        if record.callback_url.is_some() {
            let callbacks = self.callbacks.clone();
            let record = record.clone();
            tokio::spawn(async move {
                callbacks.deliver(&record).await;
            });
        }

        Some(status)
    }

    /// Run a store operation under the engine's hard timeout
    async fn store_op<T>(
        &self,
        op: impl Future<Output = Result<T, crate::store::StoreError>>,
    ) -> Result<T, String> {
        match tokio::time::timeout(STORE_OP_TIMEOUT, op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(format!("store error: {e}")),
            Err(_) => Err("store operation timed out".to_owned()),
        }
    }
}

fn cancelled_update() -> TerminalUpdate {
    TerminalUpdate::status_only(SubmissionStatus::Cancelled, "Execution cancelled")
}

fn compilation_error(outcome: &RunOutcome) -> TerminalUpdate {
    let mut output = String::from_utf8_lossy(&outcome.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&outcome.stderr);
    if !output.is_empty() && !stderr.is_empty() {
        output.push('\n');
    }
    output.push_str(&stderr);

    if output.is_empty() {
        output = match outcome.termination {
            Termination::CpuLimitExceeded | Termination::WallLimitExceeded => {
                "compilation exceeded the compile-phase time limit".to_owned()
            }
            Termination::MemoryLimitExceeded => {
                "compilation exceeded the compile-phase memory limit".to_owned()
            }
            _ => "compilation failed".to_owned(),
        };
    }

    TerminalUpdate {
        status: SubmissionStatus::CompilationError,
        stdout: None,
        stderr: None,
        compile_output: Some(output),
        exit_code: outcome.exit_code,
        exit_signal: outcome.exit_signal,
        time: None,
        wall_time: None,
        memory: None,
        message: None,
    }
}

/// Whitespace-split a free-form option string into argv words
fn split_words(value: Option<&str>) -> Vec<String> {
    value
        .map(|s| s.split_whitespace().map(String::from).collect())
        .unwrap_or_default()
}

/// Trailing-newline-insensitive comparison for expected output
fn output_matches(stdout: &[u8], expected: &str) -> bool {
    let actual = String::from_utf8_lossy(stdout);
    actual.trim_end_matches('\n') == expected.trim_end_matches('\n')
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::config::{FileExtension, RunStep};
    use crate::sandbox::DirectSandbox;
    use crate::store::MemoryStore;
    use crate::submission::SubmissionRequest;

    // A toolchain that needs nothing but a POSIX shell, so the full
    // pipeline is testable without language runtimes
    fn shell_language() -> Language {
        Language {
            name: "Shell".to_owned(),
            extension: FileExtension::new("sh").unwrap(),
            compile: None,
            run: RunStep {
                command: vec!["/bin/sh".to_owned(), "{source}".to_owned(), "{args}".to_owned()],
                env: HashMap::new(),
                path: "/usr/local/bin:/usr/bin:/bin".to_owned(),
                limits: None,
            },
            derive_class_name: false,
            requires_network_for_build: false,
        }
    }

    fn shell_compiled_language() -> Language {
        Language {
            name: "Compiled shell".to_owned(),
            extension: FileExtension::new("sh").unwrap(),
            compile: Some(crate::config::CompileStep {
                command: vec![
                    "/bin/cp".to_owned(),
                    "{source}".to_owned(),
                    "{output}".to_owned(),
                ],
                source_name: "main.sh".to_owned(),
                output_name: "program".to_owned(),
                artifacts: Vec::new(),
                env: HashMap::new(),
                limits: None,
            }),
            run: RunStep {
                command: vec!["/bin/sh".to_owned(), "{binary}".to_owned()],
                env: HashMap::new(),
                path: "/usr/local/bin:/usr/bin:/bin".to_owned(),
                limits: None,
            },
            derive_class_name: false,
            requires_network_for_build: false,
        }
    }

    fn broken_compiler_language() -> Language {
        let mut lang = shell_compiled_language();
        lang.compile = Some(crate::config::CompileStep {
            command: vec![
                "/bin/sh".to_owned(),
                "-c".to_owned(),
                "echo 'syntax error near line 1' >&2; exit 1".to_owned(),
            ],
            source_name: "main.sh".to_owned(),
            output_name: "program".to_owned(),
            artifacts: Vec::new(),
            env: HashMap::new(),
            limits: None,
        });
        lang
    }

    struct Harness {
        executor: Executor,
        store: Arc<MemoryStore>,
        config: Arc<EngineConfig>,
        _workspace_root: tempfile::TempDir,
    }

    fn harness(languages: Vec<(&str, Language)>) -> Harness {
        let workspace_root = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::empty();
        config.workspace_root = Some(workspace_root.path().to_path_buf());
        // Keep process/memory rlimits off in tests; NPROC counts the whole
        // invoking user and would make results depend on the host
        config.default_limits.max_processes = None;
        config.default_limits.memory_limit = None;
        config.default_limits.stack_limit = None;
        for (key, lang) in languages {
            config.languages.insert(key.to_owned(), lang);
        }
        let config = Arc::new(config);
        let store = Arc::new(MemoryStore::new());

        let executor = Executor::new(
            config.clone(),
            store.clone(),
            Arc::new(DirectSandbox::new()),
            StatusBroadcast::new(),
            CallbackEmitter::new(1000),
        );

        Harness {
            executor,
            store,
            config,
            _workspace_root: workspace_root,
        }
    }

    async fn submit(harness: &Harness, id: SubmissionId, request: SubmissionRequest) {
        let limits = request.limits.clone();
        let submission = Submission::queued(id, format!("tok-{id}"), request, limits);
        harness.store.insert(submission).await.unwrap();
    }

    fn request(language: &str, source: &str) -> SubmissionRequest {
        SubmissionRequest {
            language: language.to_owned(),
            source_code: source.as_bytes().to_vec(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn accepted_run_with_stdout() {
        let h = harness(vec![("shell", shell_language())]);
        submit(&h, 1, request("shell", "echo Hello, World!")).await;

        let status = h.executor.execute(1, CancellationToken::new()).await;
        assert_eq!(status, Some(SubmissionStatus::Accepted));

        let record = h.store.get(1).await.unwrap().unwrap();
        assert_eq!(record.status, SubmissionStatus::Accepted);
        assert_eq!(record.stdout.as_deref(), Some(b"Hello, World!\n".as_slice()));
        assert_eq!(record.exit_code, Some(0));
        assert!(record.finished_at.is_some());
        // Resolved limits were persisted
        assert!(record.limits.cpu_time_limit.is_some());
    }

    #[tokio::test]
    async fn stdin_reaches_the_program() {
        let h = harness(vec![("shell", shell_language())]);
        let mut req = request("shell", "read name; echo \"$name!\"");
        req.stdin = b"Alice\n".to_vec();
        submit(&h, 1, req).await;

        h.executor.execute(1, CancellationToken::new()).await;

        let record = h.store.get(1).await.unwrap().unwrap();
        assert_eq!(record.status, SubmissionStatus::Accepted);
        assert_eq!(record.stdout.as_deref(), Some(b"Alice!\n".as_slice()));
    }

    #[tokio::test]
    async fn command_line_arguments_are_spliced() {
        let h = harness(vec![("shell", shell_language())]);
        let mut req = request("shell", "echo \"$1-$2\"");
        req.command_line_arguments = Some("foo bar".to_owned());
        submit(&h, 1, req).await;

        h.executor.execute(1, CancellationToken::new()).await;

        let record = h.store.get(1).await.unwrap().unwrap();
        assert_eq!(record.stdout.as_deref(), Some(b"foo-bar\n".as_slice()));
    }

    #[tokio::test]
    async fn nonzero_exit_is_runtime_error() {
        let h = harness(vec![("shell", shell_language())]);
        submit(&h, 1, request("shell", "exit 3")).await;

        let status = h.executor.execute(1, CancellationToken::new()).await;
        assert_eq!(status, Some(SubmissionStatus::RuntimeError));

        let record = h.store.get(1).await.unwrap().unwrap();
        assert_eq!(record.exit_code, Some(3));
    }

    #[tokio::test]
    async fn signal_is_runtime_error_with_exit_signal() {
        let h = harness(vec![("shell", shell_language())]);
        submit(&h, 1, request("shell", "kill -9 $$")).await;

        let status = h.executor.execute(1, CancellationToken::new()).await;
        assert_eq!(status, Some(SubmissionStatus::RuntimeError));

        let record = h.store.get(1).await.unwrap().unwrap();
        assert_eq!(record.exit_signal, Some(9));
    }

    #[tokio::test]
    async fn wall_limit_is_time_limit_exceeded() {
        let h = harness(vec![("shell", shell_language())]);
        let mut req = request("shell", "sleep 30");
        req.limits = ResourceLimits::none().with_wall_time_limit(0.3);
        submit(&h, 1, req).await;

        let status = h.executor.execute(1, CancellationToken::new()).await;
        assert_eq!(status, Some(SubmissionStatus::TimeLimitExceeded));

        let record = h.store.get(1).await.unwrap().unwrap();
        assert_eq!(record.message.as_deref(), Some("Wall time limit exceeded"));
    }

    #[tokio::test]
    async fn compile_then_run() {
        let h = harness(vec![("cshell", shell_compiled_language())]);
        submit(&h, 1, request("cshell", "echo compiled and ran")).await;

        let status = h.executor.execute(1, CancellationToken::new()).await;
        assert_eq!(status, Some(SubmissionStatus::Accepted));

        let record = h.store.get(1).await.unwrap().unwrap();
        assert_eq!(record.stdout.as_deref(), Some(b"compiled and ran\n".as_slice()));
    }

    #[tokio::test]
    async fn compile_failure_is_compilation_error() {
        let h = harness(vec![("broken", broken_compiler_language())]);
        submit(&h, 1, request("broken", "whatever")).await;

        let status = h.executor.execute(1, CancellationToken::new()).await;
        assert_eq!(status, Some(SubmissionStatus::CompilationError));

        let record = h.store.get(1).await.unwrap().unwrap();
        let compile_output = record.compile_output.unwrap();
        assert!(compile_output.contains("syntax error"));
        // No run ever happened
        assert!(record.stdout.is_none());
        assert!(record.stderr.is_none());
    }

    #[tokio::test]
    async fn unknown_language_is_internal_error() {
        let h = harness(vec![]);
        submit(&h, 1, request("cobol", "DISPLAY 'HI'")).await;

        let status = h.executor.execute(1, CancellationToken::new()).await;
        assert_eq!(status, Some(SubmissionStatus::InternalError));

        let record = h.store.get(1).await.unwrap().unwrap();
        assert!(record.message.unwrap().contains("cobol"));
    }

    #[tokio::test]
    async fn missing_toolchain_is_internal_error() {
        let mut lang = shell_language();
        lang.run.command = vec!["/no/such/interpreter".to_owned(), "{source}".to_owned()];
        let h = harness(vec![("ghost", lang)]);
        submit(&h, 1, request("ghost", "echo hi")).await;

        let status = h.executor.execute(1, CancellationToken::new()).await;
        assert_eq!(status, Some(SubmissionStatus::InternalError));
    }

    #[tokio::test]
    async fn cancellation_before_start_is_cancelled() {
        let h = harness(vec![("shell", shell_language())]);
        submit(&h, 1, request("shell", "echo hi")).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let status = h.executor.execute(1, cancel).await;
        assert_eq!(status, Some(SubmissionStatus::Cancelled));

        let record = h.store.get(1).await.unwrap().unwrap();
        assert_eq!(record.message.as_deref(), Some("Execution cancelled"));
    }

    #[tokio::test]
    async fn cancellation_mid_run_is_cancelled() {
        let h = harness(vec![("shell", shell_language())]);
        submit(&h, 1, request("shell", "sleep 30")).await;

        let cancel = CancellationToken::new();
        let trip = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trip.cancel();
        });

        let status = h.executor.execute(1, cancel).await;
        assert_eq!(status, Some(SubmissionStatus::Cancelled));
    }

    #[tokio::test]
    async fn number_of_runs_keeps_last_output_and_max_metrics() {
        let h = harness(vec![("shell", shell_language())]);
        // Appends a line to a scratch file per run; the last run sees three
        let mut req = request(
            "shell",
            "echo run >> counter; wc -l < counter | tr -d ' '",
        );
        req.limits = ResourceLimits::none().with_number_of_runs(3);
        submit(&h, 1, req).await;

        let status = h.executor.execute(1, CancellationToken::new()).await;
        assert_eq!(status, Some(SubmissionStatus::Accepted));

        let record = h.store.get(1).await.unwrap().unwrap();
        assert_eq!(record.stdout.as_deref(), Some(b"3\n".as_slice()));
    }

    #[tokio::test]
    async fn expected_output_match_is_accepted() {
        let h = harness(vec![("shell", shell_language())]);
        let mut req = request("shell", "echo 42");
        req.expected_output = Some("42".to_owned());
        submit(&h, 1, req).await;

        let status = h.executor.execute(1, CancellationToken::new()).await;
        assert_eq!(status, Some(SubmissionStatus::Accepted));
    }

    #[tokio::test]
    async fn expected_output_mismatch_is_wrong_answer() {
        let h = harness(vec![("shell", shell_language())]);
        let mut req = request("shell", "echo 41");
        req.expected_output = Some("42".to_owned());
        submit(&h, 1, req).await;

        let status = h.executor.execute(1, CancellationToken::new()).await;
        assert_eq!(status, Some(SubmissionStatus::WrongAnswer));
    }

    #[tokio::test]
    async fn workspace_is_removed_after_terminal() {
        let h = harness(vec![("shell", shell_language())]);
        submit(&h, 1, request("shell", "echo done")).await;
        h.executor.execute(1, CancellationToken::new()).await;

        let root = h.config.workspace_root();
        let leftovers: Vec<_> = std::fs::read_dir(&root)
            .map(|entries| entries.flatten().collect())
            .unwrap_or_default();
        assert!(leftovers.is_empty(), "workspace not cleaned: {leftovers:?}");
    }

    #[tokio::test]
    async fn workspace_is_removed_after_failure() {
        let h = harness(vec![("broken", broken_compiler_language())]);
        submit(&h, 1, request("broken", "x")).await;
        h.executor.execute(1, CancellationToken::new()).await;

        let root = h.config.workspace_root();
        let leftovers: Vec<_> = std::fs::read_dir(&root)
            .map(|entries| entries.flatten().collect())
            .unwrap_or_default();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn additional_files_are_available() {
        use base64::Engine as _;
        use std::io::Write as _;

        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default();
            writer.start_file("data.txt", options).unwrap();
            writer.write_all(b"from the archive").unwrap();
            writer.finish().unwrap();
        }
        let archive = base64::engine::general_purpose::STANDARD.encode(buf.into_inner());

        let h = harness(vec![("shell", shell_language())]);
        let mut req = request("shell", "cat data.txt");
        req.additional_files = Some(archive);
        submit(&h, 1, req).await;

        let status = h.executor.execute(1, CancellationToken::new()).await;
        assert_eq!(status, Some(SubmissionStatus::Accepted));

        let record = h.store.get(1).await.unwrap().unwrap();
        assert_eq!(record.stdout.as_deref(), Some(b"from the archive".as_slice()));
    }

    // pure helpers

    #[test]
    fn split_words_handles_none_and_spaces() {
        assert!(split_words(None).is_empty());
        assert_eq!(split_words(Some("-O2  -Wall")), vec!["-O2", "-Wall"]);
        assert!(split_words(Some("   ")).is_empty());
    }

    #[test]
    fn output_matches_ignores_trailing_newline() {
        assert!(output_matches(b"42\n", "42"));
        assert!(output_matches(b"42", "42\n"));
        assert!(output_matches(b"a\nb\n", "a\nb"));
        assert!(!output_matches(b"42", "43"));
        assert!(!output_matches(b"42\nextra", "42"));
    }

    #[test]
    fn compile_limits_never_below_user_memory() {
        let user = ResourceLimits::none().with_memory_limit(1_048_576);
        let mut limits = default_compile_limits();
        if let (Some(base), Some(mem)) = (limits.memory_limit, user.memory_limit) {
            limits.memory_limit = Some(base.max(mem));
        }
        assert_eq!(limits.memory_limit, Some(1_048_576));
    }
}
