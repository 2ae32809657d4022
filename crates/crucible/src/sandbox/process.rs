//! Direct child-process sandbox backend.
//!
//! Runs a toolchain step as an OS child in its own process group, with
//! rlimits applied between fork and exec, bounded concurrent output
//! capture, and a supervisor loop that samples CPU and memory so limit
//! violations are classified even when the OS stops the process some
//! other way.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, instrument, warn};

use crate::sandbox::stats::ProcessStats;
use crate::sandbox::{RunRequest, SandboxBackend};
use crate::types::{ExecutionFlags, ResourceLimits, RunOutcome, Termination};

/// How often the supervisor samples CPU and memory usage
const SAMPLE_INTERVAL: Duration = Duration::from_millis(50);

/// Grace between graceful termination and SIGKILL
const KILL_GRACE: Duration = Duration::from_millis(250);

/// How long to wait for the output readers after the child has exited
const CAPTURE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Backend that executes steps as direct child processes.
///
/// Isolation envelope: own process group, rlimits (CPU, address space,
/// stack, file size, process count), an optional fresh network namespace,
/// and an optional uid/gid drop. The workspace is the child's working
/// directory and HOME; the engine's environment is not inherited.
#[derive(Debug, Clone, Default)]
pub struct DirectSandbox {
    uid: Option<u32>,
    gid: Option<u32>,
}

impl DirectSandbox {
    /// Backend running children as the engine's own principal
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend dropping children to the given principal.
    ///
    /// Requires the engine to start with enough privilege to call
    /// setuid/setgid; the spawn fails otherwise.
    pub fn with_identity(uid: Option<u32>, gid: Option<u32>) -> Self {
        Self { uid, gid }
    }
}

#[async_trait]
impl SandboxBackend for DirectSandbox {
    #[instrument(skip(self, request), fields(argv0 = request.argv.first().map(String::as_str)))]
    async fn run(&self, request: RunRequest<'_>) -> RunOutcome {
        run_supervised(self, request).await
    }
}

/// What the supervisor observed about how and why the child stopped
#[derive(Debug, Clone, Copy, Default)]
struct Observations {
    mem_exceeded: bool,
    cpu_exceeded: bool,
    wall_exceeded: bool,
    output_exceeded: bool,
    cancelled: bool,
    exit_code: Option<i32>,
    exit_signal: Option<i32>,
}

/// Map observations onto a termination.
///
/// First match wins, in the order memory > cpu > wall > output > signal >
/// exit code, so that when several conditions fire at once the most
/// specific resource fault is reported. SIGXCPU and SIGXFSZ are rlimit
/// backstops firing before the sampler notices, so they count as their
/// limit, not as a plain signal.
fn classify_termination(obs: &Observations) -> Termination {
    if obs.mem_exceeded {
        return Termination::MemoryLimitExceeded;
    }
    if obs.cpu_exceeded || obs.exit_signal == Some(libc::SIGXCPU) {
        return Termination::CpuLimitExceeded;
    }
    if obs.wall_exceeded {
        return Termination::WallLimitExceeded;
    }
    if obs.output_exceeded || obs.exit_signal == Some(libc::SIGXFSZ) {
        return Termination::OutputLimitExceeded;
    }
    if obs.cancelled {
        return Termination::Killed;
    }
    if let Some(signal) = obs.exit_signal {
        return Termination::Signalled(signal);
    }
    Termination::Exited(obs.exit_code.unwrap_or(-1))
}

async fn run_supervised(backend: &DirectSandbox, req: RunRequest<'_>) -> RunOutcome {
    let Some(program) = req.argv.first() else {
        return spawn_failed("empty command", 0.0);
    };

    let mut cmd = Command::new(program);
    cmd.args(&req.argv[1..])
        .current_dir(req.workspace)
        .env_clear()
        .env("PATH", req.path_var)
        .env("HOME", req.workspace)
        .envs(req.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    apply_isolation(&mut cmd, req.limits, req.flags, backend.uid, backend.gid);

    let started = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(program = %program, error = %e, "failed to spawn sandboxed child");
            return spawn_failed(&format!("failed to spawn '{program}': {e}"), 0.0);
        }
    };
    let pid = child.id();

    // Feed stdin in the background and close it; a child that never reads
    // must not block the supervisor.
    let stdin_task = child.stdin.take().map(|mut pipe| {
        let data = req.stdin.to_vec();
        tokio::spawn(async move {
            let _ = pipe.write_all(&data).await;
            let _ = pipe.shutdown().await;
        })
    });

    // Concurrent bounded capture; redirected stderr shares stdout's sink so
    // the merge preserves arrival order.
    let cap_bytes = req
        .limits
        .max_file_size
        .map(|kb| kb as usize * 1024)
        .unwrap_or(usize::MAX);
    let stdout_sink = BoundedSink::new(cap_bytes);
    let stderr_sink = if req.flags.redirect_stderr_to_stdout {
        stdout_sink.clone()
    } else {
        BoundedSink::new(cap_bytes)
    };

    let stdout_task = child
        .stdout
        .take()
        .map(|reader| tokio::spawn(drain(reader, stdout_sink.clone())));
    let stderr_task = child
        .stderr
        .take()
        .map(|reader| tokio::spawn(drain(reader, stderr_sink.clone())));

    let mut obs = Observations::default();
    let mut peak = ProcessStats::default();
    let cpu_budget = req.limits.cpu_budget();

    let wait_result = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Ok(status),
            Ok(None) => {}
            Err(e) => break Err(e),
        }

        if let Some(pid) = pid
            && let Some(stats) = ProcessStats::sample(pid)
        {
            peak.merge_peak(&stats);
        }

        if let Some(limit) = req.limits.memory_limit
            && peak.peak_vm_kb >= limit
        {
            obs.mem_exceeded = true;
            break terminate_group(&mut child, pid).await;
        }

        if let Some(limit) = req.limits.cpu_time_limit
            && peak.cpu_seconds > limit
        {
            // Let the grace budget elapse so the real usage is reported,
            // then stop the group ourselves.
            obs.cpu_exceeded = true;
            if peak.cpu_seconds >= cpu_budget.unwrap_or(limit) {
                break terminate_group(&mut child, pid).await;
            }
        }

        if let Some(limit) = req.limits.wall_time_limit
            && started.elapsed().as_secs_f64() >= limit
        {
            obs.wall_exceeded = true;
            break terminate_group(&mut child, pid).await;
        }

        tokio::select! {
            _ = tokio::time::sleep(SAMPLE_INTERVAL) => {}
            _ = req.cancel.cancelled() => {
                obs.cancelled = true;
                break terminate_group(&mut child, pid).await;
            }
        }
    };

    let wall_time = started.elapsed().as_secs_f64();

    if let Some(task) = stdin_task {
        task.abort();
    }

    let status = match wait_result {
        Ok(status) => status,
        Err(e) => {
            return spawn_failed(&format!("failed to wait for child: {e}"), wall_time);
        }
    };

    // Reap descendants that outlived the leader; they would otherwise hold
    // the pipe write ends open and keep running unsupervised.
    if let Some(pid) = pid {
        unsafe {
            libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
        }
    }

    // The group is dead, so the pipes see EOF; the timeout is a backstop
    // against anything still holding the write end open.
    for task in [stdout_task, stderr_task].into_iter().flatten() {
        let _ = tokio::time::timeout(CAPTURE_DRAIN_TIMEOUT, task).await;
    }

    let (stdout, stdout_overflow) = stdout_sink.take();
    let (stderr, stderr_overflow) = if req.flags.redirect_stderr_to_stdout {
        (Vec::new(), false)
    } else {
        stderr_sink.take()
    };
    obs.output_exceeded = stdout_overflow || stderr_overflow;

    {
        use std::os::unix::process::ExitStatusExt;
        obs.exit_code = status.code();
        obs.exit_signal = status.signal();
    }

    // RLIMIT_AS makes allocations fail just under the ceiling, so a crash
    // with the address space pinned at the limit is an out-of-memory
    // death even though no sample ever read `>= limit`.
    if !obs.mem_exceeded
        && let Some(limit) = req.limits.memory_limit
        && near_memory_limit(peak.peak_vm_kb, limit)
        && !matches!(obs.exit_code, Some(0))
    {
        obs.mem_exceeded = true;
    }

    let termination = classify_termination(&obs);
    let max_memory = reported_memory(&peak, req.limits.memory_limit, obs.mem_exceeded);

    debug!(
        ?termination,
        cpu_time = peak.cpu_seconds,
        wall_time,
        max_memory,
        exit_code = ?obs.exit_code,
        exit_signal = ?obs.exit_signal,
        "sandboxed step complete"
    );

    RunOutcome {
        termination,
        stdout,
        stderr,
        exit_code: obs.exit_code,
        exit_signal: obs.exit_signal,
        cpu_time: peak.cpu_seconds,
        wall_time,
        max_memory,
    }
}

/// Configure the child's isolation between fork and exec.
///
/// Only async-signal-safe calls are allowed in `pre_exec`: setpgid,
/// unshare, setrlimit, setgid/setuid all qualify.
fn apply_isolation(
    cmd: &mut Command,
    limits: &ResourceLimits,
    flags: ExecutionFlags,
    uid: Option<u32>,
    gid: Option<u32>,
) {
    let limits = limits.clone();
    unsafe {
        cmd.pre_exec(move || {
            // Own process group so the whole tree can be signalled at once
            if libc::setpgid(0, 0) != 0 {
                return Err(std::io::Error::last_os_error());
            }

            // Fresh network namespace = no routable interface. Needs
            // CAP_SYS_ADMIN; without privilege this is skipped and the
            // container backend is the strict enforcement path.
            if !flags.enable_network {
                let _ = libc::unshare(libc::CLONE_NEWNET);
            }

            apply_rlimits(&limits)?;

            if let Some(gid) = gid
                && libc::setgid(gid) != 0
            {
                return Err(std::io::Error::last_os_error());
            }
            if let Some(uid) = uid
                && libc::setuid(uid) != 0
            {
                return Err(std::io::Error::last_os_error());
            }

            Ok(())
        });
    }
}

fn apply_rlimits(limits: &ResourceLimits) -> std::io::Result<()> {
    use rlimit::Resource;

    if let Some(budget) = limits.cpu_budget() {
        // Soft limit raises SIGXCPU at the budget; hard limit kills one
        // second later if the signal is ignored.
        let secs = budget.ceil() as u64;
        rlimit::setrlimit(Resource::CPU, secs, secs + 1)?;
    }
    if let Some(kb) = limits.memory_limit {
        let bytes = kb * 1024;
        rlimit::setrlimit(Resource::AS, bytes, bytes)?;
    }
    if let Some(kb) = limits.stack_limit {
        let bytes = kb * 1024;
        rlimit::setrlimit(Resource::STACK, bytes, bytes)?;
    }
    if let Some(kb) = limits.max_file_size {
        let bytes = kb * 1024;
        rlimit::setrlimit(Resource::FSIZE, bytes, bytes)?;
    }
    if let Some(count) = limits.max_processes {
        rlimit::setrlimit(Resource::NPROC, count as u64, count as u64)?;
    }

    Ok(())
}

/// Gracefully stop the child's process group, then force-kill.
///
/// Sends SIGTERM to the group (negative pid, set via `setpgid` in
/// `pre_exec`), waits up to [`KILL_GRACE`], then SIGKILLs the group. A
/// final group SIGKILL also reaps descendants that outlived the leader.
async fn terminate_group(child: &mut Child, pid: Option<u32>) -> std::io::Result<std::process::ExitStatus> {
    let Some(pid) = pid else {
        // Already reaped; nothing to signal
        return child.wait().await;
    };
    let pgid = pid as libc::pid_t;

    unsafe {
        libc::kill(-pgid, libc::SIGTERM);
    }

    let deadline = Instant::now() + KILL_GRACE;
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait()? {
            unsafe {
                libc::kill(-pgid, libc::SIGKILL);
            }
            return Ok(status);
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    unsafe {
        libc::kill(-pgid, libc::SIGKILL);
    }
    child.wait().await
}

fn spawn_failed(reason: &str, wall_time: f64) -> RunOutcome {
    RunOutcome {
        termination: Termination::SpawnFailed(reason.to_owned()),
        stdout: Vec::new(),
        stderr: Vec::new(),
        exit_code: None,
        exit_signal: None,
        cpu_time: 0.0,
        wall_time,
        max_memory: 0,
    }
}

/// Whether an observed address-space peak is close enough to the limit to
/// count as having met it (the last allocation that would cross the
/// ceiling fails, so the peak lands a hair under)
fn near_memory_limit(peak_vm_kb: u64, limit_kb: u64) -> bool {
    peak_vm_kb >= limit_kb.saturating_sub(limit_kb / 20)
}

/// Peak memory to report: the resident peak normally; when the limit
/// fired, the clamped address-space peak so the record reflects the limit
/// that was hit rather than whatever RSS happened to be resident.
fn reported_memory(peak: &ProcessStats, memory_limit: Option<u64>, mem_exceeded: bool) -> u64 {
    if mem_exceeded && let Some(limit) = memory_limit {
        peak.peak_rss_kb.max(peak.peak_vm_kb.min(limit))
    } else {
        peak.peak_rss_kb
    }
}

/// Shared output buffer with a byte cap; overflow is recorded, not stored
#[derive(Debug, Clone)]
struct BoundedSink {
    buf: Arc<std::sync::Mutex<Vec<u8>>>,
    overflowed: Arc<AtomicBool>,
    cap: usize,
}

impl BoundedSink {
    fn new(cap: usize) -> Self {
        Self {
            buf: Arc::new(std::sync::Mutex::new(Vec::new())),
            overflowed: Arc::new(AtomicBool::new(false)),
            cap,
        }
    }

    fn push(&self, data: &[u8]) {
        let mut buf = self.buf.lock().unwrap_or_else(|e| e.into_inner());
        if buf.len() < self.cap {
            let take = (self.cap - buf.len()).min(data.len());
            buf.extend_from_slice(&data[..take]);
            if take < data.len() {
                self.overflowed.store(true, Ordering::Relaxed);
            }
        } else if !data.is_empty() {
            self.overflowed.store(true, Ordering::Relaxed);
        }
    }

    fn take(&self) -> (Vec<u8>, bool) {
        let mut buf = self.buf.lock().unwrap_or_else(|e| e.into_inner());
        (std::mem::take(&mut *buf), self.overflowed.load(Ordering::Relaxed))
    }
}

async fn drain<R: tokio::io::AsyncRead + Unpin>(mut reader: R, sink: BoundedSink) {
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => sink.push(&buf[..n]),
        }
    }
}
