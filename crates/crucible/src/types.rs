use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU time limit in seconds
    #[serde(default)]
    pub cpu_time_limit: Option<f64>,

    /// Extra CPU time before the process is killed (grace period) in seconds
    #[serde(default)]
    pub cpu_extra_time: Option<f64>,

    /// Wall clock time limit in seconds
    #[serde(default)]
    pub wall_time_limit: Option<f64>,

    /// Memory limit in kilobytes
    #[serde(default)]
    pub memory_limit: Option<u64>,

    /// Stack size limit in kilobytes
    #[serde(default)]
    pub stack_limit: Option<u64>,

    /// Maximum number of processes and/or threads
    #[serde(default)]
    pub max_processes: Option<u32>,

    /// Maximum size of any created file, and of captured output, in kilobytes
    #[serde(default)]
    pub max_file_size: Option<u64>,

    /// How many times the run step is executed (results come from the last run)
    #[serde(default)]
    pub number_of_runs: Option<u32>,
}

impl ResourceLimits {
    /// 1 kilobyte in kilobytes
    pub const KB: u64 = 1;
    /// 1 megabyte in kilobytes
    pub const MB: u64 = 1024;
    /// 1 gigabyte in kilobytes
    pub const GB: u64 = 1024 * 1024;

    /// Create new resource limits with all fields set to None
    pub fn none() -> Self {
        Self {
            cpu_time_limit: None,
            cpu_extra_time: None,
            wall_time_limit: None,
            memory_limit: None,
            stack_limit: None,
            max_processes: None,
            max_file_size: None,
            number_of_runs: None,
        }
    }

    /// Set the CPU time limit in seconds
    pub fn with_cpu_time_limit(mut self, seconds: f64) -> Self {
        self.cpu_time_limit = Some(seconds);
        self
    }

    /// Set the CPU grace period in seconds
    pub fn with_cpu_extra_time(mut self, seconds: f64) -> Self {
        self.cpu_extra_time = Some(seconds);
        self
    }

    /// Set the wall clock time limit in seconds
    pub fn with_wall_time_limit(mut self, seconds: f64) -> Self {
        self.wall_time_limit = Some(seconds);
        self
    }

    /// Set the memory limit in kilobytes
    pub fn with_memory_limit(mut self, kb: u64) -> Self {
        self.memory_limit = Some(kb);
        self
    }

    /// Set the stack size limit in kilobytes
    pub fn with_stack_limit(mut self, kb: u64) -> Self {
        self.stack_limit = Some(kb);
        self
    }

    /// Set the maximum number of processes
    pub fn with_max_processes(mut self, count: u32) -> Self {
        self.max_processes = Some(count);
        self
    }

    /// Set the maximum created-file and output size in kilobytes
    pub fn with_max_file_size(mut self, kb: u64) -> Self {
        self.max_file_size = Some(kb);
        self
    }

    /// Set how many times the run step is executed
    pub fn with_number_of_runs(mut self, runs: u32) -> Self {
        self.number_of_runs = Some(runs);
        self
    }

    /// Apply overrides from another ResourceLimits, preferring values from `overrides`
    ///
    /// Returns a new ResourceLimits with values from `overrides` taking precedence
    /// over values from `self` when both are present.
    pub fn with_overrides(&self, overrides: &ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            cpu_time_limit: overrides.cpu_time_limit.or(self.cpu_time_limit),
            cpu_extra_time: overrides.cpu_extra_time.or(self.cpu_extra_time),
            wall_time_limit: overrides.wall_time_limit.or(self.wall_time_limit),
            memory_limit: overrides.memory_limit.or(self.memory_limit),
            stack_limit: overrides.stack_limit.or(self.stack_limit),
            max_processes: overrides.max_processes.or(self.max_processes),
            max_file_size: overrides.max_file_size.or(self.max_file_size),
            number_of_runs: overrides.number_of_runs.or(self.number_of_runs),
        }
    }

    /// The effective number of runs, always at least 1
    pub fn runs(&self) -> u32 {
        self.number_of_runs.unwrap_or(1).max(1)
    }

    /// Total CPU budget (limit + grace) in seconds, if a CPU limit is set
    pub fn cpu_budget(&self) -> Option<f64> {
        self.cpu_time_limit
            .map(|cpu| cpu + self.cpu_extra_time.unwrap_or(0.0))
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_time_limit: Some(5.0),
            cpu_extra_time: Some(0.5),
            wall_time_limit: Some(10.0),
            memory_limit: Some(128_000), // 125 MB
            stack_limit: Some(64_000),   // 62.5 MB
            max_processes: Some(60),
            max_file_size: Some(1024), // 1 MB
            number_of_runs: Some(1),
        }
    }
}

/// Per-submission execution flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFlags {
    /// Merge standard error into standard output in arrival order
    #[serde(default)]
    pub redirect_stderr_to_stdout: bool,

    /// Give the program network access
    #[serde(default)]
    pub enable_network: bool,

    /// Apply the CPU limit per process/thread rather than to the whole group
    #[serde(default)]
    pub enable_per_process_and_thread_time_limit: bool,

    /// Apply the memory limit per process/thread rather than to the whole group
    #[serde(default)]
    pub enable_per_process_and_thread_memory_limit: bool,
}

/// How a sandboxed process came to stop.
///
/// Classification is ordered: when several conditions fire at once (a tight
/// loop can hit the CPU and wall limits in the same tick), the more specific
/// resource fault wins. See [`RunOutcome::termination`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum Termination {
    /// Process exited normally with the given code
    Exited(i32),

    /// Process was killed by the given signal
    Signalled(i32),

    /// Measured CPU usage exceeded the CPU time limit
    CpuLimitExceeded,

    /// The wall clock timer expired
    WallLimitExceeded,

    /// Peak memory met or exceeded the memory limit
    MemoryLimitExceeded,

    /// Captured output exceeded the file size limit
    OutputLimitExceeded,

    /// Killed externally (cancellation)
    Killed,

    /// The process could not be started at all
    SpawnFailed(String),
}

impl Termination {
    /// True when the process stopped because a resource limit fired
    #[must_use]
    pub fn is_resource_fault(&self) -> bool {
        matches!(
            self,
            Termination::CpuLimitExceeded
                | Termination::WallLimitExceeded
                | Termination::MemoryLimitExceeded
                | Termination::OutputLimitExceeded
        )
    }

    /// True when this is an engine fault rather than a user fault
    #[must_use]
    pub fn is_engine_fault(&self) -> bool {
        matches!(self, Termination::SpawnFailed(_))
    }
}

/// Result of running one sandboxed step
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// How the process stopped
    pub termination: Termination,

    /// Captured standard output (merged stream if stderr was redirected)
    pub stdout: Vec<u8>,

    /// Captured standard error (empty if redirected into stdout)
    pub stderr: Vec<u8>,

    /// Exit code if the process exited normally
    pub exit_code: Option<i32>,

    /// Signal number if the process was killed by a signal
    pub exit_signal: Option<i32>,

    /// CPU time used in seconds
    pub cpu_time: f64,

    /// Wall clock time used in seconds
    pub wall_time: f64,

    /// Peak memory usage in kilobytes
    pub max_memory: u64,
}

impl RunOutcome {
    /// Check if the run was successful (exited with code 0)
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.termination, Termination::Exited(0))
    }
}

impl Default for RunOutcome {
    fn default() -> Self {
        Self {
            termination: Termination::Exited(0),
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: Some(0),
            exit_signal: None,
            cpu_time: 0.0,
            wall_time: 0.0,
            max_memory: 0,
        }
    }
}
