//! Resource usage sampling for running children.
//!
//! Reads `/proc/<pid>/stat` and `/proc/<pid>/status` so the supervisor can
//! classify CPU and memory exhaustion itself instead of trusting how the
//! OS eventually stops the process. On platforms without procfs the
//! sampler yields nothing and enforcement falls back to rlimits plus the
//! wall clock.

/// One point-in-time reading of a process's resource usage
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProcessStats {
    /// CPU time consumed (user + system) in seconds
    pub cpu_seconds: f64,

    /// Peak resident set size (VmHWM) in kilobytes
    pub peak_rss_kb: u64,

    /// Peak virtual address space (VmPeak) in kilobytes
    pub peak_vm_kb: u64,
}

impl ProcessStats {
    /// Sample the process, returning None once it is gone or unreadable
    #[cfg(target_os = "linux")]
    pub fn sample(pid: u32) -> Option<Self> {
        let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
        let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;

        let cpu_seconds = parse_cpu_seconds(&stat)?;
        let peak_rss_kb = parse_status_kb(&status, "VmHWM:").unwrap_or(0);
        let peak_vm_kb = parse_status_kb(&status, "VmPeak:").unwrap_or(0);

        Some(Self {
            cpu_seconds,
            peak_rss_kb,
            peak_vm_kb,
        })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn sample(_pid: u32) -> Option<Self> {
        None
    }

    /// Fold another sample into a running peak
    pub fn merge_peak(&mut self, other: &ProcessStats) {
        self.cpu_seconds = self.cpu_seconds.max(other.cpu_seconds);
        self.peak_rss_kb = self.peak_rss_kb.max(other.peak_rss_kb);
        self.peak_vm_kb = self.peak_vm_kb.max(other.peak_vm_kb);
    }
}

/// Parse utime + stime out of `/proc/<pid>/stat`.
///
/// The comm field (2nd) may contain spaces and parentheses; everything
/// after the final ')' is whitespace-separated, with utime and stime at
/// positions 14 and 15 of the full line (1-indexed).
#[cfg(any(target_os = "linux", test))]
fn parse_cpu_seconds(stat: &str) -> Option<f64> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // rest starts at field 3 (state), so utime/stime are at offsets 11/12
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some((utime + stime) as f64 / clock_ticks_per_second())
}

/// Read a `kB` value out of `/proc/<pid>/status` by line prefix
#[cfg(any(target_os = "linux", test))]
fn parse_status_kb(status: &str, prefix: &str) -> Option<u64> {
    status
        .lines()
        .find(|line| line.starts_with(prefix))?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()
}

#[cfg(any(target_os = "linux", test))]
fn clock_ticks_per_second() -> f64 {
    // _SC_CLK_TCK is effectively always 100 on Linux, but ask anyway
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 { ticks as f64 } else { 100.0 }
}
