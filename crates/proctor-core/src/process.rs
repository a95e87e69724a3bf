//! Locating the parent agency process and polling its liveness.
//!
//! Liveness is a non-blocking probe behind the [`ProcessProbe`] trait so the
//! runtime's poll loop can be driven by a fake in tests.

use std::fmt;
use std::sync::Arc;

/// Errors from [`locate`].
#[derive(Debug, thiserror::Error)]
pub enum LocateError {
    #[error("invalid agency pid {0:?}")]
    InvalidPid(String),

    #[error("no running process with pid {0}")]
    NotFound(u32),
}

/// Non-blocking process existence check.
pub trait ProcessProbe: Send + Sync {
    /// `true` if a process with `pid` currently exists and has not exited.
    fn is_alive(&self, pid: u32) -> bool;
}

/// Probe backed by the host operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl ProcessProbe for SystemProbe {
    fn is_alive(&self, pid: u32) -> bool {
        pid_alive(pid) && !is_zombie(pid)
    }
}

/// A located process whose liveness can be re-checked.
#[derive(Clone)]
pub struct ProcessHandle {
    pid: u32,
    probe: Arc<dyn ProcessProbe>,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// `true` once the process is gone.
    pub fn has_exited(&self) -> bool {
        !self.probe.is_alive(self.pid)
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle").field("pid", &self.pid).finish()
    }
}

/// Resolve `pid` (a decimal string) to a live process.
pub fn locate(pid: &str, probe: Arc<dyn ProcessProbe>) -> Result<ProcessHandle, LocateError> {
    let pid: u32 = pid
        .trim()
        .parse()
        .map_err(|_| LocateError::InvalidPid(pid.to_owned()))?;
    // pid 0 would address our own process group in kill(2).
    if pid == 0 || i32::try_from(pid).is_err() {
        return Err(LocateError::InvalidPid(pid.to_string()));
    }
    if !probe.is_alive(pid) {
        return Err(LocateError::NotFound(pid));
    }
    Ok(ProcessHandle { pid, probe })
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 performs the existence and permission checks only;
    // nothing is delivered to the target.
    let ret = unsafe { libc::kill(raw, 0) };
    if ret == 0 {
        return true;
    }
    // EPERM means the process exists but belongs to someone else.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    // No portable probe; assume alive rather than killing a healthy agent.
    true
}

/// An exited but unreaped process still answers `kill(pid, 0)`.
#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // Format: `pid (comm) state ...`; comm may itself contain parentheses.
    stat.rfind(')')
        .and_then(|end| stat[end + 1..].split_whitespace().next())
        .is_some_and(|state| state == "Z" || state == "X")
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: u32) -> bool {
    false
}
