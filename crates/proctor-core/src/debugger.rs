//! Debugger attachment capability.
//!
//! The agent asks for a debugger when `--debug-agent` or `--debug-tests` is
//! set. There is no portable "launch a debugger" primitive, so the host
//! implementation runs an operator-configured command (for example
//! `gdb -p {pid}`) and waits for the kernel to report a tracer.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

/// How often `launch` checks whether the debugger has attached.
const ATTACH_POLL: Duration = Duration::from_millis(100);

/// Why a debugger could not be attached.
#[derive(Debug, thiserror::Error)]
pub enum DebuggerError {
    /// Attaching is not possible on this host or with this configuration.
    #[error("debugger attach is not supported: {0}")]
    NotImplemented(String),

    /// The platform refused permission to launch or attach.
    #[error("debugger attach denied by platform security: {0}")]
    SecurityViolation(String),
}

/// Attach-a-debugger capability consumed by the agent runtime.
#[async_trait]
pub trait Debugger: Send + Sync {
    /// `true` if a debugger is already attached to this process.
    fn is_attached(&self) -> bool;

    /// Launch a debugger and return once it is attached.
    async fn launch(&self) -> Result<(), DebuggerError>;
}

/// Debugger support for the current host.
#[derive(Debug, Clone)]
pub struct HostDebugger {
    /// Command line with `{pid}` placeholders; `None` disables launching.
    command: Option<String>,
    attach_timeout: Duration,
}

impl HostDebugger {
    pub const DEFAULT_ATTACH_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(command: Option<String>, attach_timeout: Duration) -> Self {
        Self {
            command: command.filter(|c| !c.trim().is_empty()),
            attach_timeout,
        }
    }
}

impl Default for HostDebugger {
    fn default() -> Self {
        Self::new(None, Self::DEFAULT_ATTACH_TIMEOUT)
    }
}

#[async_trait]
impl Debugger for HostDebugger {
    fn is_attached(&self) -> bool {
        tracer_pid().is_some_and(|pid| pid != 0)
    }

    async fn launch(&self) -> Result<(), DebuggerError> {
        if !cfg!(target_os = "linux") {
            return Err(DebuggerError::NotImplemented(
                "attachment can only be observed on linux".to_string(),
            ));
        }
        let Some(template) = &self.command else {
            return Err(DebuggerError::NotImplemented(
                "no debugger command configured (set PROCTOR_DEBUGGER)".to_string(),
            ));
        };

        let argv = expand_command(template, std::process::id());
        let Some((program, args)) = argv.split_first() else {
            return Err(DebuggerError::NotImplemented(
                "debugger command is empty".to_string(),
            ));
        };

        tracing::info!(command = %template, "launching debugger");
        let spawned = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .spawn();
        if let Err(e) = spawned {
            return Err(match e.kind() {
                std::io::ErrorKind::PermissionDenied => {
                    DebuggerError::SecurityViolation(format!("{program}: {e}"))
                }
                _ => DebuggerError::NotImplemented(format!("{program}: {e}")),
            });
        }

        let deadline = Instant::now() + self.attach_timeout;
        while Instant::now() < deadline {
            if self.is_attached() {
                tracing::info!("debugger attached");
                return Ok(());
            }
            tokio::time::sleep(ATTACH_POLL).await;
        }

        Err(DebuggerError::NotImplemented(format!(
            "debugger did not attach within {}s",
            self.attach_timeout.as_secs()
        )))
    }
}

/// Split a debugger command on whitespace and substitute `{pid}`.
fn expand_command(template: &str, pid: u32) -> Vec<String> {
    let pid = pid.to_string();
    template
        .split_whitespace()
        .map(|part| part.replace("{pid}", &pid))
        .collect()
}

/// `TracerPid` of the current process, when the host exposes it.
#[cfg(target_os = "linux")]
fn tracer_pid() -> Option<u32> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    status
        .lines()
        .find_map(|line| line.strip_prefix("TracerPid:"))
        .and_then(|v| v.trim().parse().ok())
}

#[cfg(not(target_os = "linux"))]
fn tracer_pid() -> Option<u32> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_command_substitutes_pid() {
        assert_eq!(
            expand_command("gdb  -p {pid} --batch", 42),
            vec!["gdb", "-p", "42", "--batch"]
        );
    }

    #[test]
    fn blank_command_counts_as_unconfigured() {
        let dbg = HostDebugger::new(Some("   ".to_string()), Duration::from_secs(1));
        assert!(dbg.command.is_none());
    }

    #[tokio::test]
    async fn launch_without_command_is_not_implemented() {
        let err = HostDebugger::default().launch().await.unwrap_err();
        assert!(matches!(err, DebuggerError::NotImplemented(_)));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn missing_debugger_binary_is_not_implemented() {
        let dbg = HostDebugger::new(
            Some("proctor-no-such-debugger {pid}".to_string()),
            Duration::from_millis(10),
        );
        assert!(matches!(
            dbg.launch().await,
            Err(DebuggerError::NotImplemented(_))
        ));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn debugger_that_never_attaches_times_out() {
        let dbg = HostDebugger::new(Some("true".to_string()), Duration::from_millis(150));
        let err = dbg.launch().await.unwrap_err();
        assert!(err.to_string().contains("did not attach"), "got: {err}");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn waiting_for_attach_leaves_the_runtime_free() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        // Single-threaded runtime: the ticker only runs while launch yields.
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let ticker = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let dbg = HostDebugger::new(Some("true".to_string()), Duration::from_millis(300));
        assert!(dbg.launch().await.is_err());
        let seen = ticks.load(Ordering::SeqCst);
        ticker.abort();
        assert!(seen >= 5, "only {seen} ticks while waiting for attach");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_process_reports_tracer_pid() {
        assert!(tracer_pid().is_some());
    }
}
