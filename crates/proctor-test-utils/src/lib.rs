//! Shared test utilities for proctor integration tests.
//!
//! Fakes for every collaborator of the agent runtime (process probe,
//! debugger, transport binder, command handler) plus workload fixtures.
//! Each fake exposes counters or switches so a test can both script the
//! collaborator and observe how the runtime used it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use proctor_core::debugger::{Debugger, DebuggerError};
use proctor_core::process::ProcessProbe;
use proctor_core::runtime::RuntimeEnv;
use proctor_core::transport::{
    AgentIdentity, AgentTransport, CommandHandler, StopSignal, TransportBinder,
};
use proctor_wire::{AgentCommand, CommandReply};

/// Poll interval used by [`fake_env`]; short so tests stay fast.
pub const TEST_POLL_INTERVAL: Duration = Duration::from_millis(20);

// ---------------------------------------------------------------------------
// Process probe
// ---------------------------------------------------------------------------

/// Probe whose answer is flipped by the test.
#[derive(Debug)]
pub struct FakeProbe {
    alive: AtomicBool,
    checks: AtomicUsize,
}

impl FakeProbe {
    pub fn new(alive: bool) -> Arc<Self> {
        Arc::new(Self {
            alive: AtomicBool::new(alive),
            checks: AtomicUsize::new(0),
        })
    }

    /// Simulate the parent process exiting.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

impl ProcessProbe for FakeProbe {
    fn is_alive(&self, _pid: u32) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.alive.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Debugger
// ---------------------------------------------------------------------------

/// What [`FakeDebugger::launch`] does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebuggerBehavior {
    Attach,
    NotImplemented,
    SecurityViolation,
}

#[derive(Debug)]
pub struct FakeDebugger {
    already_attached: bool,
    behavior: DebuggerBehavior,
    launches: AtomicUsize,
}

impl FakeDebugger {
    pub fn new(behavior: DebuggerBehavior) -> Arc<Self> {
        Arc::new(Self {
            already_attached: false,
            behavior,
            launches: AtomicUsize::new(0),
        })
    }

    /// A debugger that is attached before the runtime asks.
    pub fn attached() -> Arc<Self> {
        Arc::new(Self {
            already_attached: true,
            behavior: DebuggerBehavior::NotImplemented,
            launches: AtomicUsize::new(0),
        })
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Debugger for FakeDebugger {
    fn is_attached(&self) -> bool {
        self.already_attached
    }

    async fn launch(&self) -> Result<(), DebuggerError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            DebuggerBehavior::Attach => Ok(()),
            DebuggerBehavior::NotImplemented => {
                Err(DebuggerError::NotImplemented("fake".to_owned()))
            }
            DebuggerBehavior::SecurityViolation => {
                Err(DebuggerError::SecurityViolation("fake".to_owned()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// What [`AgentTransport::start`] does on a [`FakeTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartBehavior {
    /// `Ok(true)`.
    Succeed,
    /// `Ok(false)`.
    Refuse,
    /// `Err(..)`.
    Error,
    /// Panics inside `start`.
    Panic,
}

/// Observations shared between a [`FakeBinder`] and the transports it
/// builds.
#[derive(Debug, Default)]
pub struct TransportLog {
    pub binds: AtomicUsize,
    pub starts: AtomicUsize,
    pub waits: AtomicUsize,
    pub shutdowns: AtomicUsize,
    pub identity: Mutex<Option<AgentIdentity>>,
    pub agency_url: Mutex<Option<String>>,
}

impl TransportLog {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Binder producing scripted [`FakeTransport`]s.
#[derive(Debug)]
pub struct FakeBinder {
    behavior: StartBehavior,
    fail_bind: bool,
    stop: StopSignal,
    disconnected: StopSignal,
    log: Arc<TransportLog>,
}

impl FakeBinder {
    pub fn new(behavior: StartBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            fail_bind: false,
            stop: StopSignal::new(),
            disconnected: StopSignal::new(),
            log: Arc::new(TransportLog::default()),
        })
    }

    /// A binder whose `bind` always fails.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            behavior: StartBehavior::Succeed,
            fail_bind: true,
            stop: StopSignal::new(),
            disconnected: StopSignal::new(),
            log: Arc::new(TransportLog::default()),
        })
    }

    /// The stop latch of every transport this binder builds.
    pub fn stop(&self) -> &StopSignal {
        &self.stop
    }

    /// The lost-connection latch of every transport this binder builds.
    pub fn disconnected(&self) -> &StopSignal {
        &self.disconnected
    }

    pub fn log(&self) -> &TransportLog {
        &self.log
    }
}

impl TransportBinder for FakeBinder {
    fn bind(
        &self,
        identity: AgentIdentity,
        agency_url: &str,
        _handler: Arc<dyn CommandHandler>,
    ) -> Result<Box<dyn AgentTransport>> {
        self.log.binds.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut slot) = self.log.identity.lock() {
            *slot = Some(identity);
        }
        if let Ok(mut slot) = self.log.agency_url.lock() {
            *slot = Some(agency_url.to_owned());
        }
        if self.fail_bind {
            bail!("fake bind failure for {agency_url}");
        }
        Ok(Box::new(FakeTransport {
            behavior: self.behavior,
            stop: self.stop.clone(),
            disconnected: self.disconnected.clone(),
            log: Arc::clone(&self.log),
        }))
    }
}

#[derive(Debug)]
pub struct FakeTransport {
    behavior: StartBehavior,
    stop: StopSignal,
    disconnected: StopSignal,
    log: Arc<TransportLog>,
}

#[async_trait]
impl AgentTransport for FakeTransport {
    fn name(&self) -> &str {
        "fake"
    }

    async fn start(&mut self) -> Result<bool> {
        self.log.starts.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            StartBehavior::Succeed => Ok(true),
            StartBehavior::Refuse => Ok(false),
            StartBehavior::Error => bail!("fake transport error"),
            StartBehavior::Panic => panic!("fake transport panic"),
        }
    }

    async fn wait_for_stop(&self, timeout: Duration) -> bool {
        self.log.waits.fetch_add(1, Ordering::SeqCst);
        tokio::select! {
            biased;
            stopped = self.stop.wait(timeout) => stopped,
            _ = self.disconnected.wait(timeout) => self.stop.is_raised(),
        }
    }

    fn is_disconnected(&self) -> bool {
        self.disconnected.is_raised()
    }

    async fn shutdown(&mut self) {
        self.log.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Command handler
// ---------------------------------------------------------------------------

/// Handler that records every command and answers without doing work.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    commands: Mutex<Vec<AgentCommand>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn commands(&self) -> Vec<AgentCommand> {
        self.commands
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CommandHandler for RecordingHandler {
    async fn handle(&self, command: AgentCommand) -> CommandReply {
        let reply = match &command {
            AgentCommand::Ping => CommandReply::Pong,
            AgentCommand::Run { workload } => CommandReply::Completed {
                summary: format!("ran {}", workload.display()),
            },
            AgentCommand::Stop => CommandReply::Stopping,
        };
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command);
        }
        reply
    }
}

// ---------------------------------------------------------------------------
// Runtime wiring
// ---------------------------------------------------------------------------

/// A [`RuntimeEnv`] built from fakes with [`TEST_POLL_INTERVAL`].
pub fn fake_env(
    probe: Arc<FakeProbe>,
    debugger: Arc<FakeDebugger>,
    binder: Arc<FakeBinder>,
) -> RuntimeEnv {
    RuntimeEnv {
        probe,
        debugger,
        binder,
        handler: RecordingHandler::new(),
        poll_interval: TEST_POLL_INTERVAL,
    }
}

// ---------------------------------------------------------------------------
// Workload fixtures
// ---------------------------------------------------------------------------

/// Write a workload file named `file_name` into `dir`.
///
/// Each test is `(name, command, args)`.
pub fn write_workload(
    dir: &Path,
    file_name: &str,
    workload_name: &str,
    tests: &[(&str, &str, &[&str])],
) -> PathBuf {
    let mut content = format!("name = {workload_name:?}\n");
    for (name, command, args) in tests {
        content.push_str(&format!(
            "\n[[test]]\nname = {name:?}\ncommand = {command:?}\nargs = {args:?}\n"
        ));
    }
    let path = dir.join(file_name);
    if let Err(e) = std::fs::write(&path, content) {
        panic!("failed to write workload {}: {e}", path.display());
    }
    path
}
