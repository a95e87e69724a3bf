//! The agent lifecycle.
//!
//! ```text
//! Created -> TracingInitialized -> [DebuggerWait] -> [ParentResolved]
//!         -> Bound -> Running -> Stopping -> Exited
//!                  \
//!                   +-> DirectRun -> Exited        (no agency url)
//! ```
//!
//! Every early exit maps to a distinct [`AgentExitCode`]; nothing is
//! retried.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use crate::config::AgentConfig;
use crate::debugger::{Debugger, DebuggerError, HostDebugger};
use crate::direct::execute_directly;
use crate::exit::AgentExitCode;
use crate::options::AgentOptions;
use crate::process::{ProcessHandle, ProcessProbe, SystemProbe, locate};
use crate::trace::init_tracing;
use crate::transport::{
    AgentIdentity, AgentTransport, CommandHandler, HostTransportBinder, TransportBinder,
};
use crate::workload::WorkloadEngine;

/// Cadence of the stop-signal wait and parent liveness check.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Liveness checks made after the agency connection drops before the
/// agency process is presumed to still be running.
pub const DISCONNECT_GRACE_POLLS: u32 = 4;

/// Lifecycle states, recorded in the order they are entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Created,
    TracingInitialized,
    DebuggerWait,
    ParentResolved,
    Bound,
    Running,
    Stopping,
    DirectRun,
    Exited,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::TracingInitialized => "tracing_initialized",
            Self::DebuggerWait => "debugger_wait",
            Self::ParentResolved => "parent_resolved",
            Self::Bound => "bound",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::DirectRun => "direct_run",
            Self::Exited => "exited",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collaborators of the runtime, injectable for tests.
#[derive(Clone)]
pub struct RuntimeEnv {
    pub probe: Arc<dyn ProcessProbe>,
    pub debugger: Arc<dyn Debugger>,
    pub binder: Arc<dyn TransportBinder>,
    pub handler: Arc<dyn CommandHandler>,
    pub poll_interval: Duration,
}

impl RuntimeEnv {
    /// Production wiring for this host.
    pub fn for_host(config: &AgentConfig, work_directory: &str) -> Self {
        Self {
            probe: Arc::new(SystemProbe),
            debugger: Arc::new(HostDebugger::new(
                config.debugger_command.clone(),
                config.debugger_attach_timeout,
            )),
            binder: Arc::new(HostTransportBinder::from_config(config)),
            handler: Arc::new(WorkloadEngine::new(work_directory)),
            poll_interval: POLL_INTERVAL,
        }
    }
}

impl fmt::Debug for RuntimeEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeEnv")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

/// How a runtime ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeReport {
    /// Process exit status.
    pub exit_code: i32,
    pub transitions: Vec<LifecycleState>,
}

impl RuntimeReport {
    pub fn reached(&self, state: LifecycleState) -> bool {
        self.transitions.contains(&state)
    }
}

/// One agent lifecycle. Consumed by [`AgentRuntime::run`].
pub struct AgentRuntime {
    kind: String,
    options: AgentOptions,
    env: RuntimeEnv,
    transitions: Vec<LifecycleState>,
}

impl AgentRuntime {
    /// `kind` labels the agent in log lines only.
    pub fn new(kind: impl Into<String>, options: AgentOptions, env: RuntimeEnv) -> Self {
        Self {
            kind: kind.into(),
            options,
            env,
            transitions: Vec::new(),
        }
    }

    /// Drive the lifecycle to completion and return the exit status.
    pub async fn run(mut self) -> RuntimeReport {
        let outcome = AssertUnwindSafe(self.drive()).catch_unwind().await;
        let exit_code = match outcome {
            Ok(code) => code,
            Err(payload) => {
                tracing::error!(
                    agent = %self.kind,
                    panic = %panic_message(payload.as_ref()),
                    "agent runtime panicked"
                );
                AgentExitCode::UnexpectedException.code()
            }
        };
        self.enter(LifecycleState::Exited);
        tracing::info!(agent = %self.kind, exit_code, "agent exiting");
        RuntimeReport {
            exit_code,
            transitions: self.transitions,
        }
    }

    fn enter(&mut self, state: LifecycleState) {
        tracing::debug!(agent = %self.kind, %state, "lifecycle transition");
        self.transitions.push(state);
    }

    async fn drive(&mut self) -> i32 {
        self.enter(LifecycleState::Created);

        let log_file = init_tracing(self.options.work_directory(), self.options.trace_level());
        self.enter(LifecycleState::TracingInitialized);
        tracing::info!(
            agent = %self.kind,
            pid = std::process::id(),
            agent_id = ?self.options.agent_id(),
            log_file = ?log_file,
            "agent starting"
        );

        if self.options.wants_debugger() {
            self.enter(LifecycleState::DebuggerWait);
            if let Err(code) = self.attach_debugger().await {
                return code.code();
            }
        }

        let parent = match self.resolve_parent() {
            Ok(parent) => parent,
            Err(code) => return code.code(),
        };

        if !self.options.is_registration_mode() {
            return self.run_directly().await;
        }

        match self.serve(parent).await {
            Ok(()) => AgentExitCode::Ok.code(),
            Err(code) => code.code(),
        }
    }

    async fn attach_debugger(&self) -> Result<(), AgentExitCode> {
        if self.env.debugger.is_attached() {
            tracing::info!("debugger already attached");
            return Ok(());
        }
        match self.env.debugger.launch().await {
            Ok(()) => Ok(()),
            Err(e @ DebuggerError::NotImplemented(_)) => {
                tracing::error!(error = %e, "cannot attach debugger");
                Err(AgentExitCode::DebuggerNotImplemented)
            }
            Err(e @ DebuggerError::SecurityViolation(_)) => {
                tracing::error!(error = %e, "cannot attach debugger");
                Err(AgentExitCode::DebuggerSecurityViolation)
            }
        }
    }

    fn resolve_parent(&mut self) -> Result<Option<ProcessHandle>, AgentExitCode> {
        let pid = self.options.agency_pid().to_owned();
        if pid.is_empty() {
            return Ok(None);
        }
        match locate(&pid, Arc::clone(&self.env.probe)) {
            Ok(handle) => {
                tracing::debug!(agency_pid = handle.pid(), "agency process located");
                self.enter(LifecycleState::ParentResolved);
                Ok(Some(handle))
            }
            Err(e) => {
                tracing::error!(agency_pid = %pid, error = %e, "unable to locate agency process");
                Err(AgentExitCode::UnableToLocateAgency)
            }
        }
    }

    async fn run_directly(&mut self) -> i32 {
        if self.options.files().is_empty() {
            tracing::error!("neither an agency url nor a workload file was supplied");
            return AgentExitCode::InvalidArguments.code();
        }
        self.enter(LifecycleState::DirectRun);
        match execute_directly(&self.options).await {
            Ok(status) => status,
            Err(e) => {
                let message = format!("{e:#}");
                tracing::error!(error = %message, "direct execution failed");
                AgentExitCode::UnexpectedException.code()
            }
        }
    }

    async fn serve(&mut self, parent: Option<ProcessHandle>) -> Result<(), AgentExitCode> {
        let Some(agent_id) = self.options.agent_id() else {
            tracing::error!("registration requires --agentId");
            return Err(AgentExitCode::InvalidArguments);
        };

        let identity = AgentIdentity::new(agent_id);
        let mut transport = self
            .env
            .binder
            .bind(
                identity,
                self.options.agency_url(),
                Arc::clone(&self.env.handler),
            )
            .map_err(|e| {
                let message = format!("{e:#}");
                tracing::error!(error = %message, "cannot bind transport");
                AgentExitCode::InvalidArguments
            })?;
        self.enter(LifecycleState::Bound);

        if let Err(code) = start_transport(transport.as_mut()).await {
            transport.shutdown().await;
            return Err(code);
        }
        self.enter(LifecycleState::Running);
        tracing::info!(
            agent_id = %agent_id,
            transport = transport.name(),
            agency = %self.options.agency_url(),
            "agent running"
        );

        let outcome = self.wait_for_stop(transport.as_ref(), parent.as_ref()).await;
        if outcome.is_ok() {
            self.enter(LifecycleState::Stopping);
            tracing::info!(agent_id = %agent_id, "stop signal received");
        }
        transport.shutdown().await;
        outcome
    }

    async fn wait_for_stop(
        &self,
        transport: &dyn AgentTransport,
        parent: Option<&ProcessHandle>,
    ) -> Result<(), AgentExitCode> {
        let mut grace = DISCONNECT_GRACE_POLLS;
        loop {
            if transport.wait_for_stop(self.env.poll_interval).await {
                return Ok(());
            }
            if let Some(parent) = parent {
                if parent.has_exited() {
                    tracing::error!(agency_pid = parent.pid(), "agency process terminated");
                    return Err(AgentExitCode::ParentProcessTerminated);
                }
            }
            if !transport.is_disconnected() {
                continue;
            }
            // A dying agency drops its connections before its pid goes away.
            if parent.is_none() || grace == 0 {
                tracing::error!(transport = transport.name(), "lost connection to agency");
                return Err(AgentExitCode::AgencyConnectionLost);
            }
            grace -= 1;
            tokio::time::sleep(self.env.poll_interval).await;
        }
    }
}

async fn start_transport(transport: &mut dyn AgentTransport) -> Result<(), AgentExitCode> {
    let name = transport.name().to_owned();
    match AssertUnwindSafe(transport.start()).catch_unwind().await {
        Ok(Ok(true)) => Ok(()),
        Ok(Ok(false)) => {
            tracing::error!(transport = %name, "failed to start remote agent");
            Err(AgentExitCode::FailedToStartRemoteAgent)
        }
        Ok(Err(e)) => {
            let message = format!("{e:#}");
            tracing::error!(transport = %name, error = %message, "transport start raised an error");
            Err(AgentExitCode::UnexpectedException)
        }
        Err(payload) => {
            tracing::error!(
                transport = %name,
                panic = %panic_message(payload.as_ref()),
                "transport start panicked"
            );
            Err(AgentExitCode::UnexpectedException)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
