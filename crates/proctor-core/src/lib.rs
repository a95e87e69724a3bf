//! Agent-side lifecycle and agency-side launching for proctor test agents.

pub mod config;
pub mod debugger;
pub mod direct;
pub mod exit;
pub mod launcher;
pub mod options;
pub mod process;
pub mod runtime;
pub mod trace;
pub mod transport;
pub mod workload;

pub use config::{AgentConfig, ConfigError};
pub use debugger::{Debugger, DebuggerError, HostDebugger};
pub use direct::execute_directly;
pub use exit::AgentExitCode;
pub use launcher::{
    AgentLauncher, LauncherConfig, LauncherRegistry, LocalProcessLauncher, ProcessSpec,
    WorkloadDescriptor,
};
pub use options::{AgentOptions, OptionsError, TraceLevel};
pub use process::{LocateError, ProcessHandle, ProcessProbe, SystemProbe, locate};
pub use runtime::{AgentRuntime, LifecycleState, RuntimeEnv, RuntimeReport};
pub use transport::{
    AgentIdentity, AgentTransport, CommandHandler, HostTransportBinder, StopSignal,
    TransportBinder, TransportKind,
};
pub use workload::{Workload, WorkloadEngine, WorkloadError, WorkloadReport, run_workload};
