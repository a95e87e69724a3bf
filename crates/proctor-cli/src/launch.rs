//! Launcher selection shared by `proctor command-line` and `proctor run`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use uuid::Uuid;

use proctor_core::launcher::{
    AgentLauncher, LauncherConfig, LauncherRegistry, LocalProcessLauncher, ProcessSpec,
    WorkloadDescriptor, keys,
};
use proctor_core::options::TraceLevel;

/// Workload settings that decide which launcher runs the agent and how.
#[derive(Debug, Clone, Args)]
pub struct LaunchArgs {
    /// Target runtime tag (e.g. netcore-3.1)
    #[arg(long)]
    pub runtime: String,
    /// Agent diagnostic level: off, error, warning, info, debug
    #[arg(long, default_value = "off")]
    pub trace: TraceLevel,
    /// Ask the agent to wait for a debugger
    #[arg(long)]
    pub debug_agent: bool,
    /// Working directory handed to the agent
    #[arg(long)]
    pub work: Option<String>,
    /// Load the user profile for the agent process
    #[arg(long)]
    pub load_user_profile: bool,
    /// Request a 32-bit agent
    #[arg(long)]
    pub x86: bool,
    /// Directory the launcher is installed in (defaults to this executable's)
    #[arg(long)]
    pub location: Option<PathBuf>,
}

impl LaunchArgs {
    pub fn descriptor(&self) -> WorkloadDescriptor {
        WorkloadDescriptor::new()
            .with(keys::TARGET_RUNTIME_FRAMEWORK, self.runtime.as_str())
            .with(keys::INTERNAL_TRACE_LEVEL, self.trace.as_str())
            .with(keys::DEBUG_AGENT, self.debug_agent)
            .with(keys::WORK_DIRECTORY, self.work.clone().unwrap_or_default())
            .with(keys::LOAD_USER_PROFILE, self.load_user_profile)
            .with(keys::RUN_AS_X86, self.x86)
    }

    pub fn registry(&self) -> Result<LauncherRegistry> {
        let config = LauncherConfig::default();
        let launcher = match &self.location {
            Some(location) => LocalProcessLauncher::new(config, location.clone()),
            None => LocalProcessLauncher::for_current_exe(config)?,
        };
        let mut registry = LauncherRegistry::new();
        registry.register(launcher);
        Ok(registry)
    }

    /// Pick a launcher and build the agent process for `agent_id`.
    pub fn process(&self, agent_id: Uuid, agency_url: &str) -> Result<(String, ProcessSpec)> {
        let registry = self.registry()?;
        let descriptor = self.descriptor();
        let launcher = registry
            .find(&descriptor)
            .with_context(|| format!("no launcher supports runtime {:?}", self.runtime))?;
        let spec = launcher
            .create_process(agent_id, agency_url, &descriptor)
            .with_context(|| format!("launcher {} declined runtime {:?}", launcher.name(), self.runtime))?;
        Ok((launcher.name().to_owned(), spec))
    }
}
