//! Launcher for agents that run as local child processes.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use uuid::Uuid;

use super::descriptor::WorkloadDescriptor;
use super::process::{ProcessSpec, escape_process_argument};
use super::trait_def::{AgentInfo, AgentLauncher};

/// Which runtimes a [`LocalProcessLauncher`] accepts and where its agent
/// binary lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherConfig {
    /// Runtime family tag, matched as a prefix of the target runtime.
    pub runtime_prefix: String,
    /// Highest accepted major version digit.
    pub max_major: char,
    /// Sub-directory of the launcher location holding the agent.
    pub agent_dir: PathBuf,
    /// Agent executable name, without platform suffix.
    pub agent_binary: String,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            runtime_prefix: "netcore-".to_owned(),
            max_major: '3',
            agent_dir: PathBuf::from("agent"),
            agent_binary: "proctor-agent".to_owned(),
        }
    }
}

/// Builds process specifications for `proctor-agent` children.
#[derive(Debug, Clone)]
pub struct LocalProcessLauncher {
    config: LauncherConfig,
    /// Directory the launcher itself is installed in.
    location: PathBuf,
}

impl LocalProcessLauncher {
    pub fn new(config: LauncherConfig, location: impl Into<PathBuf>) -> Self {
        Self {
            config,
            location: location.into(),
        }
    }

    /// Launcher located next to the running executable.
    pub fn for_current_exe(config: LauncherConfig) -> Result<Self> {
        let exe = std::env::current_exe().context("cannot determine current executable")?;
        let location = exe
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(Self::new(config, location))
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    /// Full path of the agent executable.
    pub fn agent_path(&self) -> PathBuf {
        self.location.join(&self.config.agent_dir).join(format!(
            "{}{}",
            self.config.agent_binary,
            std::env::consts::EXE_SUFFIX
        ))
    }
}

impl AgentLauncher for LocalProcessLauncher {
    fn name(&self) -> &str {
        "local-process"
    }

    fn agent_info(&self) -> AgentInfo {
        AgentInfo {
            name: self.config.agent_binary.clone(),
            launcher: self.name().to_owned(),
            target_runtime: format!("{}{}", self.config.runtime_prefix, self.config.max_major),
        }
    }

    fn can_launch(&self, descriptor: &WorkloadDescriptor) -> bool {
        let Some(version) = descriptor
            .target_runtime()
            .strip_prefix(self.config.runtime_prefix.as_str())
        else {
            return false;
        };
        version
            .chars()
            .next()
            .is_some_and(|major| major.is_ascii_digit() && major <= self.config.max_major)
    }

    fn create_process(
        &self,
        agent_id: Uuid,
        agency_url: &str,
        descriptor: &WorkloadDescriptor,
    ) -> Option<ProcessSpec> {
        if !self.can_launch(descriptor) {
            return None;
        }

        let mut arguments = format!(
            "--agentId={} --agencyUrl={} --pid={}",
            agent_id,
            escape_process_argument(agency_url),
            std::process::id()
        );

        let trace_level = descriptor.trace_level();
        if trace_level != "Off" {
            arguments.push_str(" --trace=");
            arguments.push_str(&escape_process_argument(trace_level));
        }
        if descriptor.debug_agent() {
            arguments.push_str(" --debug-agent");
        }
        let work_directory = descriptor.work_directory();
        if !work_directory.is_empty() {
            arguments.push_str(" --work=");
            arguments.push_str(&escape_process_argument(work_directory));
        }

        let working_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let spec = ProcessSpec {
            program: self.agent_path(),
            arguments,
            working_dir,
            use_shell_execute: false,
            create_no_window: true,
            load_user_profile: descriptor.load_user_profile(),
            raise_exit_events: true,
        };
        tracing::debug!(
            agent_id = %agent_id,
            runtime = descriptor.target_runtime(),
            program = %spec.program.display(),
            arguments = %spec.arguments,
            "built agent process"
        );
        Some(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::descriptor::keys;

    fn launcher() -> LocalProcessLauncher {
        LocalProcessLauncher::new(LauncherConfig::default(), "/opt/proctor")
    }

    fn descriptor(runtime: &str) -> WorkloadDescriptor {
        WorkloadDescriptor::new().with(keys::TARGET_RUNTIME_FRAMEWORK, runtime)
    }

    #[test]
    fn agent_lives_in_agent_subdirectory() {
        let path = launcher().agent_path();
        assert!(path.starts_with("/opt/proctor/agent"));
        assert!(
            path.file_name()
                .is_some_and(|n| n.to_string_lossy().starts_with("proctor-agent"))
        );
    }

    #[test]
    fn prefix_without_version_is_rejected() {
        assert!(!launcher().can_launch(&descriptor("netcore-")));
        assert!(!launcher().can_launch(&descriptor("netcore")));
        assert!(!launcher().can_launch(&descriptor("")));
        assert!(!launcher().can_launch(&descriptor("netcore-x.1")));
    }

    #[test]
    fn custom_config_changes_family_and_ceiling() {
        let config = LauncherConfig {
            runtime_prefix: "net-".to_owned(),
            max_major: '4',
            ..LauncherConfig::default()
        };
        let launcher = LocalProcessLauncher::new(config, "/opt/proctor");
        assert!(launcher.can_launch(&descriptor("net-4.5")));
        assert!(!launcher.can_launch(&descriptor("net-5.0")));
        assert!(!launcher.can_launch(&descriptor("netcore-3.1")));
    }

    #[test]
    fn agent_info_describes_launcher() {
        let info = launcher().agent_info();
        assert_eq!(info.name, "proctor-agent");
        assert_eq!(info.launcher, "local-process");
        assert_eq!(info.target_runtime, "netcore-3");
    }

    #[test]
    fn working_dir_is_launcher_cwd() {
        let d = descriptor("netcore-2.1").with(keys::WORK_DIRECTORY, "/somewhere/else");
        let spec = launcher().create_process(Uuid::new_v4(), "tcp://127.0.0.1:1/A", &d).unwrap();
        assert_eq!(spec.working_dir, std::env::current_dir().unwrap());
        assert!(!spec.use_shell_execute);
        assert!(spec.create_no_window);
        assert!(spec.raise_exit_events);
    }
}
