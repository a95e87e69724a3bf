//! The `AgentLauncher` trait, implemented by everything that can turn a
//! workload descriptor into an agent process.

use uuid::Uuid;

use super::descriptor::WorkloadDescriptor;
use super::process::ProcessSpec;

/// Describes the agents a launcher produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInfo {
    /// Agent executable name.
    pub name: String,
    /// Name of the launcher that builds it.
    pub launcher: String,
    /// Runtime family and highest major version, e.g. `netcore-3`.
    pub target_runtime: String,
}

/// Decides whether it can run a workload and, if so, how to start the
/// agent for it.
///
/// Object-safe so launchers can be stored in a
/// [`super::LauncherRegistry`].
pub trait AgentLauncher: Send + Sync {
    /// Launcher name (e.g. "local-process").
    fn name(&self) -> &str;

    fn agent_info(&self) -> AgentInfo;

    /// Pure predicate over the descriptor's target runtime.
    fn can_launch(&self, descriptor: &WorkloadDescriptor) -> bool;

    /// Build the process specification, or `None` when
    /// [`can_launch`](Self::can_launch) is false. Never spawns anything.
    fn create_process(
        &self,
        agent_id: Uuid,
        agency_url: &str,
        descriptor: &WorkloadDescriptor,
    ) -> Option<ProcessSpec>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn AgentLauncher) {}
};
