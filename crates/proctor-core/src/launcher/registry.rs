//! Launcher registry -- an ordered collection of available launchers.
//!
//! The agency asks the registry for the first launcher able to handle a
//! workload descriptor, so registration order expresses preference.

use super::descriptor::WorkloadDescriptor;
use super::trait_def::AgentLauncher;

/// Registered [`AgentLauncher`] implementations in preference order.
#[derive(Default)]
pub struct LauncherRegistry {
    launchers: Vec<Box<dyn AgentLauncher>>,
}

impl LauncherRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a launcher.
    ///
    /// A launcher with the same name is replaced in place (keeping its
    /// position) and the old one is returned.
    pub fn register(
        &mut self,
        launcher: impl AgentLauncher + 'static,
    ) -> Option<Box<dyn AgentLauncher>> {
        let boxed: Box<dyn AgentLauncher> = Box::new(launcher);
        match self.launchers.iter().position(|l| l.name() == boxed.name()) {
            Some(index) => Some(std::mem::replace(&mut self.launchers[index], boxed)),
            None => {
                self.launchers.push(boxed);
                None
            }
        }
    }

    /// Look up a launcher by name.
    pub fn get(&self, name: &str) -> Option<&dyn AgentLauncher> {
        self.launchers
            .iter()
            .find(|l| l.name() == name)
            .map(|b| b.as_ref())
    }

    /// First registered launcher that can launch `descriptor`.
    pub fn find(&self, descriptor: &WorkloadDescriptor) -> Option<&dyn AgentLauncher> {
        self.launchers
            .iter()
            .find(|l| l.can_launch(descriptor))
            .map(|b| b.as_ref())
    }

    /// Names in registration order.
    pub fn list(&self) -> Vec<&str> {
        self.launchers.iter().map(|l| l.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.launchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.launchers.is_empty()
    }
}

impl std::fmt::Debug for LauncherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LauncherRegistry")
            .field("launchers", &self.list())
            .finish()
    }
}
