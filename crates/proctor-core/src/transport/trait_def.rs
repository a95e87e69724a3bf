//! The seams between the agent runtime, its transport, and the engine that
//! executes remote commands.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use proctor_wire::{AgentCommand, CommandReply};

use super::types::AgentIdentity;

/// Connection from an agent to its agency.
///
/// The runtime drives an implementation through exactly one
/// `start` / `wait_for_stop`* / `shutdown` sequence and never needs to know
/// which binding it holds.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Binding name for log lines (e.g. "tcp").
    fn name(&self) -> &str;

    /// Register with the agency and begin serving commands.
    ///
    /// `Ok(false)` means the agency could not be reached or refused the
    /// registration. `Err` is reserved for failures nobody anticipated.
    async fn start(&mut self) -> Result<bool>;

    /// Block for at most `timeout` waiting for the stop signal.
    ///
    /// Returns `true` once a stop has been signaled; stays `true` on every
    /// later call. Returns `false` early once the connection is lost.
    async fn wait_for_stop(&self, timeout: Duration) -> bool;

    /// Whether the connection to the agency has been lost. A lost
    /// connection is never a stop request.
    fn is_disconnected(&self) -> bool;

    /// Tear down background work and connections.
    async fn shutdown(&mut self);
}

/// Executes commands received from the agency.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, command: AgentCommand) -> CommandReply;
}

/// Builds the transport for an agent.
///
/// The process entry point decides which binding to use; the runtime only
/// sees the result.
pub trait TransportBinder: Send + Sync {
    fn bind(
        &self,
        identity: AgentIdentity,
        agency_url: &str,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<Box<dyn AgentTransport>>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn AgentTransport, _: &dyn CommandHandler, _: &dyn TransportBinder) {}
};
