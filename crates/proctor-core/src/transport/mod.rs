//! Transport bindings between an agent and its agency.
//!
//! # Architecture
//!
//! ```text
//! entry point
//!     |
//!     v
//! TransportBinder --bind(identity, url)--> Box<dyn AgentTransport>
//!                                               |
//!                       +-----------------------+-----------------------+
//!                       |                                               |
//!                 TcpTransport                                 RemotingTransport
//!           (persistent connection,                      (connection per call,
//!            agency pushes commands)                      agent polls for commands)
//!                       |                                               |
//!                       +------------> dyn CommandHandler <-------------+
//! ```

pub mod remoting;
pub mod tcp;
pub mod trait_def;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use proctor_wire::{AgencyEndpoint, WireError};

pub use remoting::RemotingTransport;
pub use tcp::TcpTransport;
pub use trait_def::{AgentTransport, CommandHandler, TransportBinder};
pub use types::{AgentIdentity, StopSignal, TransportKind, TransportKindParseError};

use crate::config::AgentConfig;

/// How long `shutdown` waits for a background task before aborting it.
pub(crate) const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Errors that mean the agency spoke, but not our protocol.
pub(crate) fn is_protocol_error(e: &WireError) -> bool {
    matches!(e, WireError::Malformed(_) | WireError::TooLarge)
}

/// Wait up to `timeout` for `stop`, returning early once `disconnected` is
/// raised. The result is still whether a stop was requested.
pub(crate) async fn wait_unless_disconnected(
    stop: &StopSignal,
    disconnected: &StopSignal,
    timeout: Duration,
) -> bool {
    tokio::select! {
        biased;
        stopped = stop.wait(timeout) => stopped,
        _ = disconnected.wait(timeout) => stop.is_raised(),
    }
}

/// Builds the binding selected by configuration.
#[derive(Debug, Clone)]
pub struct HostTransportBinder {
    kind: TransportKind,
    connect_timeout: Duration,
    poll_interval: Duration,
}

impl HostTransportBinder {
    pub fn new(kind: TransportKind, connect_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            kind,
            connect_timeout,
            poll_interval,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(
            config.transport,
            config.connect_timeout,
            config.remoting_poll_interval,
        )
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }
}

impl TransportBinder for HostTransportBinder {
    fn bind(
        &self,
        identity: AgentIdentity,
        agency_url: &str,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<Box<dyn AgentTransport>> {
        let endpoint = AgencyEndpoint::parse(agency_url)
            .with_context(|| format!("invalid agency url {agency_url:?}"))?;
        tracing::debug!(transport = %self.kind, agency = %endpoint, "binding transport");

        let transport: Box<dyn AgentTransport> = match self.kind {
            TransportKind::Tcp => Box::new(TcpTransport::new(
                identity,
                endpoint,
                self.connect_timeout,
                handler,
            )),
            TransportKind::Remoting => Box::new(RemotingTransport::new(
                identity,
                endpoint,
                self.connect_timeout,
                self.poll_interval,
                handler,
            )),
        };
        Ok(transport)
    }
}
