use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use proctor_wire::BindingKind;
use tokio::sync::watch;
use uuid::Uuid;

/// Who an agent is, as announced in its registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentIdentity {
    pub agent_id: Uuid,
    pub pid: u32,
}

impl AgentIdentity {
    /// Identity for the current process.
    pub fn new(agent_id: Uuid) -> Self {
        Self {
            agent_id,
            pid: std::process::id(),
        }
    }
}

// ---------------------------------------------------------------------------
// Transport kind
// ---------------------------------------------------------------------------

/// The available transport bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// One persistent connection; the agency pushes commands.
    Tcp,
    /// A connection per call; the agent polls for commands.
    Remoting,
}

impl TransportKind {
    /// The binding to use when nothing is configured.
    pub fn preferred_for_host() -> Self {
        Self::Tcp
    }

    /// How this binding identifies itself on the wire.
    pub fn binding(self) -> BindingKind {
        match self {
            Self::Tcp => BindingKind::Streaming,
            Self::Remoting => BindingKind::Remoting,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Tcp => "tcp",
            Self::Remoting => "remoting",
        };
        f.write_str(s)
    }
}

impl FromStr for TransportKind {
    type Err = TransportKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "remoting" => Ok(Self::Remoting),
            _ => Err(TransportKindParseError(s.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TransportKind`] string.
#[derive(Debug, Clone)]
pub struct TransportKindParseError(pub String);

impl fmt::Display for TransportKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid transport {:?} (expected tcp or remoting)",
            self.0
        )
    }
}

impl std::error::Error for TransportKindParseError {}

// ---------------------------------------------------------------------------
// Stop signal
// ---------------------------------------------------------------------------

/// Latch raised when the agency asks the agent to stop. Transports keep a
/// second one for a lost connection.
///
/// Cloned into background tasks; every clone observes the same latch.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn raise(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_raised(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait up to `timeout` for the latch; `true` if it is raised.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let mut rx = self.tx.subscribe();
        matches!(
            tokio::time::timeout(timeout, rx.wait_for(|raised| *raised)).await,
            Ok(Ok(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_kind_roundtrip() {
        for kind in [TransportKind::Tcp, TransportKind::Remoting] {
            assert_eq!(kind.to_string().parse::<TransportKind>().unwrap(), kind);
        }
        assert_eq!(" TCP ".parse::<TransportKind>().unwrap(), TransportKind::Tcp);
        assert!("udp".parse::<TransportKind>().is_err());
    }

    #[test]
    fn binding_names() {
        assert_eq!(TransportKind::Tcp.binding(), BindingKind::Streaming);
        assert_eq!(TransportKind::Remoting.binding(), BindingKind::Remoting);
    }

    #[tokio::test]
    async fn stop_signal_times_out_until_raised() {
        let stop = StopSignal::new();
        assert!(!stop.wait(Duration::from_millis(20)).await);

        let remote = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            remote.raise();
        });
        assert!(stop.wait(Duration::from_secs(5)).await);
        assert!(stop.is_raised());
        // Latched.
        assert!(stop.wait(Duration::from_millis(1)).await);
    }
}
