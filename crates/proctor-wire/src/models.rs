use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which transport binding an agent registered with.
///
/// The agency needs this to know whether it may push commands down the
/// registration connection (`streaming`) or must queue them until the agent
/// polls (`remoting`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingKind {
    Streaming,
    Remoting,
}

impl fmt::Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Streaming => "streaming",
            Self::Remoting => "remoting",
        };
        f.write_str(s)
    }
}

impl FromStr for BindingKind {
    type Err = BindingKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "streaming" => Ok(Self::Streaming),
            "remoting" => Ok(Self::Remoting),
            other => Err(BindingKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`BindingKind`] string.
#[derive(Debug, Clone)]
pub struct BindingKindParseError(pub String);

impl fmt::Display for BindingKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid binding kind: {:?}", self.0)
    }
}

impl std::error::Error for BindingKindParseError {}

// ---------------------------------------------------------------------------
// Commands and replies
// ---------------------------------------------------------------------------

/// A command sent by the agency for the agent to execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentCommand {
    /// Liveness round-trip.
    Ping,
    /// Execute the workload file at `workload`.
    Run { workload: PathBuf },
    /// Ask the agent to shut down cleanly.
    Stop,
}

impl AgentCommand {
    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Run { .. } => "run",
            Self::Stop => "stop",
        }
    }
}

/// The agent's answer to an [`AgentCommand`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandReply {
    Pong,
    Completed { summary: String },
    Stopping,
    Failed { message: String },
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// Frames written by an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentFrame {
    /// First frame of a session: identifies the agent to the agency.
    Register {
        agent_id: Uuid,
        pid: u32,
        binding: BindingKind,
    },
    /// Remoting only: ask for any queued commands.
    Poll { agent_id: Uuid },
    /// Result of a command identified by `request_id`.
    Reply {
        agent_id: Uuid,
        request_id: u64,
        reply: CommandReply,
    },
}

/// Frames written by the agency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgencyFrame {
    /// Registration (or reply delivery) accepted.
    Ack,
    /// Registration refused.
    Reject { reason: String },
    /// Streaming: a single command pushed to the agent.
    Command {
        request_id: u64,
        command: AgentCommand,
    },
    /// Remoting: the commands queued since the last poll.
    Commands { items: Vec<QueuedCommand> },
    /// Remoting: nothing queued.
    Idle,
}

/// A command waiting in the agency's queue for a remoting agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedCommand {
    pub request_id: u64,
    pub command: AgentCommand,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_frame_is_tagged_snake_case() {
        let frame = AgentFrame::Register {
            agent_id: Uuid::nil(),
            pid: 42,
            binding: BindingKind::Streaming,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "register");
        assert_eq!(json["pid"], 42);
        assert_eq!(json["binding"], "streaming");
    }

    #[test]
    fn command_frame_nests_tagged_command() {
        let json = r#"{"type":"command","request_id":7,"command":{"type":"run","workload":"/tmp/w.toml"}}"#;
        let frame: AgencyFrame = serde_json::from_str(json).unwrap();
        assert_eq!(
            frame,
            AgencyFrame::Command {
                request_id: 7,
                command: AgentCommand::Run {
                    workload: PathBuf::from("/tmp/w.toml"),
                },
            }
        );
    }

    #[test]
    fn unknown_frame_type_is_rejected() {
        let result = serde_json::from_str::<AgencyFrame>(r#"{"type":"explode"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn binding_kind_display_matches_from_str() {
        for kind in [BindingKind::Streaming, BindingKind::Remoting] {
            assert_eq!(kind.to_string().parse::<BindingKind>().unwrap(), kind);
        }
        assert!("carrier-pigeon".parse::<BindingKind>().is_err());
    }

    #[test]
    fn command_kind_names() {
        assert_eq!(AgentCommand::Ping.kind(), "ping");
        assert_eq!(AgentCommand::Stop.kind(), "stop");
        assert_eq!(
            AgentCommand::Run {
                workload: PathBuf::from("x")
            }
            .kind(),
            "run"
        );
    }
}
