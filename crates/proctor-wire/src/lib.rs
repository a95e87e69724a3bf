//! Wire-level types shared by agents and the agency.
//!
//! Frames travel as single-line JSON objects; see [`codec`] for the framing
//! rules and [`models`] for the frame vocabulary.

pub mod codec;
pub mod endpoint;
pub mod models;

pub use codec::{MAX_FRAME_LEN, WireError, read_frame, write_frame};
pub use endpoint::{AgencyEndpoint, EndpointError};
pub use models::{AgencyFrame, AgentCommand, AgentFrame, BindingKind, CommandReply, QueuedCommand};
