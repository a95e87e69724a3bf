//! Building agent processes inside the agency.
//!
//! ```text
//! agency
//!     |
//!     v
//! LauncherRegistry --find(descriptor)--> &dyn AgentLauncher
//!                                            |
//!                          create_process(agent_id, url, descriptor)
//!                                            |
//!                                            v
//!                              ProcessSpec { program, arguments, ... }
//!                                            |
//!                                      command().spawn()   (caller owns child)
//! ```

pub mod descriptor;
pub mod local;
pub mod process;
pub mod registry;
pub mod trait_def;

pub use descriptor::{SettingValue, WorkloadDescriptor, keys};
pub use local::{LauncherConfig, LocalProcessLauncher};
pub use process::{ProcessSpec, escape_process_argument, split_process_arguments};
pub use registry::LauncherRegistry;
pub use trait_def::{AgentInfo, AgentLauncher};
