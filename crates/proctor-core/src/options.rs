//! The agent command-line contract.
//!
//! Every agent binary accepts the same flags, parsed by [`AgentOptions::parse`]
//! in a single left-to-right pass:
//!
//! ```text
//! proctor-agent [--agentId=<uuid>] [--agencyUrl=<url>] [--debug-agent] [--debug-tests]
//!               [--trace=<Off|Error|Warning|Info|Debug>] [--pid=<int>] [--work=<path>]
//!               [<workload-file>]
//! ```
//!
//! A value may be given inline after `=` or `:`, or as the following token.
//! When a flag is repeated the first occurrence wins; later ones are still
//! validated.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use uuid::Uuid;

/// Prefix that marks a token as a flag.
pub const FLAG_PREFIX: &str = "--";

const VALUE_DELIMITERS: [char; 2] = ['=', ':'];

/// Recognized flag names and whether each takes a value.
const RECOGNIZED_OPTIONS: &[(&str, bool)] = &[
    ("agentId", true),
    ("agencyUrl", true),
    ("debug-agent", false),
    ("debug-tests", false),
    ("trace", true),
    ("pid", true),
    ("work", true),
];

fn option_takes_value(name: &str) -> Option<bool> {
    RECOGNIZED_OPTIONS
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, takes_value)| *takes_value)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Construction-time failures of [`AgentOptions::parse`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionsError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("option requires a value: {0}")]
    ValueRequired(String),

    #[error("option does not take a value: {0}")]
    ValueNotAllowed(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("only one file argument is allowed but {0} were supplied")]
    TooManyFiles(usize),

    #[error("invalid agent id: {0}")]
    InvalidAgentId(String),

    #[error("invalid trace level: {0}")]
    InvalidTraceLevel(String),
}

// ---------------------------------------------------------------------------
// Trace level
// ---------------------------------------------------------------------------

/// Diagnostic verbosity requested on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TraceLevel {
    #[default]
    Off,
    Error,
    Warning,
    Info,
    Debug,
}

impl TraceLevel {
    /// All levels, least verbose first.
    pub const ALL: [TraceLevel; 5] = [
        TraceLevel::Off,
        TraceLevel::Error,
        TraceLevel::Warning,
        TraceLevel::Info,
        TraceLevel::Debug,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "Off",
            Self::Error => "Error",
            Self::Warning => "Warning",
            Self::Info => "Info",
            Self::Debug => "Debug",
        }
    }
}

impl fmt::Display for TraceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TraceLevel {
    type Err = OptionsError;

    /// Level names are matched without regard to case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| OptionsError::InvalidTraceLevel(s.to_owned()))
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Validated agent configuration, built once from the process arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentOptions {
    agent_id: Option<Uuid>,
    agency_url: String,
    agency_pid: String,
    debug_agent: bool,
    debug_tests: bool,
    trace_level: TraceLevel,
    work_directory: String,
    files: Vec<PathBuf>,
}

/// Per-field "already assigned" tracking for first-wins semantics.
#[derive(Default)]
struct Assigned {
    agent_id: bool,
    agency_url: bool,
    agency_pid: bool,
    trace_level: bool,
    work_directory: bool,
}

impl AgentOptions {
    /// Parse a raw argument vector (program name excluded).
    pub fn parse<I, S>(args: I) -> Result<Self, OptionsError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|a| a.as_ref().to_owned()).collect();
        let mut options = Self::default();
        let mut assigned = Assigned::default();

        let mut i = 0;
        while i < args.len() {
            let arg = &args[i];

            if let Some(option) = arg.strip_prefix(FLAG_PREFIX) {
                let (name, inline) = split_option(option);
                let takes_value = option_takes_value(name)
                    .ok_or_else(|| OptionsError::InvalidArgument(arg.clone()))?;

                let value = if takes_value {
                    match inline {
                        Some(v) => Some(v.to_owned()),
                        None if i + 1 < args.len() => {
                            i += 1;
                            Some(args[i].clone())
                        }
                        None => return Err(OptionsError::ValueRequired(arg.clone())),
                    }
                } else if inline.is_some() {
                    return Err(OptionsError::ValueNotAllowed(arg.clone()));
                } else {
                    None
                };

                options.apply(name, value, arg, &mut assigned)?;
            } else if Path::new(arg).is_file() {
                options.files.push(PathBuf::from(arg));
            } else {
                return Err(OptionsError::FileNotFound(arg.clone()));
            }

            i += 1;
        }

        if options.files.len() > 1 {
            return Err(OptionsError::TooManyFiles(options.files.len()));
        }

        Ok(options)
    }

    fn apply(
        &mut self,
        name: &str,
        value: Option<String>,
        arg: &str,
        assigned: &mut Assigned,
    ) -> Result<(), OptionsError> {
        let value = value.unwrap_or_default();
        match name {
            "agentId" => {
                let id = Uuid::parse_str(value.trim())
                    .map_err(|_| OptionsError::InvalidAgentId(value.clone()))?;
                if !assigned.agent_id {
                    self.agent_id = Some(id);
                    assigned.agent_id = true;
                }
            }
            "agencyUrl" => {
                if !assigned.agency_url {
                    self.agency_url = value;
                    assigned.agency_url = true;
                }
            }
            "debug-agent" => self.debug_agent = true,
            "debug-tests" => self.debug_tests = true,
            "trace" => {
                let level: TraceLevel = value.parse()?;
                if !assigned.trace_level {
                    self.trace_level = level;
                    assigned.trace_level = true;
                }
            }
            "pid" => {
                if !assigned.agency_pid {
                    self.agency_pid = value;
                    assigned.agency_pid = true;
                }
            }
            "work" => {
                if !assigned.work_directory {
                    self.work_directory = value;
                    assigned.work_directory = true;
                }
            }
            _ => return Err(OptionsError::InvalidArgument(arg.to_owned())),
        }
        Ok(())
    }

    /// Agent identity; required in registration mode.
    pub fn agent_id(&self) -> Option<Uuid> {
        self.agent_id
    }

    /// Agency address; empty selects direct mode.
    pub fn agency_url(&self) -> &str {
        &self.agency_url
    }

    /// Parent agency pid as given on the command line (may be empty).
    pub fn agency_pid(&self) -> &str {
        &self.agency_pid
    }

    pub fn debug_agent(&self) -> bool {
        self.debug_agent
    }

    pub fn debug_tests(&self) -> bool {
        self.debug_tests
    }

    pub fn trace_level(&self) -> TraceLevel {
        self.trace_level
    }

    /// Directory for the log file; empty means the current directory.
    pub fn work_directory(&self) -> &str {
        &self.work_directory
    }

    /// Workload files (never more than one).
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// `true` when an agency URL was supplied.
    pub fn is_registration_mode(&self) -> bool {
        !self.agency_url.is_empty()
    }

    /// `true` when either debug flag asks for a debugger.
    pub fn wants_debugger(&self) -> bool {
        self.debug_agent || self.debug_tests
    }
}

/// Split `name=value` / `name:value` on the first delimiter.
///
/// A delimiter in first position does not split, so `--=x` is looked up
/// as the (unknown) option `=x`.
fn split_option(option: &str) -> (&str, Option<&str>) {
    match option.find(VALUE_DELIMITERS) {
        Some(pos) if pos > 0 => (&option[..pos], Some(&option[pos + 1..])),
        _ => (option, None),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
