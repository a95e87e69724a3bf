use std::fmt;

/// Process exit statuses of an agent.
///
/// These values are a contract with the agency, which inspects them to
/// tell a clean stop from each kind of early termination. On Unix the
/// negative values surface modulo 256 (`-1` becomes `255`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum AgentExitCode {
    Ok = 0,
    ParentProcessTerminated = -1,
    FailedToStartRemoteAgent = -2,
    DebuggerSecurityViolation = -3,
    DebuggerNotImplemented = -4,
    UnableToLocateAgency = -5,
    InvalidArguments = -6,
    /// Connection to the agency lost while the agency process, if known,
    /// stayed alive.
    AgencyConnectionLost = -7,
    UnexpectedException = -100,
}

impl AgentExitCode {
    pub const ALL: [AgentExitCode; 9] = [
        AgentExitCode::Ok,
        AgentExitCode::ParentProcessTerminated,
        AgentExitCode::FailedToStartRemoteAgent,
        AgentExitCode::DebuggerSecurityViolation,
        AgentExitCode::DebuggerNotImplemented,
        AgentExitCode::UnableToLocateAgency,
        AgentExitCode::InvalidArguments,
        AgentExitCode::AgencyConnectionLost,
        AgentExitCode::UnexpectedException,
    ];

    /// Numeric status passed to `std::process::exit`.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map an observed exit status back to a named code.
    ///
    /// Accepts both the signed value and its low byte, since that is all a
    /// Unix parent gets to see.
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.code() == code || (c.code() & 0xff) == code)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::ParentProcessTerminated => "PARENT_PROCESS_TERMINATED",
            Self::FailedToStartRemoteAgent => "FAILED_TO_START_REMOTE_AGENT",
            Self::DebuggerSecurityViolation => "DEBUGGER_SECURITY_VIOLATION",
            Self::DebuggerNotImplemented => "DEBUGGER_NOT_IMPLEMENTED",
            Self::UnableToLocateAgency => "UNABLE_TO_LOCATE_AGENCY",
            Self::InvalidArguments => "INVALID_ARGUMENTS",
            Self::AgencyConnectionLost => "AGENCY_CONNECTION_LOST",
            Self::UnexpectedException => "UNEXPECTED_EXCEPTION",
        }
    }
}

impl fmt::Display for AgentExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.code())
    }
}
