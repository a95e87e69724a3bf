//! Per-process log file setup for agents.
//!
//! Each agent writes `proctor-agent_<pid>.log` into its work directory.
//! Logging is best-effort: any failure is reported on stderr and the agent
//! carries on without a subscriber.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use crate::options::TraceLevel;

/// Environment variable holding an `EnvFilter` directive that overrides
/// the `--trace` level.
pub const LOG_FILTER_ENV: &str = "PROCTOR_LOG";

/// File name prefix; the pid is appended.
pub const LOG_FILE_PREFIX: &str = "proctor-agent";

impl From<TraceLevel> for LevelFilter {
    fn from(level: TraceLevel) -> Self {
        match level {
            TraceLevel::Off => LevelFilter::OFF,
            TraceLevel::Error => LevelFilter::ERROR,
            TraceLevel::Warning => LevelFilter::WARN,
            TraceLevel::Info => LevelFilter::INFO,
            TraceLevel::Debug => LevelFilter::DEBUG,
        }
    }
}

/// Path of the log file for `pid` under `work_directory` (current
/// directory when empty).
pub fn log_file_path(work_directory: &str, pid: u32) -> PathBuf {
    let dir = if work_directory.is_empty() {
        Path::new(".")
    } else {
        Path::new(work_directory)
    };
    dir.join(format!("{LOG_FILE_PREFIX}_{pid}.log"))
}

/// Install the global subscriber writing to the agent log file.
///
/// Returns the log path when a subscriber was installed, `None` when
/// tracing is off or could not be initialized.
pub fn init_tracing(work_directory: &str, level: TraceLevel) -> Option<PathBuf> {
    let filter = match std::env::var(LOG_FILTER_ENV) {
        Ok(directive) if !directive.trim().is_empty() => match EnvFilter::try_new(&directive) {
            Ok(filter) => filter,
            Err(e) => {
                eprintln!("proctor-agent: ignoring invalid {LOG_FILTER_ENV}: {e}");
                EnvFilter::default().add_directive(LevelFilter::from(level).into())
            }
        },
        _ => {
            if level == TraceLevel::Off {
                return None;
            }
            EnvFilter::default().add_directive(LevelFilter::from(level).into())
        }
    };

    let path = log_file_path(work_directory, std::process::id());
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            eprintln!(
                "proctor-agent: cannot create log directory {}: {e}",
                parent.display()
            );
            return None;
        }
    }
    let file = match File::create(&path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("proctor-agent: cannot open log file {}: {e}", path.display());
            return None;
        }
    };

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_thread_names(true)
        .try_init();
    if let Err(e) = installed {
        eprintln!("proctor-agent: tracing already initialized: {e}");
        return None;
    }

    Some(path)
}
