//! Agent configuration file.
//!
//! An optional TOML file at `~/.config/proctor/config.toml` supplies the
//! settings the command-line contract does not carry. Resolution chain:
//! env var > config file > default. Ambient configuration never stops an
//! agent from starting; bad values are reported and replaced by defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transport::TransportKind;

pub const TRANSPORT_ENV: &str = "PROCTOR_TRANSPORT";
pub const CONNECT_TIMEOUT_ENV: &str = "PROCTOR_CONNECT_TIMEOUT_MS";
pub const DEBUGGER_ENV: &str = "PROCTOR_DEBUGGER";

/// Errors reading or parsing the config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub transport: TransportSection,
    #[serde(default)]
    pub debugger: DebuggerSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TransportSection {
    /// `tcp` or `remoting`.
    pub kind: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub remoting_poll_ms: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DebuggerSection {
    /// Command line with `{pid}` placeholders, e.g. `gdb -p {pid}`.
    pub command: Option<String>,
    pub attach_timeout_secs: Option<u64>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// `$XDG_CONFIG_HOME/proctor` or `~/.config/proctor`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.trim().is_empty() {
            return PathBuf::from(xdg).join("proctor");
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("proctor")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Load the config file at `path`. A missing file yields `Ok(None)`.
pub fn load_config_from(path: &Path) -> Result<Option<ConfigFile>, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    toml::from_str(&contents)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved agent configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub transport: TransportKind,
    pub connect_timeout: Duration,
    pub remoting_poll_interval: Duration,
    pub debugger_command: Option<String>,
    pub debugger_attach_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::preferred_for_host(),
            connect_timeout: Duration::from_millis(5000),
            remoting_poll_interval: Duration::from_millis(200),
            debugger_command: None,
            debugger_attach_timeout: Duration::from_secs(30),
        }
    }
}

impl AgentConfig {
    /// Resolve from the environment and the default config file location.
    ///
    /// Problems are returned as warnings alongside the config rather than
    /// as an error.
    pub fn resolve() -> (Self, Vec<String>) {
        Self::resolve_with(&config_path(), |key| std::env::var(key).ok())
    }

    /// Resolve with an explicit file path and env lookup (testable without
    /// touching process state).
    pub fn resolve_with(
        path: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> (Self, Vec<String>) {
        let mut warnings = Vec::new();
        let file = match load_config_from(path) {
            Ok(file) => file.unwrap_or_default(),
            Err(e) => {
                warnings.push(e.to_string());
                ConfigFile::default()
            }
        };

        let mut cfg = Self::default();

        let kind = env(TRANSPORT_ENV).or(file.transport.kind);
        if let Some(kind) = kind.filter(|k| !k.trim().is_empty()) {
            match kind.parse() {
                Ok(kind) => cfg.transport = kind,
                Err(e) => warnings.push(format!("{e}; using {}", cfg.transport)),
            }
        }

        match env(CONNECT_TIMEOUT_ENV) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => cfg.connect_timeout = Duration::from_millis(ms),
                _ => warnings.push(format!("invalid {CONNECT_TIMEOUT_ENV}: {raw:?}")),
            },
            None => {
                if let Some(ms) = file.transport.connect_timeout_ms.filter(|ms| *ms > 0) {
                    cfg.connect_timeout = Duration::from_millis(ms);
                }
            }
        }

        if let Some(ms) = file.transport.remoting_poll_ms.filter(|ms| *ms > 0) {
            cfg.remoting_poll_interval = Duration::from_millis(ms);
        }

        cfg.debugger_command = env(DEBUGGER_ENV)
            .or(file.debugger.command)
            .filter(|c| !c.trim().is_empty());
        if let Some(secs) = file.debugger.attach_timeout_secs.filter(|s| *s > 0) {
            cfg.debugger_attach_timeout = Duration::from_secs(secs);
        }

        (cfg, warnings)
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
