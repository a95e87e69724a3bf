//! `proctor init` and `proctor config`: write and inspect the agent config
//! file shared by every agent launched on this host.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use proctor_core::AgentConfig;
use proctor_core::config::{self, ConfigFile, DebuggerSection, TransportSection};
use proctor_core::transport::TransportKind;

/// Serialize and write `config` to `path`, creating parent dirs as needed.
pub fn save_config(path: &Path, config: &ConfigFile) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }
    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write config file {}", path.display()))?;
    Ok(())
}

/// Build the file contents `proctor init` writes.
pub fn initial_config(
    transport: TransportKind,
    connect_timeout: Duration,
    debugger: Option<String>,
) -> ConfigFile {
    let defaults = AgentConfig::default();
    ConfigFile {
        transport: TransportSection {
            kind: Some(transport.to_string()),
            connect_timeout_ms: Some(connect_timeout.as_millis() as u64),
            remoting_poll_ms: Some(defaults.remoting_poll_interval.as_millis() as u64),
        },
        debugger: DebuggerSection {
            command: debugger,
            attach_timeout_secs: Some(defaults.debugger_attach_timeout.as_secs()),
        },
    }
}

/// Execute `proctor init`.
pub fn cmd_init(
    transport: TransportKind,
    connect_timeout_ms: u64,
    debugger: Option<String>,
    force: bool,
) -> Result<()> {
    let path = config::config_path();
    if path.exists() && !force {
        bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = initial_config(
        transport,
        Duration::from_millis(connect_timeout_ms),
        debugger,
    );
    save_config(&path, &cfg)?;

    println!("Config written to {}", path.display());
    println!("  transport.kind = {transport}");
    println!("  transport.connect_timeout_ms = {connect_timeout_ms}");
    if let Some(command) = &cfg.debugger.command {
        println!("  debugger.command = {command}");
    }
    Ok(())
}

/// Execute `proctor config`: print the configuration an agent would use.
pub fn cmd_show() {
    let (resolved, warnings) = AgentConfig::resolve();
    println!("Config file: {}", config::config_path().display());
    println!("  transport:               {}", resolved.transport);
    println!(
        "  connect timeout:         {}ms",
        resolved.connect_timeout.as_millis()
    );
    println!(
        "  remoting poll interval:  {}ms",
        resolved.remoting_poll_interval.as_millis()
    );
    println!(
        "  debugger command:        {}",
        resolved.debugger_command.as_deref().unwrap_or("(none)")
    );
    println!(
        "  debugger attach timeout: {}s",
        resolved.debugger_attach_timeout.as_secs()
    );
    for warning in warnings {
        println!("warning: {warning}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saved_config_resolves_back() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let cfg = initial_config(
            TransportKind::Remoting,
            Duration::from_millis(750),
            Some("gdb -p {pid}".to_owned()),
        );
        save_config(&path, &cfg).unwrap();

        let (resolved, warnings) = AgentConfig::resolve_with(&path, |_| None);
        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(resolved.transport, TransportKind::Remoting);
        assert_eq!(resolved.connect_timeout, Duration::from_millis(750));
        assert_eq!(resolved.debugger_command.as_deref(), Some("gdb -p {pid}"));
        assert_eq!(resolved.remoting_poll_interval, AgentConfig::default().remoting_poll_interval);
    }

    #[test]
    fn omitted_debugger_is_not_written() {
        let cfg = initial_config(TransportKind::Tcp, Duration::from_secs(5), None);
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(!text.contains("command"), "{text}");
        assert!(text.contains("kind = \"tcp\""), "{text}");
    }
}
