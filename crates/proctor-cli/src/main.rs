mod agency;
mod config;
mod launch;
mod run_cmd;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use proctor_core::transport::TransportKind;

use launch::LaunchArgs;
use run_cmd::RunOptions;

#[derive(Parser)]
#[command(name = "proctor", about = "Launch and supervise test agent processes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an agent config file
    Init {
        /// Transport binding agents use: tcp or remoting
        #[arg(long, default_value = "tcp")]
        transport: TransportKind,
        /// Agency connect timeout in milliseconds
        #[arg(long, default_value_t = 5000)]
        connect_timeout_ms: u64,
        /// Debugger command line, with {pid} for the agent's process id
        #[arg(long)]
        debugger: Option<String>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Show the configuration agents on this host resolve to
    Config,
    /// Print the command line a launcher would use for a runtime
    CommandLine {
        #[command(flatten)]
        launch: LaunchArgs,
        /// Agency URL to embed
        #[arg(long, default_value = "tcp://127.0.0.1:0/ProctorAgency")]
        agency_url: String,
    },
    /// Launch an agent, optionally run a workload in it, then stop it
    Run {
        #[command(flatten)]
        launch: LaunchArgs,
        /// Workload file to send to the agent
        #[arg(long)]
        workload: Option<PathBuf>,
        /// Override the agent's transport binding
        #[arg(long)]
        transport: Option<TransportKind>,
        /// Seconds to wait for registration and for the workload
        #[arg(long, default_value_t = 300)]
        timeout: u64,
    },
}

/// Execute `proctor command-line`.
fn cmd_command_line(launch: &LaunchArgs, agency_url: &str) -> anyhow::Result<()> {
    let (launcher, spec) = launch.process(Uuid::new_v4(), agency_url)?;
    println!("Launcher:  {launcher}");
    println!("Program:   {}", spec.program.display());
    println!("Arguments: {}", spec.arguments);
    println!("Directory: {}", spec.working_dir.display());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            transport,
            connect_timeout_ms,
            debugger,
            force,
        } => {
            config::cmd_init(transport, connect_timeout_ms, debugger, force)?;
        }
        Commands::Config => {
            config::cmd_show();
        }
        Commands::CommandLine { launch, agency_url } => {
            cmd_command_line(&launch, &agency_url)?;
        }
        Commands::Run {
            launch,
            workload,
            transport,
            timeout,
        } => {
            let code = run_cmd::run_agent(RunOptions {
                launch,
                workload,
                transport,
                timeout: Duration::from_secs(timeout),
            })
            .await?;
            if code != Some(0) {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
