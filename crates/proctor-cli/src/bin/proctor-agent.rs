//! Agent entry point.
//!
//! ```text
//! proctor-agent --agentId=<uuid> --agencyUrl=<url> [--pid=<pid>] [--trace=<level>]
//!               [--debug-agent] [--debug-tests] [--work=<dir>]
//! proctor-agent [--pid=<pid>] [--trace=<level>] [--work=<dir>] <workload file>
//! ```
//!
//! The process exit status is the agent exit code (or, for a direct run,
//! the number of failed tests).

use proctor_core::{AgentConfig, AgentExitCode, AgentOptions, AgentRuntime, RuntimeEnv};

#[tokio::main]
async fn main() {
    let options = match AgentOptions::parse(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("proctor-agent: {e}");
            std::process::exit(AgentExitCode::InvalidArguments.code());
        }
    };

    // Tracing is not up yet; the runtime installs it from the options.
    let (config, warnings) = AgentConfig::resolve();
    for warning in &warnings {
        eprintln!("proctor-agent: {warning}");
    }

    let env = RuntimeEnv::for_host(&config, options.work_directory());
    let report = AgentRuntime::new("proctor-agent", options, env).run().await;
    std::process::exit(report.exit_code);
}
