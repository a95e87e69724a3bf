//! `proctor run`: launch one agent, drive it through the agency, report
//! how it exited.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use uuid::Uuid;

use proctor_core::AgentExitCode;
use proctor_core::config::TRANSPORT_ENV;
use proctor_core::transport::TransportKind;
use proctor_wire::{AgentCommand, CommandReply};

use crate::agency::Agency;
use crate::launch::LaunchArgs;

/// How long the agent gets to answer `stop` and exit.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RunOptions {
    pub launch: LaunchArgs,
    pub workload: Option<PathBuf>,
    pub transport: Option<TransportKind>,
    pub timeout: Duration,
}

/// Run the command. Returns the agent's exit code when it exited normally.
pub async fn run_agent(options: RunOptions) -> Result<Option<i32>> {
    let agency = Agency::bind().await?;
    let agent_id = Uuid::new_v4();
    let (launcher, spec) = options.launch.process(agent_id, agency.url())?;

    let mut command = spec.command();
    if let Some(kind) = options.transport {
        command.env(TRANSPORT_ENV, kind.to_string());
    }
    let mut child = command
        .spawn()
        .with_context(|| format!("failed to start agent {}", spec.program.display()))?;

    println!(
        "Launched agent {agent_id} via {launcher} (pid {})",
        child.id().unwrap_or_default()
    );
    println!("  Agency: {}", agency.url());

    let registration = tokio::select! {
        status = child.wait() => {
            let status = status.context("failed to wait for agent")?;
            bail!("agent exited before registering: {}", describe_status(status));
        }
        session = tokio::time::timeout(options.timeout, agency.accept_registration(agent_id)) => session,
    };
    let mut session = match registration {
        Ok(session) => session?,
        Err(_) => {
            child.kill().await.ok();
            bail!(
                "agent did not register within {}s",
                options.timeout.as_secs()
            );
        }
    };
    println!(
        "Agent registered (pid {}, {} binding)",
        session.pid(),
        session.binding()
    );

    if let Some(workload) = &options.workload {
        let workload = std::path::absolute(workload)
            .with_context(|| format!("invalid workload path {}", workload.display()))?;
        println!("Running workload {}", workload.display());

        let reply = tokio::time::timeout(options.timeout, session.send(AgentCommand::Run { workload }))
            .await
            .context("timed out waiting for the workload to finish")??;
        match reply {
            CommandReply::Completed { summary } => println!("  {summary}"),
            CommandReply::Failed { message } => println!("  Workload failed: {message}"),
            other => println!("  Unexpected reply: {other:?}"),
        }
    }

    let reply = tokio::time::timeout(STOP_TIMEOUT, session.send(AgentCommand::Stop))
        .await
        .context("timed out waiting for the agent to acknowledge stop")??;
    tracing::debug!(?reply, "stop acknowledged");
    drop(session);

    let status = match tokio::time::timeout(STOP_TIMEOUT, child.wait()).await {
        Ok(status) => status.context("failed to wait for agent")?,
        Err(_) => {
            child.kill().await.ok();
            bail!("agent did not exit within {}s of stop", STOP_TIMEOUT.as_secs());
        }
    };
    println!("Agent exited: {}", describe_status(status));
    Ok(agent_exit_code(status))
}

/// The agent's exit code with Unix low-byte truncation undone.
pub fn agent_exit_code(status: ExitStatus) -> Option<i32> {
    let code = status.code()?;
    if cfg!(unix) {
        Some(i32::from(code as u8 as i8))
    } else {
        Some(code)
    }
}

fn describe_status(status: ExitStatus) -> String {
    match agent_exit_code(status) {
        Some(code) => match AgentExitCode::from_code(code) {
            Some(named) => named.to_string(),
            None => format!("exit code {code}"),
        },
        None => "terminated by signal".to_owned(),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::process::ExitStatusExt;

    use super::*;

    fn exited(code: i32) -> ExitStatus {
        ExitStatus::from_raw(code << 8)
    }

    #[test]
    fn low_byte_maps_back_to_negative_codes() {
        for code in AgentExitCode::ALL {
            let status = exited(code.code() & 0xff);
            assert_eq!(agent_exit_code(status), Some(code.code()), "{code}");
        }
    }

    #[test]
    fn failure_counts_stay_positive() {
        assert_eq!(agent_exit_code(exited(3)), Some(3));
        assert_eq!(agent_exit_code(exited(127)), Some(127));
    }

    #[test]
    fn describes_named_and_plain_codes() {
        assert_eq!(
            describe_status(exited(255)),
            "PARENT_PROCESS_TERMINATED (-1)"
        );
        assert_eq!(describe_status(exited(2)), "exit code 2");
        assert_eq!(
            describe_status(ExitStatus::from_raw(9)),
            "terminated by signal"
        );
    }
}
