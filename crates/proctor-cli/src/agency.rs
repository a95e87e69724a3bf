//! A minimal agency: accepts one agent's registration and sends it
//! commands over whichever binding the agent chose.

use anyhow::{Context, Result, bail};
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use uuid::Uuid;

use proctor_wire::{
    AgencyFrame, AgentCommand, AgentFrame, BindingKind, CommandReply, QueuedCommand, read_frame,
    write_frame,
};

type Connection = (BufReader<OwnedReadHalf>, OwnedWriteHalf);

/// Listener on an ephemeral loopback port.
pub struct Agency {
    listener: TcpListener,
    url: String,
}

impl Agency {
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind agency listener")?;
        let addr = listener
            .local_addr()
            .context("agency listener has no local address")?;
        Ok(Self {
            listener,
            url: format!("tcp://{addr}/ProctorAgency"),
        })
    }

    /// URL to hand to agents as `--agencyUrl`.
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn accept(&self) -> Result<Connection> {
        let (stream, _) = self
            .listener
            .accept()
            .await
            .context("failed to accept agent connection")?;
        let (read, write) = stream.into_split();
        Ok((BufReader::new(read), write))
    }

    /// Wait until `agent_id` registers. Other agents are rejected.
    pub async fn accept_registration(&self, agent_id: Uuid) -> Result<AgentSession<'_>> {
        loop {
            let (mut reader, mut writer) = self.accept().await?;
            let frame = match read_frame::<_, AgentFrame>(&mut reader).await {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "unreadable frame before registration");
                    continue;
                }
            };

            match frame {
                AgentFrame::Register {
                    agent_id: id,
                    pid,
                    binding,
                } if id == agent_id => {
                    write_frame(&mut writer, &AgencyFrame::Ack)
                        .await
                        .context("failed to acknowledge registration")?;
                    tracing::info!(%agent_id, pid, %binding, "agent registered");
                    let connection = match binding {
                        BindingKind::Streaming => Some((reader, writer)),
                        BindingKind::Remoting => None,
                    };
                    return Ok(AgentSession {
                        agency: self,
                        pid,
                        binding,
                        connection,
                        next_request: 1,
                    });
                }
                AgentFrame::Register { agent_id: id, .. } => {
                    tracing::warn!(agent_id = %id, "rejecting unknown agent");
                    let reject = AgencyFrame::Reject {
                        reason: format!("agent {id} was not launched by this agency"),
                    };
                    write_frame(&mut writer, &reject).await.ok();
                }
                other => {
                    tracing::warn!(frame = ?other, "ignoring frame before registration");
                }
            }
        }
    }
}

/// A registered agent.
pub struct AgentSession<'a> {
    agency: &'a Agency,
    pid: u32,
    binding: BindingKind,
    /// The registration connection, kept open for streaming agents.
    connection: Option<Connection>,
    next_request: u64,
}

impl AgentSession<'_> {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn binding(&self) -> BindingKind {
        self.binding
    }

    /// Send `command` and wait for its reply.
    pub async fn send(&mut self, command: AgentCommand) -> Result<CommandReply> {
        let request_id = self.next_request;
        self.next_request += 1;
        tracing::debug!(request_id, command = command.kind(), "sending command");

        match &mut self.connection {
            Some((reader, writer)) => {
                write_frame(writer, &AgencyFrame::Command { request_id, command })
                    .await
                    .context("failed to send command")?;
                loop {
                    match read_frame::<_, AgentFrame>(reader)
                        .await
                        .context("failed to read reply")?
                    {
                        Some(AgentFrame::Reply {
                            request_id: id,
                            reply,
                            ..
                        }) if id == request_id => return Ok(reply),
                        Some(other) => {
                            tracing::warn!(frame = ?other, "ignoring unexpected frame");
                        }
                        None => bail!("agent closed the connection before replying"),
                    }
                }
            }
            None => queue_and_wait(self.agency, request_id, command).await,
        }
    }
}

/// Remoting: hand the command out on the next poll and wait for the reply
/// call that answers it.
async fn queue_and_wait(
    agency: &Agency,
    request_id: u64,
    command: AgentCommand,
) -> Result<CommandReply> {
    let mut pending = Some(QueuedCommand {
        request_id,
        command,
    });
    loop {
        let (mut reader, mut writer) = agency.accept().await?;
        let Some(frame) = read_frame::<_, AgentFrame>(&mut reader)
            .await
            .context("failed to read agent call")?
        else {
            continue;
        };

        let answer = match frame {
            AgentFrame::Poll { .. } => match pending.take() {
                Some(item) => AgencyFrame::Commands { items: vec![item] },
                None => AgencyFrame::Idle,
            },
            AgentFrame::Reply {
                request_id: id,
                reply,
                ..
            } if id == request_id => {
                write_frame(&mut writer, &AgencyFrame::Ack)
                    .await
                    .context("failed to acknowledge reply")?;
                return Ok(reply);
            }
            AgentFrame::Reply { request_id: id, .. } => {
                tracing::warn!(request_id = id, "ignoring reply to unknown request");
                AgencyFrame::Ack
            }
            AgentFrame::Register { .. } => AgencyFrame::Reject {
                reason: "already registered".to_owned(),
            },
        };
        write_frame(&mut writer, &answer)
            .await
            .context("failed to answer agent call")?;
    }
}
