//! Legacy request/response binding.
//!
//! Every exchange is its own connection carrying one agent frame and one
//! agency frame. The agency cannot push, so the agent polls for queued
//! commands and delivers each reply in a separate call.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use proctor_wire::{
    AgencyEndpoint, AgencyFrame, AgentCommand, AgentFrame, CommandReply, QueuedCommand, WireError,
    read_frame, write_frame,
};
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::trait_def::{AgentTransport, CommandHandler};
use super::types::{AgentIdentity, StopSignal, TransportKind};
use super::{SHUTDOWN_GRACE, is_protocol_error, wait_unless_disconnected};

/// Consecutive failed polls after which the agency is presumed gone.
pub const MAX_POLL_FAILURES: u32 = 10;

/// Agent side of the remoting binding.
pub struct RemotingTransport {
    client: Client,
    poll_interval: Duration,
    handler: Arc<dyn CommandHandler>,
    stop: StopSignal,
    disconnected: StopSignal,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RemotingTransport {
    pub fn new(
        identity: AgentIdentity,
        endpoint: AgencyEndpoint,
        connect_timeout: Duration,
        poll_interval: Duration,
        handler: Arc<dyn CommandHandler>,
    ) -> Self {
        Self {
            client: Client {
                identity,
                endpoint,
                timeout: connect_timeout,
            },
            poll_interval,
            handler,
            stop: StopSignal::new(),
            disconnected: StopSignal::new(),
            cancel: CancellationToken::new(),
            task: None,
        }
    }
}

#[async_trait]
impl AgentTransport for RemotingTransport {
    fn name(&self) -> &str {
        "remoting"
    }

    async fn start(&mut self) -> Result<bool> {
        let register = AgentFrame::Register {
            agent_id: self.client.identity.agent_id,
            pid: self.client.identity.pid,
            binding: TransportKind::Remoting.binding(),
        };
        let endpoint = &self.client.endpoint;
        match self.client.call(&register).await {
            Ok(AgencyFrame::Ack) => {}
            Ok(AgencyFrame::Reject { reason }) => {
                tracing::warn!(agency = %endpoint, %reason, "agency rejected registration");
                return Ok(false);
            }
            Ok(other) => {
                return Err(anyhow!(
                    "unexpected registration answer from {endpoint}: {other:?}"
                ));
            }
            Err(e) if is_protocol_error(&e) => {
                return Err(anyhow!(e).context(format!("malformed registration answer from {endpoint}")));
            }
            Err(e) => {
                tracing::warn!(agency = %endpoint, error = %e, "cannot register with agency");
                return Ok(false);
            }
        }
        tracing::info!(
            agent_id = %self.client.identity.agent_id,
            agency = %endpoint,
            "registered with agency"
        );

        let poller = Poller {
            client: self.client.clone(),
            poll_interval: self.poll_interval,
            handler: Arc::clone(&self.handler),
            stop: self.stop.clone(),
            disconnected: self.disconnected.clone(),
            cancel: self.cancel.clone(),
        };
        self.task = Some(tokio::spawn(poller.run()));
        Ok(true)
    }

    async fn wait_for_stop(&self, timeout: Duration) -> bool {
        wait_unless_disconnected(&self.stop, &self.disconnected, timeout).await
    }

    fn is_disconnected(&self) -> bool {
        self.disconnected.is_raised()
    }

    async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Client {
    identity: AgentIdentity,
    endpoint: AgencyEndpoint,
    timeout: Duration,
}

impl Client {
    /// One request/response exchange on a fresh connection.
    async fn call(&self, frame: &AgentFrame) -> Result<AgencyFrame, WireError> {
        match tokio::time::timeout(self.timeout, self.exchange(frame)).await {
            Ok(result) => result,
            Err(_) => Err(WireError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("no answer from {} within {:?}", self.endpoint, self.timeout),
            ))),
        }
    }

    async fn exchange(&self, frame: &AgentFrame) -> Result<AgencyFrame, WireError> {
        let stream = TcpStream::connect(self.endpoint.socket_addr()).await?;
        let (read, mut write) = stream.into_split();
        write_frame(&mut write, frame).await?;
        let mut reader = BufReader::new(read);
        read_frame(&mut reader).await?.ok_or_else(|| {
            WireError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "agency closed the connection without answering",
            ))
        })
    }

    async fn reply(&self, request_id: u64, reply: CommandReply) -> Result<(), WireError> {
        let frame = AgentFrame::Reply {
            agent_id: self.identity.agent_id,
            request_id,
            reply,
        };
        match self.call(&frame).await? {
            AgencyFrame::Ack => Ok(()),
            other => {
                tracing::warn!(request_id, frame = ?other, "unexpected answer to reply");
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Poll loop
// ---------------------------------------------------------------------------

struct Poller {
    client: Client,
    poll_interval: Duration,
    handler: Arc<dyn CommandHandler>,
    stop: StopSignal,
    disconnected: StopSignal,
    cancel: CancellationToken,
}

impl Poller {
    async fn run(self) {
        let poll = AgentFrame::Poll {
            agent_id: self.client.identity.agent_id,
        };
        let mut failures = 0u32;

        loop {
            let answer = tokio::select! {
                _ = self.cancel.cancelled() => return,
                answer = self.client.call(&poll) => answer,
            };

            let items = match answer {
                Ok(AgencyFrame::Commands { items }) => {
                    failures = 0;
                    items
                }
                Ok(AgencyFrame::Idle) => {
                    failures = 0;
                    Vec::new()
                }
                Ok(other) => {
                    failures = 0;
                    tracing::warn!(frame = ?other, "ignoring unexpected poll answer");
                    Vec::new()
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(error = %e, failures, "poll failed");
                    if failures >= MAX_POLL_FAILURES {
                        tracing::warn!("agency unreachable; giving up polling");
                        self.disconnected.raise();
                        return;
                    }
                    Vec::new()
                }
            };

            for QueuedCommand {
                request_id,
                command,
            } in items
            {
                if self.execute(request_id, command).await {
                    return;
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Run one command and deliver its reply. Returns `true` once the loop
    /// should end.
    async fn execute(&self, request_id: u64, command: AgentCommand) -> bool {
        tracing::debug!(request_id, command = command.kind(), "command received");
        let stopping = command == AgentCommand::Stop;
        let reply = if stopping {
            CommandReply::Stopping
        } else {
            tokio::select! {
                _ = self.cancel.cancelled() => return true,
                reply = self.handler.handle(command) => reply,
            }
        };

        if let Err(e) = self.client.reply(request_id, reply).await {
            tracing::warn!(request_id, error = %e, "failed to deliver reply");
        }
        if stopping {
            tracing::info!("stop requested by agency");
            self.stop.raise();
        }
        stopping
    }
}
