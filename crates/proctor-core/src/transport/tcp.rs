//! Streaming binding: one persistent TCP connection per agent.
//!
//! ```text
//! agent                         agency
//!   | -- register -------------> |
//!   | <------------------- ack -- |
//!   | <--------------- command -- |   (repeated)
//!   | -- reply ----------------> |
//!   | <---------- command(stop) -- |
//!   | -- reply(stopping) ------> |
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use proctor_wire::{
    AgencyEndpoint, AgencyFrame, AgentCommand, AgentFrame, CommandReply, WireError, read_frame,
    write_frame,
};
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::trait_def::{AgentTransport, CommandHandler};
use super::types::{AgentIdentity, StopSignal, TransportKind};
use super::{SHUTDOWN_GRACE, is_protocol_error, wait_unless_disconnected};

/// Agent side of the streaming binding.
pub struct TcpTransport {
    identity: AgentIdentity,
    endpoint: AgencyEndpoint,
    connect_timeout: Duration,
    handler: Arc<dyn CommandHandler>,
    stop: StopSignal,
    disconnected: StopSignal,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TcpTransport {
    pub fn new(
        identity: AgentIdentity,
        endpoint: AgencyEndpoint,
        connect_timeout: Duration,
        handler: Arc<dyn CommandHandler>,
    ) -> Self {
        Self {
            identity,
            endpoint,
            connect_timeout,
            handler,
            stop: StopSignal::new(),
            disconnected: StopSignal::new(),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Connect and register. `Ok(None)` when the agency is unreachable or
    /// declines.
    async fn handshake(&self) -> Result<Option<(BufReader<OwnedReadHalf>, OwnedWriteHalf)>> {
        let addr = self.endpoint.socket_addr();
        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                tracing::warn!(agency = %self.endpoint, error = %e, "cannot connect to agency");
                return Ok(None);
            }
            Err(_) => {
                tracing::warn!(
                    agency = %self.endpoint,
                    timeout_ms = self.connect_timeout.as_millis() as u64,
                    "timed out connecting to agency"
                );
                return Ok(None);
            }
        };
        stream.set_nodelay(true).ok();

        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);

        let register = AgentFrame::Register {
            agent_id: self.identity.agent_id,
            pid: self.identity.pid,
            binding: TransportKind::Tcp.binding(),
        };
        if let Err(e) = write_frame(&mut write, &register).await {
            tracing::warn!(agency = %self.endpoint, error = %e, "failed to send registration");
            return Ok(None);
        }

        let answer =
            tokio::time::timeout(self.connect_timeout, read_frame::<_, AgencyFrame>(&mut reader))
                .await;
        match answer {
            Ok(Ok(Some(AgencyFrame::Ack))) => Ok(Some((reader, write))),
            Ok(Ok(Some(AgencyFrame::Reject { reason }))) => {
                tracing::warn!(agency = %self.endpoint, %reason, "agency rejected registration");
                Ok(None)
            }
            Ok(Ok(Some(other))) => Err(anyhow!(
                "unexpected handshake frame from {}: {other:?}",
                self.endpoint
            )),
            Ok(Ok(None)) => {
                tracing::warn!(agency = %self.endpoint, "agency closed connection during handshake");
                Ok(None)
            }
            Ok(Err(e)) if is_protocol_error(&e) => {
                Err(anyhow!(e).context(format!("malformed handshake from {}", self.endpoint)))
            }
            Ok(Err(e)) => {
                tracing::warn!(agency = %self.endpoint, error = %e, "handshake failed");
                Ok(None)
            }
            Err(_) => {
                tracing::warn!(agency = %self.endpoint, "timed out waiting for registration ack");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl AgentTransport for TcpTransport {
    fn name(&self) -> &str {
        "tcp"
    }

    async fn start(&mut self) -> Result<bool> {
        let Some((reader, writer)) = self.handshake().await? else {
            return Ok(false);
        };
        tracing::info!(
            agent_id = %self.identity.agent_id,
            agency = %self.endpoint,
            "registered with agency"
        );

        let session = Session {
            identity: self.identity,
            handler: Arc::clone(&self.handler),
            stop: self.stop.clone(),
            disconnected: self.disconnected.clone(),
            cancel: self.cancel.clone(),
        };
        self.task = Some(tokio::spawn(session.serve(reader, writer)));
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

/// Background command loop for one registered connection.
struct Session {
    identity: AgentIdentity,
    handler: Arc<dyn CommandHandler>,
    stop: StopSignal,
    disconnected: StopSignal,
    cancel: CancellationToken,
}

impl Session {
    async fn serve(self, mut reader: BufReader<OwnedReadHalf>, mut writer: OwnedWriteHalf) {
        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => return,
                frame = read_frame::<_, AgencyFrame>(&mut reader) => frame,
            };

            let (request_id, command) = match frame {
                Ok(Some(AgencyFrame::Command {
                    request_id,
                    command,
                })) => (request_id, command),
                Ok(Some(other)) => {
                    tracing::warn!(frame = ?other, "ignoring unexpected frame");
                    continue;
                }
                Ok(None) => {
                    tracing::warn!("agency closed the connection");
                    self.disconnected.raise();
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "lost connection to agency");
                    self.disconnected.raise();
                    return;
                }
            };

            tracing::debug!(request_id, command = command.kind(), "command received");
            let stopping = command == AgentCommand::Stop;
            let reply = if stopping {
                CommandReply::Stopping
            } else {
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    reply = self.handler.handle(command) => reply,
                }
            };

            if let Err(e) = self.send_reply(&mut writer, request_id, reply).await {
                tracing::warn!(request_id, error = %e, "failed to send reply");
                self.disconnected.raise();
                return;
            }
            if stopping {
                tracing::info!("stop requested by agency");
                self.stop.raise();
                return;
            }
        }
    }

    async fn send_reply(
        &self,
        writer: &mut OwnedWriteHalf,
        request_id: u64,
        reply: CommandReply,
    ) -> Result<(), WireError> {
        let frame = AgentFrame::Reply {
            agent_id: self.identity.agent_id,
            request_id,
            reply,
        };
        write_frame(writer, &frame).await
    }
}
