//! Per-connection session handling: the authentication handshake and the
//! read-classify-execute-respond loop with dual timeout enforcement.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::approval::{Approval, ApprovalGate, ApprovalRequest};
use crate::classifier;
use crate::config::ServerConfig;
use crate::executor;
use crate::protocol::{ClientMessage, Reply};
use crate::state::{format_uptime, ServerState};

/// Pause after a final reply so it flushes before the socket closes.
const CLOSE_GRACE: Duration = Duration::from_millis(100);

/// Errors that terminate a session without a protocol-level reply of
/// their own. Protocol, auth, timeout, and execution errors are all
/// reported inline instead.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("connection i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("reply encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Command-loop states. `Closing` is terminal; the connection is always
/// closed once it is reached, however it was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    AwaitingMessage,
    Processing,
    Closing,
}

/// One authenticated connection, owned by a single worker.
struct Session {
    stream: TcpStream,
    addr: SocketAddr,
    config: Arc<ServerConfig>,
    state: Arc<ServerState>,
    approval: Arc<dyn ApprovalGate>,
    identifier: String,
    token: String,
    started: Instant,
    last_activity: Instant,
    /// Raw payload carried from `AwaitingMessage` into `Processing`.
    pending: Option<String>,
}

/// Entry point for a worker: authenticate the connection, then run the
/// command loop to completion. Always closes the connection.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    config: Arc<ServerConfig>,
    state: Arc<ServerState>,
    approval: Arc<dyn ApprovalGate>,
) {
    let session_id = Uuid::new_v4();
    info!(%addr, %session_id, "connection received");

    let mut session = match authenticate(stream, addr, config, state, approval).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            warn!(%addr, %session_id, "client failed validation");
            return;
        }
        Err(e) => {
            warn!(%addr, %session_id, error = %e, "handshake aborted");
            return;
        }
    };

    if let Err(e) = session.run().await {
        error!(%addr, %session_id, error = %e, "error handling client");
        let _ = session
            .send(&Reply::error("Server error while handling command."))
            .await;
    }
    info!(%addr, %session_id, "closed connection");
}

/// Authentication handshake. Reads exactly one message; there is no
/// retry loop in this phase.
///
/// `Ok(None)` means the client was rejected (or hung up) and a reply,
/// where one applies, has already been sent.
async fn authenticate(
    mut stream: TcpStream,
    addr: SocketAddr,
    config: Arc<ServerConfig>,
    state: Arc<ServerState>,
    approval: Arc<dyn ApprovalGate>,
) -> Result<Option<Session>, SessionError> {
    let mut buf = vec![0u8; config.recv_buffer];
    let n = stream.read(&mut buf).await?;
    if n == 0 {
        return Ok(None);
    }

    let raw = String::from_utf8_lossy(&buf[..n]);
    let msg: ClientMessage = match serde_json::from_str(raw.trim()) {
        Ok(msg) => msg,
        Err(_) => {
            send_reply(&mut stream, &Reply::error("Invalid JSON format.")).await?;
            return Ok(None);
        }
    };

    let (identifier, token) = match (
        ClientMessage::field(&msg.id),
        ClientMessage::field(&msg.token),
    ) {
        (Some(id), Some(token)) => (id.to_string(), token.to_string()),
        _ => {
            send_reply(&mut stream, &Reply::error("Missing 'id' or 'token' fields.")).await?;
            return Ok(None);
        }
    };

    if !config.allows_identifier(&identifier) {
        warn!(%addr, %identifier, "invalid identifier");
        send_reply(&mut stream, &Reply::error("Invalid identifier.")).await?;
        return Ok(None);
    }

    info!(%addr, %identifier, %token, "received credentials");

    let token = if state.tokens.contains(&token) {
        debug!(%token, "token already authorized");
        token
    } else {
        info!(%token, "token not recognized, issuing new token");
        let new_token = state.tokens.issue();
        send_reply(&mut stream, &Reply::new_token(new_token.clone())).await?;
        new_token
    };

    let now = Instant::now();
    Ok(Some(Session {
        stream,
        addr,
        config,
        state,
        approval,
        identifier,
        token,
        started: now,
        last_activity: now,
        pending: None,
    }))
}

impl Session {
    /// Drive the state machine until `Closing`.
    async fn run(&mut self) -> Result<(), SessionError> {
        let mut state = LoopState::AwaitingMessage;
        while state != LoopState::Closing {
            state = match state {
                LoopState::AwaitingMessage => self.await_message().await?,
                LoopState::Processing => self.process_pending().await?,
                LoopState::Closing => unreachable!("loop exits on Closing"),
            };
        }
        Ok(())
    }

    /// Read with a short poll interval so timeout checks run even while
    /// idle.
    async fn await_message(&mut self) -> Result<LoopState, SessionError> {
        let mut buf = vec![0u8; self.config.recv_buffer];
        match timeout(self.config.poll_interval, self.stream.read(&mut buf)).await {
            // No data this poll; only the timeout conditions can end the
            // session here.
            Err(_elapsed) => {
                if self.expire_if_timed_out().await {
                    return Ok(LoopState::Closing);
                }
                Ok(LoopState::AwaitingMessage)
            }
            // Peer closed.
            Ok(Ok(0)) => Ok(LoopState::Closing),
            Ok(Ok(n)) => {
                // Checked again on arrival so a stale message landing
                // after expiry is still rejected.
                if self.expire_if_timed_out().await {
                    return Ok(LoopState::Closing);
                }
                self.last_activity = Instant::now();
                self.pending = Some(String::from_utf8_lossy(&buf[..n]).trim().to_string());
                Ok(LoopState::Processing)
            }
            Ok(Err(e)) => Err(e.into()),
        }
    }

    /// Evaluate the absolute then the idle timeout; each is
    /// independently terminal. On expiry the reply and half-close have
    /// already happened when this returns true.
    async fn expire_if_timed_out(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.started) > self.config.session_timeout {
            warn!(addr = %self.addr, "session timed out");
            self.finish_with(&Reply::error("Session timed out.")).await;
            return true;
        }
        if now.duration_since(self.last_activity) > self.config.idle_timeout {
            warn!(addr = %self.addr, "session idle too long");
            self.finish_with(&Reply::error("Idle timeout reached.")).await;
            return true;
        }
        false
    }

    /// Best-effort final reply, then half-close the write side with a
    /// brief grace pause so the message reaches the peer.
    async fn finish_with(&mut self, reply: &Reply) {
        if let Err(e) = self.send(reply).await {
            error!(addr = %self.addr, error = %e, "error sending final message");
        }
        let _ = self.stream.shutdown().await;
        tokio::time::sleep(CLOSE_GRACE).await;
    }

    /// Parse and dispatch one message.
    async fn process_pending(&mut self) -> Result<LoopState, SessionError> {
        let raw = self.pending.take().unwrap_or_default();
        let msg: ClientMessage = match serde_json::from_str(&raw) {
            Ok(msg) => msg,
            Err(_) => {
                self.send(&Reply::error("Invalid JSON format.")).await?;
                return Ok(LoopState::AwaitingMessage);
            }
        };

        let (id, token, command) = match (
            ClientMessage::field(&msg.id),
            ClientMessage::field(&msg.token),
            ClientMessage::field(&msg.command),
        ) {
            (Some(id), Some(token), Some(command)) => {
                (id.to_string(), token.to_string(), command.to_string())
            }
            _ => {
                self.send(&Reply::error(
                    "Missing required fields ('id', 'token', 'command').",
                ))
                .await?;
                return Ok(LoopState::AwaitingMessage);
            }
        };

        // Credentials are revalidated on every message, not only at the
        // handshake; a mismatch never partially executes the command.
        if id != self.identifier || token != self.token {
            warn!(addr = %self.addr, %id, %token, "invalid credentials");
            self.send(&Reply::error("Invalid credentials.")).await?;
            return Ok(LoopState::Closing);
        }

        self.dispatch(&msg, &command).await
    }

    async fn dispatch(
        &mut self,
        msg: &ClientMessage,
        command: &str,
    ) -> Result<LoopState, SessionError> {
        let lowered = command.to_lowercase();

        if lowered == "shutdown" {
            info!(addr = %self.addr, "shutdown command received");
            self.send(&Reply::message("Server is shutting down.")).await?;
            self.state.request_shutdown();
            return Ok(LoopState::Closing);
        }

        if lowered.starts_with("cd ") {
            let directory = command[3..].trim();
            let reply = match self.state.change_workdir(directory) {
                Ok(dir) => {
                    info!(addr = %self.addr, dir = %dir.display(), "changed directory");
                    Reply::output(format!("Changed directory to {}", dir.display()))
                }
                Err(e) => {
                    error!(addr = %self.addr, error = %e, "failed to change directory");
                    Reply::output(format!("Failed to change directory: {e}"))
                }
            };
            self.send(&reply).await?;
            return Ok(LoopState::AwaitingMessage);
        }

        if lowered == "exit" {
            info!(addr = %self.addr, "client disconnected");
            self.send(&Reply::message("Goodbye")).await?;
            tokio::time::sleep(CLOSE_GRACE).await;
            return Ok(LoopState::Closing);
        }

        if lowered == "hows alive" {
            let reply = Reply::uptime(format_uptime(self.state.uptime()));
            self.send(&reply).await?;
            return Ok(LoopState::AwaitingMessage);
        }

        if lowered == "run" {
            let Some(code) = ClientMessage::field(&msg.code) else {
                self.send(&Reply::error("Missing code for execution.")).await?;
                return Ok(LoopState::AwaitingMessage);
            };
            debug!(addr = %self.addr, id = %self.identifier, "executing submitted code");
            let output = executor::run_code(code.to_string()).await;
            self.send(&Reply::output(output)).await?;
            return Ok(LoopState::AwaitingMessage);
        }

        // Generic shell command; dangerous ones go through the approval
        // gate first.
        if classifier::is_dangerous(command) {
            warn!(addr = %self.addr, id = %self.identifier, %command, "dangerous command detected");
            let request = ApprovalRequest {
                identifier: self.identifier.clone(),
                addr: self.addr,
                command: command.to_string(),
            };
            if self.approval.approve(&request).await != Approval::Approved {
                warn!(addr = %self.addr, "dangerous command execution denied by admin");
                self.send(&Reply::error("Dangerous command execution denied by admin."))
                    .await?;
                return Ok(LoopState::AwaitingMessage);
            }
            info!(addr = %self.addr, "admin approved dangerous command execution");
        }

        info!(addr = %self.addr, id = %self.identifier, %command, "executing command");
        let cwd = self.state.workdir();
        let output = executor::run_shell(command, &cwd).await;
        self.send(&Reply::output(output)).await?;
        Ok(LoopState::AwaitingMessage)
    }

    async fn send(&mut self, reply: &Reply) -> Result<(), SessionError> {
        send_reply(&mut self.stream, reply).await
    }
}

async fn send_reply(stream: &mut TcpStream, reply: &Reply) -> Result<(), SessionError> {
    let body = serde_json::to_vec(reply)?;
    stream.write_all(&body).await?;
    Ok(())
}
