//! Subprocess transport: newline-delimited JSON-RPC over stdio.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::error::{McpError, McpResult};
use crate::protocol::JsonRpcMessage;

/// A bidirectional message transport.
///
/// Messages are single-line UTF-8 JSON, newline-terminated. `receive`
/// must release promptly when the passed cancellation token fires;
/// `close` must be idempotent.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one message.
    async fn send(&self, message: &JsonRpcMessage) -> McpResult<()>;

    /// Receive the next message, or fail when `cancel` fires or the
    /// peer goes away.
    async fn receive(&self, cancel: &CancellationToken) -> McpResult<JsonRpcMessage>;

    /// Tear the transport down. Idempotent.
    async fn close(&self);
}

/// Transport over a spawned server subprocess.
///
/// stdin and stdout are wired for framing; stderr is drained into
/// debug logs by a background task. The writer mutex serializes sends;
/// reads hold their own lock so a blocked reader never stalls a
/// writer.
pub struct SubprocessTransport {
    stdin: Mutex<Option<ChildStdin>>,
    stdout: Mutex<tokio::io::Lines<BufReader<ChildStdout>>>,
    child: Mutex<Option<Child>>,
    closed: AtomicBool,
    name: String,
}

impl SubprocessTransport {
    /// Spawn `config.command` with the parent environment plus the
    /// config's expanded overrides.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Spawn`] if the process cannot start, or a
    /// protocol error if its stdio pipes are missing.
    pub fn spawn(config: &ServerConfig) -> McpResult<Self> {
        let command_name = config.command.clone().unwrap_or_default();
        if command_name.is_empty() {
            return Err(McpError::Protocol(format!(
                "server {:?} has no command to spawn",
                config.name
            )));
        }

        let mut command = Command::new(&command_name);
        command
            .args(&config.args)
            .envs(config.expanded_env())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| McpError::Spawn {
            command: command_name.clone(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Protocol("child stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Protocol("child stdout not captured".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            let server = config.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %server, "mcp stderr: {line}");
                }
            });
        }

        debug!(server = %config.name, command = %command_name, "MCP server spawned");

        Ok(Self {
            stdin: Mutex::new(Some(stdin)),
            stdout: Mutex::new(BufReader::new(stdout).lines()),
            child: Mutex::new(Some(child)),
            closed: AtomicBool::new(false),
            name: config.name.clone(),
        })
    }

    /// Server name this transport talks to.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Transport for SubprocessTransport {
    async fn send(&self, message: &JsonRpcMessage) -> McpResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(McpError::Closed);
        }

        let mut line =
            serde_json::to_string(message).map_err(|e| McpError::Protocol(e.to_string()))?;
        line.push('\n');

        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(McpError::Closed)?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn receive(&self, cancel: &CancellationToken) -> McpResult<JsonRpcMessage> {
        let mut lines = self.stdout.lock().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => return Err(McpError::Canceled),
                line = lines.next_line() => {
                    match line? {
                        Some(line) => {
                            let trimmed = line.trim();
                            if trimmed.is_empty() {
                                continue;
                            }
                            return serde_json::from_str(trimmed)
                                .map_err(|e| McpError::Protocol(format!("bad frame: {e}")));
                        },
                        None => return Err(McpError::Closed),
                    }
                },
            }
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stdin.lock().await.take();
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!(server = %self.name, error = %e, "Failed to kill MCP server process");
            }
        }
        debug!(server = %self.name, "Transport closed");
    }
}

impl std::fmt::Debug for SubprocessTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubprocessTransport")
            .field("name", &self.name)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
