//! Reconnecting wrapper over the subprocess transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::{McpError, McpResult};
use crate::protocol::JsonRpcMessage;
use crate::transport::{SubprocessTransport, Transport};

/// Default maximum number of reconnect attempts per failed send.
pub(crate) const DEFAULT_MAX_RETRIES: u32 = 3;
/// Initial backoff before the first reconnect attempt.
pub(crate) const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Transport wrapper that respawns the server on send failure.
///
/// A failed `send` tears down the current subprocess, waits with
/// exponential backoff (1 s doubling, bounded attempts), spawns a
/// fresh one, and resends. `receive` is deliberately not retried: the
/// in-flight call is resent by the caller's next `send`.
pub struct ReconnectingTransport {
    config: ServerConfig,
    inner: RwLock<Arc<SubprocessTransport>>,
    max_retries: u32,
}

impl ReconnectingTransport {
    /// Spawn the initial subprocess for `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the first spawn fails.
    pub fn spawn(config: ServerConfig) -> McpResult<Self> {
        let transport = SubprocessTransport::spawn(&config)?;
        Ok(Self {
            config,
            inner: RwLock::new(Arc::new(transport)),
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    /// Override the reconnect attempt bound.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    async fn current(&self) -> Arc<SubprocessTransport> {
        Arc::clone(&*self.inner.read().await)
    }

    /// Tear down the current transport and spawn a replacement.
    async fn rebuild(&self) -> McpResult<()> {
        let mut guard = self.inner.write().await;
        guard.close().await;
        let fresh = SubprocessTransport::spawn(&self.config)?;
        *guard = Arc::new(fresh);
        info!(server = %self.config.name, "MCP transport respawned");
        Ok(())
    }
}

#[async_trait]
impl Transport for ReconnectingTransport {
    async fn send(&self, message: &JsonRpcMessage) -> McpResult<()> {
        let first_error = match self.current().await.send(message).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        let mut last_error = first_error;
        let mut backoff = INITIAL_BACKOFF;
        for attempt in 1..=self.max_retries {
            warn!(
                server = %self.config.name,
                attempt,
                error = %last_error,
                "MCP send failed, reconnecting"
            );
            tokio::time::sleep(backoff).await;
            backoff = backoff.saturating_mul(2);

            if let Err(e) = self.rebuild().await {
                last_error = e;
                continue;
            }
            match self.current().await.send(message).await {
                Ok(()) => return Ok(()),
                Err(e) => last_error = e,
            }
        }

        Err(McpError::ReconnectExhausted {
            attempts: self.max_retries,
            last_error: last_error.to_string(),
        })
    }

    async fn receive(&self, cancel: &CancellationToken) -> McpResult<JsonRpcMessage> {
        self.current().await.receive(cancel).await
    }

    async fn close(&self) {
        self.current().await.close().await;
    }
}

impl std::fmt::Debug for ReconnectingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectingTransport")
            .field("server", &self.config.name)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}
