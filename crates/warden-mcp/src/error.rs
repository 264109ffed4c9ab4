//! MCP error types.

use thiserror::Error;

/// Errors from MCP transports, clients, and the manager.
#[derive(Debug, Error)]
pub enum McpError {
    /// The server process could not be spawned.
    #[error("failed to spawn MCP server {command:?}: {source}")]
    Spawn {
        /// The command that failed.
        command: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// I/O failure on the transport.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport is closed (process exited or `close()` called).
    #[error("transport closed")]
    Closed,

    /// The caller's context was canceled while waiting.
    #[error("operation canceled")]
    Canceled,

    /// A frame was not valid single-line JSON-RPC.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server answered with a JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },

    /// An operation exceeded its deadline.
    #[error("{operation} timed out")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
    },

    /// Reconnect attempts were exhausted.
    #[error("send failed after {attempts} reconnect attempts: {last_error}")]
    ReconnectExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The final underlying cause.
        last_error: String,
    },

    /// No connection exists for the agent/server pair.
    #[error("no MCP connection for agent {agent:?} server {server:?}")]
    ServerNotFound {
        /// The requesting agent.
        agent: String,
        /// The server that was looked up.
        server: String,
    },

    /// A per-agent config referenced a global server that does not exist.
    #[error("unknown global MCP server referenced: {name:?}")]
    UnknownGlobalServer {
        /// The referenced name.
        name: String,
    },

    /// The policy engine refused the tool call.
    #[error("policy denied MCP tool {server}/{tool} for agent {agent}")]
    PolicyDenied {
        /// The requesting agent.
        agent: String,
        /// Target server.
        server: String,
        /// Target tool.
        tool: String,
    },

    /// A tool invocation failed downstream; context is prepended.
    #[error("mcp tool {server}/{tool}: {source}")]
    ToolCall {
        /// Target server.
        server: String,
        /// Target tool.
        tool: String,
        /// Underlying error.
        #[source]
        source: Box<McpError>,
    },
}

/// Result type for MCP operations.
pub type McpResult<T> = Result<T, McpError>;
