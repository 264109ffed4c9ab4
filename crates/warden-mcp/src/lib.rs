//! Warden MCP - per-agent pools of Model-Context-Protocol clients.
//!
//! MCP servers are subprocesses speaking JSON-RPC 2.0 over stdin/stdout
//! with newline-delimited single-line frames. This crate provides:
//!
//! - [`SubprocessTransport`]: spawns the server process, frames
//!   messages, and pipes stderr into debug logs
//! - [`ReconnectingTransport`]: bounded exponential-backoff reconnect
//!   on send failure
//! - [`McpClient`]: request/response correlation and the `initialize`
//!   handshake (`protocolVersion: 2024-11-05`)
//! - [`McpManager`]: global and per-agent connection pools with tool
//!   discovery caching and policy filtering
//!
//! Every tool invocation passes through the policy engine's
//! `allow_mcp_tool` decision; discovery results are filtered the same
//! way before they are cached.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod client;
mod config;
mod error;
mod manager;
mod protocol;
mod reconnect;
mod transport;

#[cfg(test)]
pub(crate) mod test_util;

pub use client::McpClient;
pub use config::ServerConfig;
pub use error::{McpError, McpResult};
pub use manager::{McpConnection, McpManager};
pub use protocol::{
    DiscoveredTool, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    RpcErrorBody, JSONRPC_VERSION, PROTOCOL_VERSION,
};
pub use reconnect::ReconnectingTransport;
pub use transport::{SubprocessTransport, Transport};
