//! Tool execution errors.

use thiserror::Error;

/// Errors surfaced by the scheduling and messaging tools.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The policy engine refused the tool's capability.
    #[error("policy denied capability {capability:?}")]
    PolicyDenied {
        /// The capability that was consulted.
        capability: String,
    },

    /// Input validation failed (empty field, bad shape, bad value).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An agent tried to delegate to itself.
    #[error("cannot delegate to yourself")]
    SelfDelegation,

    /// An agent tried to message itself.
    #[error("cannot send a message to yourself")]
    SelfSend,

    /// The delegation target does not exist.
    #[error("unknown target agent: {agent}")]
    UnknownAgent {
        /// The missing agent.
        agent: String,
    },

    /// The delegation hop budget is spent.
    #[error("delegation hop limit reached ({hops} >= {max})")]
    HopLimit {
        /// The caller's hop depth.
        hops: u32,
        /// The configured maximum.
        max: u32,
    },

    /// No tool is registered under the requested name.
    #[error("unknown tool: {name}")]
    UnknownTool {
        /// The requested tool name.
        name: String,
    },

    /// Persistence failure.
    #[error("store error: {0}")]
    Store(#[from] warden_store::StoreError),

    /// JSON shape failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for tool execution.
pub type ToolResult<T> = Result<T, ToolError>;
