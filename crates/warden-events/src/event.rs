//! Event types published on the bus.

use serde::{Deserialize, Serialize};

use warden_core::AgentId;

/// Severity of an agent-raised alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    /// Informational notice.
    Info,
    /// Degraded but operational.
    Warning,
    /// Requires operator attention.
    Critical,
}

impl AlertSeverity {
    /// Parse a severity string (case-insensitive).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Some(Self::Info),
            "warning" => Some(Self::Warning),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Events published on the Warden bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WardenEvent {
    /// One agent sent another a message.
    AgentMessage {
        /// Sending agent.
        from_agent: AgentId,
        /// Receiving agent.
        to_agent: AgentId,
        /// Message body.
        content: String,
        /// Delegation hop depth of the sender's call context.
        depth: u32,
    },

    /// An agent raised an alert for the operator.
    AgentAlert {
        /// Alert severity.
        severity: AlertSeverity,
        /// Alert body.
        message: String,
    },

    /// The task worker loop changed status.
    LoopStatusUpdate {
        /// New status (e.g. `claimed`, `running`, `done`).
        status: String,
    },

    /// A WASM skill was reloaded and its tools may have changed.
    ToolsUpdated {
        /// Source basename of the reloaded skill.
        source: String,
    },
}

impl WardenEvent {
    /// Stable event name for routing and logging.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AgentMessage { .. } => "agent.message",
            Self::AgentAlert { .. } => "agent.alert",
            Self::LoopStatusUpdate { .. } => "loop.status_update",
            Self::ToolsUpdated { .. } => "skill.tools_updated",
        }
    }
}
