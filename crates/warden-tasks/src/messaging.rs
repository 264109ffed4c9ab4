//! Inter-agent messaging and operator alerts.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use warden_core::{AgentId, CallContext};
use warden_events::{AlertSeverity, WardenEvent};
use warden_store::Store;

use crate::error::{ToolError, ToolResult};
use crate::executor::ToolHandler;

/// Default number of messages returned by `read_messages`.
const DEFAULT_READ_LIMIT: i64 = 10;
/// Hard cap on a single read.
const MAX_READ_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
struct SendMessageInput {
    to_agent: String,
    content: String,
}

/// Send a durable message to another agent.
///
/// The message lands in the store; a best-effort `agent.message`
/// event (carrying the sender's delegation depth) goes out on the bus
/// when one is attached. Bus absence is never fatal.
pub struct SendMessageTool {
    store: Store,
}

impl SendMessageTool {
    /// Create the tool.
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for SendMessageTool {
    fn name(&self) -> &'static str {
        "send_message"
    }

    fn capability(&self) -> &'static str {
        "tools.send_message"
    }

    fn description(&self) -> &'static str {
        "Send a message to another agent's inbox"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["to_agent", "content"],
            "properties": {
                "to_agent": { "type": "string" },
                "content": { "type": "string" }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &CallContext) -> ToolResult<Value> {
        let input: SendMessageInput = serde_json::from_value(args)?;
        if input.to_agent.trim().is_empty() {
            return Err(ToolError::InvalidInput("to_agent must not be empty".into()));
        }
        if input.content.is_empty() {
            return Err(ToolError::InvalidInput("content must not be empty".into()));
        }

        let to_agent = AgentId::new(input.to_agent.trim());
        if to_agent == ctx.agent_id {
            return Err(ToolError::SelfSend);
        }

        let message = self
            .store
            .send_message(&ctx.agent_id, &to_agent, &input.content)
            .await?;

        if let Some(bus) = self.store.event_bus() {
            bus.publish(WardenEvent::AgentMessage {
                from_agent: ctx.agent_id.clone(),
                to_agent: to_agent.clone(),
                content: input.content,
                depth: ctx.hop,
            });
        }

        debug!(from = %ctx.agent_id, to = %to_agent, "Message sent");
        Ok(json!({ "message_id": message.id.to_string() }))
    }
}

#[derive(Debug, Deserialize, Default)]
struct ReadMessagesInput {
    #[serde(default)]
    limit: Option<i64>,
}

/// Read (and mark read) the calling agent's unread messages.
pub struct ReadMessagesTool {
    store: Store,
}

impl ReadMessagesTool {
    /// Create the tool.
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for ReadMessagesTool {
    fn name(&self) -> &'static str {
        "read_messages"
    }

    fn capability(&self) -> &'static str {
        "tools.read_messages"
    }

    fn description(&self) -> &'static str {
        "Read unread messages from this agent's inbox (marks them read)"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "limit": { "type": "integer", "minimum": 1, "maximum": 100 }
            }
        })
    }

    fn side_effecting(&self) -> bool {
        // Mark-on-read is a side effect, but replaying a previous
        // read's results would hide newer messages; reads always hit
        // the store.
        false
    }

    async fn execute(&self, args: Value, ctx: &CallContext) -> ToolResult<Value> {
        let input: ReadMessagesInput = serde_json::from_value(args)?;
        let limit = input
            .limit
            .unwrap_or(DEFAULT_READ_LIMIT)
            .clamp(1, MAX_READ_LIMIT);

        let messages = self.store.read_messages(&ctx.agent_id, limit).await?;
        let rendered: Vec<Value> = messages
            .iter()
            .map(|m| {
                json!({
                    "id": m.id.to_string(),
                    "from_agent": m.from_agent.to_string(),
                    "content": m.content,
                    "created_at": m.created_at.to_rfc3339(),
                })
            })
            .collect();
        Ok(json!({ "messages": rendered }))
    }
}

#[derive(Debug, Deserialize)]
struct SendAlertInput {
    severity: String,
    message: String,
}

/// Raise an operator alert on the event bus.
pub struct SendAlertTool {
    store: Store,
}

impl SendAlertTool {
    /// Create the tool.
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for SendAlertTool {
    fn name(&self) -> &'static str {
        "send_alert"
    }

    fn capability(&self) -> &'static str {
        "tools.send_alert"
    }

    fn description(&self) -> &'static str {
        "Raise an alert for the operator (severity: info, warning, critical)"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["severity", "message"],
            "properties": {
                "severity": { "type": "string", "enum": ["info", "warning", "critical"] },
                "message": { "type": "string" }
            }
        })
    }

    async fn execute(&self, args: Value, _ctx: &CallContext) -> ToolResult<Value> {
        let input: SendAlertInput = serde_json::from_value(args)?;
        let severity = AlertSeverity::parse(&input.severity).ok_or_else(|| {
            ToolError::InvalidInput(format!(
                "severity must be one of info, warning, critical (got {:?})",
                input.severity
            ))
        })?;
        if input.message.trim().is_empty() {
            return Err(ToolError::InvalidInput("message must not be empty".into()));
        }

        if let Some(bus) = self.store.event_bus() {
            bus.publish(WardenEvent::AgentAlert {
                severity,
                message: input.message.clone(),
            });
        }

        info!(severity = %severity, "Agent alert raised");
        Ok(json!({ "sent": true, "severity": severity.to_string() }))
    }
}
