//! The `spawn_task` tool.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use warden_core::{AgentId, CallContext, SessionId, TaskId};
use warden_store::{NewTask, Store};

use crate::error::{ToolError, ToolResult};
use crate::executor::ToolHandler;

#[derive(Debug, Deserialize)]
struct SpawnTaskInput {
    description: String,
    payload: String,
    parent_task_id: String,
    session_id: String,
    #[serde(default)]
    target_agent: Option<String>,
    #[serde(default)]
    priority: i64,
}

/// Queue a subtask linked to the current task.
///
/// The subtask binds to `target_agent` when given, otherwise to the
/// calling agent.
pub struct SpawnTaskTool {
    store: Store,
}

impl SpawnTaskTool {
    /// Create the tool.
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for SpawnTaskTool {
    fn name(&self) -> &'static str {
        "spawn_task"
    }

    fn capability(&self) -> &'static str {
        "tools.spawn_task"
    }

    fn description(&self) -> &'static str {
        "Queue a subtask of the current task for this agent or another agent"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["description", "payload", "parent_task_id", "session_id"],
            "properties": {
                "description": { "type": "string" },
                "payload": { "type": "string" },
                "parent_task_id": { "type": "string" },
                "session_id": { "type": "string" },
                "target_agent": { "type": "string" },
                "priority": { "type": "integer" }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &CallContext) -> ToolResult<Value> {
        let input: SpawnTaskInput = serde_json::from_value(args)?;

        for (field, value) in [
            ("description", &input.description),
            ("payload", &input.payload),
            ("parent_task_id", &input.parent_task_id),
            ("session_id", &input.session_id),
        ] {
            if value.trim().is_empty() {
                return Err(ToolError::InvalidInput(format!("{field} must not be empty")));
            }
        }

        let parent_task_id = TaskId::parse(&input.parent_task_id)
            .map_err(|e| ToolError::InvalidInput(format!("parent_task_id: {e}")))?;
        let session_id = SessionId::parse(&input.session_id)
            .map_err(|e| ToolError::InvalidInput(format!("session_id: {e}")))?;

        let agent_id = input
            .target_agent
            .filter(|a| !a.trim().is_empty())
            .map_or_else(|| ctx.agent_id.clone(), AgentId::new);

        let payload = json!({
            "description": input.description,
            "payload": input.payload,
        })
        .to_string();

        self.store.ensure_session(&session_id).await?;
        let task = self
            .store
            .create_task(NewTask {
                session_id,
                agent_id: agent_id.clone(),
                parent_task_id: Some(parent_task_id),
                payload,
                priority: input.priority,
            })
            .await?;

        info!(task = %task.id, agent = %agent_id, "Subtask spawned");
        Ok(json!({ "task_id": task.id.to_string(), "status": task.status.as_str() }))
    }
}
