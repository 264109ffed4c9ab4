//! Synchronous and asynchronous inter-agent delegation.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use warden_core::{AgentId, CallContext, SessionId};
use warden_store::{NewTask, Store, Task};

use crate::error::{ToolError, ToolResult};
use crate::executor::ToolHandler;

/// Interval between child-task status polls.
const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Timeout bounds for synchronous delegation, in seconds.
const MIN_TIMEOUT_SECS: u64 = 1;
const MAX_TIMEOUT_SECS: u64 = 300;
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Default delegation hop budget: a delegate may delegate once more.
pub const DEFAULT_MAX_HOPS: u32 = 2;

/// Result of a synchronous delegation.
#[derive(Debug, Clone)]
pub struct DelegationOutcome {
    /// The backing child task.
    pub task_id: String,
    /// The child task's final status.
    pub status: String,
    /// Result, when the child succeeded.
    pub result: Option<String>,
    /// Error, when the child failed.
    pub error: Option<String>,
}

impl DelegationOutcome {
    fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id.to_string(),
            status: task.status.as_str().to_string(),
            result: task.result.clone(),
            error: task.error.clone(),
        }
    }

    fn into_json(self) -> Value {
        json!({
            "task_id": self.task_id,
            "status": self.status,
            "result": self.result,
            "error": self.error,
        })
    }
}

#[derive(Debug, Deserialize)]
struct DelegateInput {
    target_agent: String,
    prompt: String,
    session_id: String,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

/// Validate the shared delegate-input fields and create the child task.
async fn create_child_task(
    store: &Store,
    ctx: &CallContext,
    input: &DelegateInput,
) -> ToolResult<Task> {
    if input.target_agent.trim().is_empty() {
        return Err(ToolError::InvalidInput("target_agent must not be empty".into()));
    }
    if input.prompt.trim().is_empty() {
        return Err(ToolError::InvalidInput("prompt must not be empty".into()));
    }

    let target = AgentId::new(input.target_agent.trim());
    if target == ctx.agent_id {
        // A single-worker agent waiting on itself would deadlock.
        return Err(ToolError::SelfDelegation);
    }
    if store.get_agent(&target).await?.is_none() {
        return Err(ToolError::UnknownAgent {
            agent: target.to_string(),
        });
    }

    let session_id = SessionId::parse(&input.session_id)
        .map_err(|e| ToolError::InvalidInput(format!("session_id: {e}")))?;
    store.ensure_session(&session_id).await?;

    let payload = json!({ "content": input.prompt }).to_string();
    let task = store
        .create_task(NewTask {
            session_id,
            agent_id: target,
            parent_task_id: ctx.task_id.clone(),
            payload,
            priority: 0,
        })
        .await?;
    Ok(task)
}

/// Synchronous delegation: create a child task for another agent and
/// wait (by polling) for its terminal status.
///
/// On caller cancellation or deadline expiry the child task is
/// aborted so it cannot run on as an orphan.
pub struct DelegateTaskTool {
    store: Store,
}

impl DelegateTaskTool {
    /// Create the tool.
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    async fn wait_for_terminal(
        &self,
        ctx: &CallContext,
        task: &Task,
        timeout: Duration,
    ) -> ToolResult<DelegationOutcome> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut poll = tokio::time::interval(POLL_INTERVAL);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = ctx.cancel.cancelled() => {
                    debug!(task = %task.id, "Delegation canceled, aborting child");
                    let aborted = self.store.abort_task(&task.id).await?;
                    return Ok(DelegationOutcome::from_task(&aborted));
                },
                () = tokio::time::sleep_until(deadline) => {
                    warn!(task = %task.id, "Delegation deadline expired, aborting child");
                    let aborted = self.store.abort_task(&task.id).await?;
                    return Ok(DelegationOutcome::from_task(&aborted));
                },
                _ = poll.tick() => {
                    let current = self.store.get_task(&task.id).await?.ok_or_else(|| {
                        ToolError::InvalidInput(format!("child task {} disappeared", task.id))
                    })?;
                    if current.status.is_terminal() {
                        return Ok(DelegationOutcome::from_task(&current));
                    }
                },
            }
        }
    }
}

#[async_trait]
impl ToolHandler for DelegateTaskTool {
    fn name(&self) -> &'static str {
        "delegate_task"
    }

    fn capability(&self) -> &'static str {
        "tools.delegate_task"
    }

    fn description(&self) -> &'static str {
        "Delegate a prompt to another agent and wait for its result"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["target_agent", "prompt", "session_id"],
            "properties": {
                "target_agent": { "type": "string" },
                "prompt": { "type": "string" },
                "session_id": { "type": "string" },
                "timeout_secs": { "type": "integer", "minimum": 1, "maximum": 300 }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &CallContext) -> ToolResult<Value> {
        let input: DelegateInput = serde_json::from_value(args)?;
        let timeout_secs = input
            .timeout_secs
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS);

        let task = create_child_task(&self.store, ctx, &input).await?;
        info!(
            task = %task.id,
            target = %task.agent_id,
            timeout_secs,
            "Synchronous delegation started"
        );

        let outcome = self
            .wait_for_terminal(ctx, &task, Duration::from_secs(timeout_secs))
            .await?;
        Ok(outcome.into_json())
    }
}

/// Asynchronous delegation: record a delegation, queue the backing
/// task, and return immediately. The collector injects the result
/// into the parent's next turn.
pub struct DelegateTaskAsyncTool {
    store: Store,
    max_hops: u32,
}

impl DelegateTaskAsyncTool {
    /// Create the tool with the default hop budget.
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self {
            store,
            max_hops: DEFAULT_MAX_HOPS,
        }
    }

    /// Override the hop budget.
    #[must_use]
    pub fn with_max_hops(mut self, max_hops: u32) -> Self {
        self.max_hops = max_hops;
        self
    }
}

#[async_trait]
impl ToolHandler for DelegateTaskAsyncTool {
    fn name(&self) -> &'static str {
        "delegate_task_async"
    }

    fn capability(&self) -> &'static str {
        "tools.delegate_task_async"
    }

    fn description(&self) -> &'static str {
        "Delegate a prompt to another agent without waiting; the result arrives next turn"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["target_agent", "prompt", "session_id"],
            "properties": {
                "target_agent": { "type": "string" },
                "prompt": { "type": "string" },
                "session_id": { "type": "string" }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &CallContext) -> ToolResult<Value> {
        if ctx.hop >= self.max_hops {
            return Err(ToolError::HopLimit {
                hops: ctx.hop,
                max: self.max_hops,
            });
        }

        let input: DelegateInput = serde_json::from_value(args)?;
        let delegation = self
            .store
            .create_delegation(
                &ctx.agent_id,
                &AgentId::new(input.target_agent.trim()),
                &input.prompt,
            )
            .await?;

        // The backing task; the delegation row carries its id once the
        // task exists so pollers can always find the work.
        let task = match create_child_task(&self.store, ctx, &input).await {
            Ok(task) => task,
            Err(e) => {
                self.store
                    .fail_delegation(&delegation.id, &e.to_string())
                    .await?;
                return Err(e);
            },
        };
        self.store
            .set_delegation_task(&delegation.id, &task.id)
            .await?;

        info!(
            delegation = %delegation.id,
            task = %task.id,
            target = %task.agent_id,
            hop = ctx.hop,
            "Asynchronous delegation queued"
        );
        Ok(json!({ "delegation_id": delegation.id.to_string(), "status": "queued" }))
    }
}
