//! The tool handler trait and the gated executor.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use warden_core::{canonical_json, CallContext, TaskId};
use warden_policy::PolicyEngine;
use warden_store::Store;

use crate::error::{ToolError, ToolResult};

/// A scheduling/messaging tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Tool name (no colons: distinguishes built-ins from MCP tools).
    fn name(&self) -> &'static str;

    /// The capability consulted before execution.
    fn capability(&self) -> &'static str;

    /// Human-readable description for language-model callers.
    fn description(&self) -> &'static str;

    /// JSON schema of the tool's input.
    fn input_schema(&self) -> Value;

    /// Whether the tool has side effects worth deduplicating.
    /// Side-effecting tools running under a task context get
    /// at-most-once semantics via the dedup table.
    fn side_effecting(&self) -> bool {
        true
    }

    /// Execute with validated-at-the-edge JSON arguments.
    async fn execute(&self, args: Value, ctx: &CallContext) -> ToolResult<Value>;
}

/// Derive the dedup key for a tool call:
/// `<task_id>:<tool>:<sha256(canonical_json(input))[:16]>`.
#[must_use]
pub fn dedup_key(task_id: &TaskId, tool: &str, input: &Value) -> String {
    let hash = request_hash(input);
    format!("{task_id}:{tool}:{}", &hash[..16])
}

/// Full request hash over the canonical form of the input.
#[must_use]
pub fn request_hash(input: &Value) -> String {
    let canonical = canonical_json(input);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Executes registered tools behind the capability gate and the dedup
/// table.
///
/// Flow per call: capability check (the policy engine records the
/// audit entry either way) → dedup lookup for side-effecting tools
/// with a task context → execute → dedup registration on success.
pub struct ToolExecutor {
    tools: HashMap<&'static str, Arc<dyn ToolHandler>>,
    store: Store,
    policy: Arc<PolicyEngine>,
}

impl ToolExecutor {
    /// Create an executor.
    #[must_use]
    pub fn new(store: Store, policy: Arc<PolicyEngine>) -> Self {
        Self {
            tools: HashMap::new(),
            store,
            policy,
        }
    }

    /// Register a tool.
    pub fn register(&mut self, tool: Arc<dyn ToolHandler>) {
        self.tools.insert(tool.name(), tool);
    }

    /// Look up a registered tool.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolHandler>> {
        self.tools.get(name)
    }

    /// Names of all registered tools, sorted.
    #[must_use]
    pub fn tool_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.tools.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Execute `tool_name` with `args` under `ctx`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::UnknownTool`], [`ToolError::PolicyDenied`],
    /// dedup conflicts, or the tool's own failure.
    pub async fn execute(
        &self,
        tool_name: &str,
        args: Value,
        ctx: &CallContext,
    ) -> ToolResult<Value> {
        let tool = self
            .tools
            .get(tool_name)
            .ok_or_else(|| ToolError::UnknownTool {
                name: tool_name.to_string(),
            })?;

        let capability = tool.capability();
        if !self.policy.allow_capability(capability) {
            warn!(tool = tool_name, capability, agent = %ctx.agent_id, "Tool call denied");
            return Err(ToolError::PolicyDenied {
                capability: capability.to_string(),
            });
        }

        // At-most-once side effects: a prior success under the same
        // task and equivalent input short-circuits to its result.
        let dedup = match (&ctx.task_id, tool.side_effecting()) {
            (Some(task_id), true) => {
                let key = dedup_key(task_id, tool_name, &args);
                let hash = request_hash(&args);
                if self.store.check_tool_call_dedup(&key, &hash).await? {
                    let stored = self.store.dedup_result_ref(&key).await?;
                    let result = stored
                        .and_then(|raw| serde_json::from_str(&raw).ok())
                        .unwrap_or_else(|| serde_json::json!({ "deduplicated": true }));
                    debug!(tool = tool_name, key, "Returning deduplicated result");
                    return Ok(result);
                }
                Some((key, hash))
            },
            _ => None,
        };

        let result = tool.execute(args, ctx).await?;

        if let Some((key, hash)) = dedup {
            let rendered = result.to_string();
            self.store
                .register_successful_tool_call(&key, &hash, Some(&rendered))
                .await?;
        }

        Ok(result)
    }
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("tools", &self.tool_names())
            .finish_non_exhaustive()
    }
}
