//! Ambient per-call context.
//!
//! Every tool execution receives a [`CallContext`] carrying the calling
//! agent's identity, the session and task the call belongs to, the
//! delegation hop depth, and a cancellation token. The context is cheap
//! to clone; derived contexts (e.g. for a child delegation) share the
//! parent's cancellation token so teardown propagates.

use tokio_util::sync::CancellationToken;

use crate::ids::{AgentId, SessionId, TaskId};

/// Ambient state for a single tool call.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// The agent on whose behalf the call runs.
    pub agent_id: AgentId,
    /// The session the call belongs to.
    pub session_id: SessionId,
    /// The task the call runs under, when there is one.
    ///
    /// Calls without a task context (e.g. operator REPL probes) skip
    /// tool-call dedup, which is keyed on the task id.
    pub task_id: Option<TaskId>,
    /// Delegation hop depth. Zero for direct calls; incremented each
    /// time an agent delegates to another agent.
    pub hop: u32,
    /// Cancellation token for cooperative teardown.
    pub cancel: CancellationToken,
}

impl CallContext {
    /// Create a context for a direct (non-delegated) call.
    #[must_use]
    pub fn new(agent_id: AgentId, session_id: SessionId) -> Self {
        Self {
            agent_id,
            session_id,
            task_id: None,
            hop: 0,
            cancel: CancellationToken::new(),
        }
    }

    /// Attach a task id.
    #[must_use]
    pub fn with_task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    /// Attach a cancellation token (replaces the default).
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Derive a context for a delegated child call: one hop deeper,
    /// sharing this context's cancellation token.
    #[must_use]
    pub fn delegated(&self, child_agent: AgentId, session_id: SessionId) -> Self {
        Self {
            agent_id: child_agent,
            session_id,
            task_id: None,
            hop: self.hop.saturating_add(1),
            cancel: self.cancel.clone(),
        }
    }

    /// Whether the call has been canceled.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
