//! The per-agent task worker loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use warden_core::AgentId;
use warden_events::WardenEvent;
use warden_store::{Store, Task};

use crate::error::ToolResult;

/// Interval between claim attempts when the queue is empty.
const IDLE_POLL: Duration = Duration::from_millis(500);

/// Executes one claimed task (the "brain" seam).
///
/// Implementations receive the claimed task and return either the
/// result string or an error string. The worker owns the status
/// bookkeeping around the call.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Run the task to completion.
    async fn run(&self, task: &Task) -> Result<String, String>;
}

/// Claims and runs tasks bound to one agent.
///
/// The loop claims the next QUEUED task (priority, then age), runs it
/// through the [`TaskRunner`], records the terminal status, and -
/// when the task backs an asynchronous delegation - marks the
/// delegation finished so the collector can inject the result.
/// Status transitions are published on the event bus as best-effort
/// `loop.status_update` events.
pub struct TaskWorker {
    store: Store,
    agent: AgentId,
    lease_owner: String,
    runner: Arc<dyn TaskRunner>,
}

impl TaskWorker {
    /// Create a worker for `agent`.
    #[must_use]
    pub fn new(store: Store, agent: AgentId, runner: Arc<dyn TaskRunner>) -> Self {
        let lease_owner = format!("worker-{agent}");
        Self {
            store,
            agent,
            lease_owner,
            runner,
        }
    }

    /// Run until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(agent = %self.agent, "Task worker started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!(agent = %self.agent, "Task worker stopped");
                    return;
                },
                claimed = self.step() => {
                    match claimed {
                        Ok(true) => {}, // Ran a task; claim again immediately.
                        Ok(false) => tokio::time::sleep(IDLE_POLL).await,
                        Err(e) => {
                            error!(agent = %self.agent, error = %e, "Worker step failed");
                            tokio::time::sleep(IDLE_POLL).await;
                        },
                    }
                },
            }
        }
    }

    /// Claim and run at most one task. Returns whether one was run.
    ///
    /// # Errors
    ///
    /// Returns store failures; runner failures are recorded on the
    /// task, not surfaced here.
    pub async fn step(&self) -> ToolResult<bool> {
        let Some(task) = self.store.claim_task(&self.agent, &self.lease_owner).await? else {
            return Ok(false);
        };

        self.publish_status("claimed");
        debug!(task = %task.id, agent = %self.agent, "Task claimed");
        self.publish_status("running");

        match self.runner.run(&task).await {
            Ok(result) => {
                self.store.complete_task(&task.id, &result).await?;
                if let Some(delegation) = self.store.find_delegation_by_task(&task.id).await? {
                    self.store
                        .complete_delegation(&delegation.id, &result)
                        .await?;
                }
            },
            Err(message) => {
                self.store.fail_task(&task.id, &message).await?;
                if let Some(delegation) = self.store.find_delegation_by_task(&task.id).await? {
                    self.store.fail_delegation(&delegation.id, &message).await?;
                }
            },
        }

        self.publish_status("done");
        Ok(true)
    }

    fn publish_status(&self, status: &str) {
        if let Some(bus) = self.store.event_bus() {
            bus.publish(WardenEvent::LoopStatusUpdate {
                status: status.to_string(),
            });
        }
    }
}

impl std::fmt::Debug for TaskWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskWorker")
            .field("agent", &self.agent)
            .finish_non_exhaustive()
    }
}
