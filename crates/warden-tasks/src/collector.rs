//! Injection of finished async delegations into the parent's turn.

use serde_json::json;
use tracing::debug;

use warden_core::AgentId;
use warden_store::{Delegation, DelegationStatus, Store};

use crate::error::ToolResult;

/// A system-role message ready for injection into an agent's context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedMessage {
    /// Always `system`.
    pub role: &'static str,
    /// Rendered delegation outcome.
    pub content: String,
}

/// Collects completed-but-uninjected delegations for an agent.
///
/// Run before each of the agent's turns: every finished delegation is
/// rendered as a system message carrying the child's result (or
/// error) and marked injected so it is delivered exactly once.
pub struct DelegationCollector {
    store: Store,
}

impl DelegationCollector {
    /// Create a collector.
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Drain finished delegations for `agent`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns store failures; already-collected delegations are never
    /// returned twice.
    pub async fn collect(&self, agent: &AgentId) -> ToolResult<Vec<CollectedMessage>> {
        let finished = self.store.uninjected_delegations(agent).await?;
        let mut messages = Vec::with_capacity(finished.len());

        for delegation in finished {
            messages.push(render(&delegation));
            self.store.mark_delegation_injected(&delegation.id).await?;
            debug!(delegation = %delegation.id, agent = %agent, "Delegation result injected");
        }
        Ok(messages)
    }
}

impl std::fmt::Debug for DelegationCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegationCollector").finish_non_exhaustive()
    }
}

fn render(delegation: &Delegation) -> CollectedMessage {
    let body = match delegation.status {
        DelegationStatus::Failed => json!({
            "delegation_id": delegation.id.to_string(),
            "child_agent": delegation.child_agent.to_string(),
            "status": "failed",
            "error": delegation.error.clone().unwrap_or_else(|| "unknown error".to_string()),
        }),
        _ => json!({
            "delegation_id": delegation.id.to_string(),
            "child_agent": delegation.child_agent.to_string(),
            "status": "completed",
            "result": delegation.result.clone().unwrap_or_default(),
        }),
    };
    CollectedMessage {
        role: "system",
        content: format!("Delegated task finished: {body}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collects_once_and_marks_injected() {
        let store = Store::in_memory().await.unwrap();
        let parent = AgentId::from("parent");
        let child = AgentId::from("child");

        let done = store.create_delegation(&parent, &child, "a").await.unwrap();
        let failed = store.create_delegation(&parent, &child, "b").await.unwrap();
        store.complete_delegation(&done.id, "the answer").await.unwrap();
        store.fail_delegation(&failed.id, "exploded").await.unwrap();

        let collector = DelegationCollector::new(store.clone());
        let messages = collector.collect(&parent).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.role == "system"));
        assert!(messages[0].content.contains("the answer"));
        assert!(messages[1].content.contains("exploded"));

        // Second collection is empty: everything was marked injected.
        assert!(collector.collect(&parent).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pending_delegations_not_collected() {
        let store = Store::in_memory().await.unwrap();
        let parent = AgentId::from("parent");
        store
            .create_delegation(&parent, &AgentId::from("child"), "still running")
            .await
            .unwrap();

        let collector = DelegationCollector::new(store);
        assert!(collector.collect(&parent).await.unwrap().is_empty());
    }
}
