//! Delegation records and inter-agent messages.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

use warden_core::{AgentId, DelegationId, TaskId};

use crate::error::{StoreError, StoreResult};
use crate::models::{Delegation, DelegationStatus, Message};

use super::{now_str, parse_ts, Store};

const DELEGATION_COLUMNS: &str =
    "id, parent_agent, child_agent, prompt, task_id, status, result, error, injected, created_at";

impl Store {
    /// Create a queued delegation record.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn create_delegation(
        &self,
        parent_agent: &AgentId,
        child_agent: &AgentId,
        prompt: &str,
    ) -> StoreResult<Delegation> {
        let id = DelegationId::new();
        sqlx::query(
            "INSERT INTO delegations (id, parent_agent, child_agent, prompt, status, created_at)
             VALUES (?, ?, ?, ?, 'queued', ?)",
        )
        .bind(id.to_string())
        .bind(parent_agent.as_str())
        .bind(child_agent.as_str())
        .bind(prompt)
        .bind(now_str())
        .execute(self.pool())
        .await?;

        debug!(delegation = %id, parent = %parent_agent, child = %child_agent, "Delegation queued");
        self.get_delegation(&id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: "delegation",
                id: id.to_string(),
            })
    }

    /// Fetch a delegation by id.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or a corrupt row.
    pub async fn get_delegation(&self, id: &DelegationId) -> StoreResult<Option<Delegation>> {
        let row = sqlx::query(&format!(
            "SELECT {DELEGATION_COLUMNS} FROM delegations WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(self.pool())
        .await?;
        row.map(|row| delegation_from_row(&row)).transpose()
    }

    /// Attach the backing task to a delegation.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn set_delegation_task(
        &self,
        id: &DelegationId,
        task_id: &TaskId,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE delegations SET task_id = ? WHERE id = ?")
            .bind(task_id.to_string())
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Mark a delegation completed with a result.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn complete_delegation(&self, id: &DelegationId, result: &str) -> StoreResult<()> {
        sqlx::query("UPDATE delegations SET status = 'completed', result = ? WHERE id = ?")
            .bind(result)
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Mark a delegation failed with an error.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn fail_delegation(&self, id: &DelegationId, error: &str) -> StoreResult<()> {
        sqlx::query("UPDATE delegations SET status = 'failed', error = ? WHERE id = ?")
            .bind(error)
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Mark a delegation's result as injected into the parent's turn.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn mark_delegation_injected(&self, id: &DelegationId) -> StoreResult<()> {
        sqlx::query("UPDATE delegations SET injected = 1 WHERE id = ?")
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// The delegation backed by `task_id`, if one exists.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn find_delegation_by_task(
        &self,
        task_id: &TaskId,
    ) -> StoreResult<Option<Delegation>> {
        let row = sqlx::query(&format!(
            "SELECT {DELEGATION_COLUMNS} FROM delegations WHERE task_id = ?"
        ))
        .bind(task_id.to_string())
        .fetch_optional(self.pool())
        .await?;
        row.map(|row| delegation_from_row(&row)).transpose()
    }

    /// Finished (completed or failed) delegations for `parent_agent`
    /// whose results have not yet been injected, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn uninjected_delegations(
        &self,
        parent_agent: &AgentId,
    ) -> StoreResult<Vec<Delegation>> {
        let rows = sqlx::query(&format!(
            "SELECT {DELEGATION_COLUMNS} FROM delegations
             WHERE parent_agent = ? AND injected = 0 AND status IN ('completed', 'failed')
             ORDER BY created_at ASC"
        ))
        .bind(parent_agent.as_str())
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(delegation_from_row).collect()
    }

    // --- Messages ---

    /// Store an inter-agent message.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn send_message(
        &self,
        from_agent: &AgentId,
        to_agent: &AgentId,
        content: &str,
    ) -> StoreResult<Message> {
        let id = uuid::Uuid::new_v4();
        let now = now_str();
        sqlx::query(
            "INSERT INTO messages (id, from_agent, to_agent, content, read, created_at)
             VALUES (?, ?, ?, ?, 0, ?)",
        )
        .bind(id.to_string())
        .bind(from_agent.as_str())
        .bind(to_agent.as_str())
        .bind(content)
        .bind(&now)
        .execute(self.pool())
        .await?;

        Ok(Message {
            id,
            from_agent: from_agent.clone(),
            to_agent: to_agent.clone(),
            content: content.to_string(),
            read: false,
            created_at: parse_ts("messages", &now)?,
        })
    }

    /// Retrieve up to `limit` unread messages for `agent`, marking them
    /// read in the same statement (mark-on-read).
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn read_messages(&self, agent: &AgentId, limit: i64) -> StoreResult<Vec<Message>> {
        let rows = sqlx::query(
            "UPDATE messages SET read = 1
             WHERE id IN (
                 SELECT id FROM messages
                 WHERE to_agent = ? AND read = 0
                 ORDER BY created_at ASC
                 LIMIT ?
             )
             RETURNING id, from_agent, to_agent, content, read, created_at",
        )
        .bind(agent.as_str())
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        let mut messages: Vec<Message> = rows
            .iter()
            .map(message_from_row)
            .collect::<StoreResult<_>>()?;
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages)
    }
}

fn delegation_from_row(row: &SqliteRow) -> StoreResult<Delegation> {
    let status_raw: String = row.try_get("status")?;
    let status = DelegationStatus::parse(&status_raw).ok_or_else(|| StoreError::Corrupt {
        table: "delegations",
        detail: format!("unknown status {status_raw:?}"),
    })?;

    let id_raw: String = row.try_get("id")?;
    let id = DelegationId::parse(&id_raw).map_err(|e| StoreError::Corrupt {
        table: "delegations",
        detail: format!("bad uuid {id_raw:?}: {e}"),
    })?;

    let task_id = row
        .try_get::<Option<String>, _>("task_id")?
        .map(|s| {
            TaskId::parse(&s).map_err(|e| StoreError::Corrupt {
                table: "delegations",
                detail: format!("bad task uuid {s:?}: {e}"),
            })
        })
        .transpose()?;

    Ok(Delegation {
        id,
        parent_agent: AgentId::new(row.try_get::<String, _>("parent_agent")?),
        child_agent: AgentId::new(row.try_get::<String, _>("child_agent")?),
        prompt: row.try_get("prompt")?,
        task_id,
        status,
        result: row.try_get("result")?,
        error: row.try_get("error")?,
        injected: row.try_get::<i64, _>("injected")? != 0,
        created_at: parse_ts("delegations", &row.try_get::<String, _>("created_at")?)?,
    })
}

fn message_from_row(row: &SqliteRow) -> StoreResult<Message> {
    let id_raw: String = row.try_get("id")?;
    let id = uuid::Uuid::parse_str(&id_raw).map_err(|e| StoreError::Corrupt {
        table: "messages",
        detail: format!("bad uuid {id_raw:?}: {e}"),
    })?;

    Ok(Message {
        id,
        from_agent: AgentId::new(row.try_get::<String, _>("from_agent")?),
        to_agent: AgentId::new(row.try_get::<String, _>("to_agent")?),
        content: row.try_get("content")?,
        read: row.try_get::<i64, _>("read")? != 0,
        created_at: parse_ts("messages", &row.try_get::<String, _>("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewTask;
    use warden_core::SessionId;

    #[tokio::test]
    async fn test_delegation_lifecycle() {
        let store = Store::in_memory().await.unwrap();
        let parent = AgentId::from("parent");
        let child = AgentId::from("child");

        let delegation = store
            .create_delegation(&parent, &child, "summarize the logs")
            .await
            .unwrap();
        assert_eq!(delegation.status, DelegationStatus::Queued);
        assert!(delegation.task_id.is_none());
        assert!(!delegation.injected);

        let session = SessionId::new();
        store.ensure_session(&session).await.unwrap();
        let task = store
            .create_task(NewTask {
                session_id: session,
                agent_id: child.clone(),
                parent_task_id: None,
                payload: "{}".to_string(),
                priority: 0,
            })
            .await
            .unwrap();

        store.set_delegation_task(&delegation.id, &task.id).await.unwrap();
        store.complete_delegation(&delegation.id, "done").await.unwrap();

        let fetched = store.get_delegation(&delegation.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, DelegationStatus::Completed);
        assert_eq!(fetched.task_id, Some(task.id));
        assert_eq!(fetched.result.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_uninjected_collection() {
        let store = Store::in_memory().await.unwrap();
        let parent = AgentId::from("parent");
        let child = AgentId::from("child");

        let completed = store.create_delegation(&parent, &child, "a").await.unwrap();
        let failed = store.create_delegation(&parent, &child, "b").await.unwrap();
        let pending = store.create_delegation(&parent, &child, "c").await.unwrap();

        store.complete_delegation(&completed.id, "ok").await.unwrap();
        store.fail_delegation(&failed.id, "boom").await.unwrap();

        let ready = store.uninjected_delegations(&parent).await.unwrap();
        assert_eq!(ready.len(), 2);
        assert!(ready.iter().all(|d| d.id != pending.id));

        store.mark_delegation_injected(&completed.id).await.unwrap();
        store.mark_delegation_injected(&failed.id).await.unwrap();
        assert!(store.uninjected_delegations(&parent).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_messages_mark_on_read() {
        let store = Store::in_memory().await.unwrap();
        let alice = AgentId::from("alice");
        let bob = AgentId::from("bob");

        store.send_message(&alice, &bob, "one").await.unwrap();
        store.send_message(&alice, &bob, "two").await.unwrap();
        store.send_message(&bob, &alice, "reply").await.unwrap();

        let inbox = store.read_messages(&bob, 10).await.unwrap();
        assert_eq!(inbox.len(), 2);
        assert_eq!(inbox[0].content, "one");
        assert!(inbox.iter().all(|m| m.read));

        // Already marked read; nothing returned the second time.
        assert!(store.read_messages(&bob, 10).await.unwrap().is_empty());

        // Alice's inbox is separate.
        assert_eq!(store.read_messages(&alice, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_read_messages_limit() {
        let store = Store::in_memory().await.unwrap();
        let alice = AgentId::from("alice");
        let bob = AgentId::from("bob");

        for i in 0..5 {
            store.send_message(&alice, &bob, &format!("m{i}")).await.unwrap();
        }

        assert_eq!(store.read_messages(&bob, 3).await.unwrap().len(), 3);
        assert_eq!(store.read_messages(&bob, 3).await.unwrap().len(), 2);
    }
}
