//! Task queue operations.
//!
//! Tasks move only along `QUEUED → RUNNING → {SUCCEEDED, FAILED,
//! CANCELED, DEAD_LETTER}`. Every transition is a single guarded
//! `UPDATE`, so concurrent workers cannot double-claim and terminal
//! states are sticky.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

use warden_core::{AgentId, SessionId, TaskId};

use crate::error::{StoreError, StoreResult};
use crate::models::{NewTask, Task, TaskStatus};

use super::{now_str, parse_ts, Store};

const TASK_COLUMNS: &str = "id, session_id, agent_id, parent_task_id, status, payload, \
                            result, error, priority, lease_owner, created_at, updated_at";

impl Store {
    /// Insert a new QUEUED task.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn create_task(&self, new_task: NewTask) -> StoreResult<Task> {
        let id = TaskId::new();
        let now = now_str();
        sqlx::query(
            "INSERT INTO tasks (id, session_id, agent_id, parent_task_id, status, payload,
                                priority, created_at, updated_at)
             VALUES (?, ?, ?, ?, 'QUEUED', ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(new_task.session_id.to_string())
        .bind(new_task.agent_id.as_str())
        .bind(new_task.parent_task_id.as_ref().map(ToString::to_string))
        .bind(&new_task.payload)
        .bind(new_task.priority)
        .bind(&now)
        .bind(&now)
        .execute(self.pool())
        .await?;

        debug!(task = %id, agent = %new_task.agent_id, "Task queued");
        self.get_task(&id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: "task",
                id: id.to_string(),
            })
    }

    /// Fetch a task by id.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or a corrupt row.
    pub async fn get_task(&self, task_id: &TaskId) -> StoreResult<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"))
            .bind(task_id.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.map(|row| task_from_row(&row)).transpose()
    }

    /// Atomically claim the next QUEUED task bound to `agent`.
    ///
    /// Claims by priority (highest first), then age. The claimed task
    /// is flipped to RUNNING and stamped with `lease_owner`.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn claim_task(
        &self,
        agent: &AgentId,
        lease_owner: &str,
    ) -> StoreResult<Option<Task>> {
        let row = sqlx::query(&format!(
            "UPDATE tasks
             SET status = 'RUNNING', lease_owner = ?, updated_at = ?
             WHERE id = (
                 SELECT id FROM tasks
                 WHERE agent_id = ? AND status = 'QUEUED'
                 ORDER BY priority DESC, created_at ASC
                 LIMIT 1
             )
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(lease_owner)
        .bind(now_str())
        .bind(agent.as_str())
        .fetch_optional(self.pool())
        .await?;
        row.map(|row| task_from_row(&row)).transpose()
    }

    /// Flip a specific QUEUED task to RUNNING.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidTransition`] if the task is not
    /// QUEUED.
    pub async fn start_task(&self, task_id: &TaskId, lease_owner: &str) -> StoreResult<Task> {
        self.transition(
            task_id,
            "SET status = 'RUNNING', lease_owner = ?2, updated_at = ?3
             WHERE id = ?1 AND status = 'QUEUED'",
            Some(lease_owner),
            "start requires QUEUED",
        )
        .await
    }

    /// Record success: RUNNING → SUCCEEDED with a result.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidTransition`] if the task is not
    /// RUNNING.
    pub async fn complete_task(&self, task_id: &TaskId, result: &str) -> StoreResult<Task> {
        self.transition(
            task_id,
            "SET status = 'SUCCEEDED', result = ?2, updated_at = ?3
             WHERE id = ?1 AND status = 'RUNNING'",
            Some(result),
            "complete requires RUNNING",
        )
        .await
    }

    /// Record failure: RUNNING → FAILED with an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidTransition`] if the task is not
    /// RUNNING.
    pub async fn fail_task(&self, task_id: &TaskId, error: &str) -> StoreResult<Task> {
        self.transition(
            task_id,
            "SET status = 'FAILED', error = ?2, updated_at = ?3
             WHERE id = ?1 AND status = 'RUNNING'",
            Some(error),
            "fail requires RUNNING",
        )
        .await
    }

    /// Move a poisoned task to DEAD_LETTER (from QUEUED or RUNNING).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidTransition`] if the task is already
    /// terminal.
    pub async fn dead_letter_task(&self, task_id: &TaskId, error: &str) -> StoreResult<Task> {
        self.transition(
            task_id,
            "SET status = 'DEAD_LETTER', error = ?2, updated_at = ?3
             WHERE id = ?1 AND status IN ('QUEUED', 'RUNNING')",
            Some(error),
            "dead-letter requires a non-terminal status",
        )
        .await
    }

    /// Abort a task: QUEUED or RUNNING → CANCELED.
    ///
    /// Aborting an already-terminal task is a no-op returning the task
    /// as-is, so callers canceling a delegation race safely against the
    /// worker finishing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the task does not exist.
    pub async fn abort_task(&self, task_id: &TaskId) -> StoreResult<Task> {
        sqlx::query(
            "UPDATE tasks SET status = 'CANCELED', updated_at = ?2
             WHERE id = ?1 AND status IN ('QUEUED', 'RUNNING')",
        )
        .bind(task_id.to_string())
        .bind(now_str())
        .execute(self.pool())
        .await?;

        self.get_task(task_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: "task",
                id: task_id.to_string(),
            })
    }

    /// Tasks belonging to a session, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn list_session_tasks(&self, session_id: &SessionId) -> StoreResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE session_id = ? ORDER BY created_at ASC"
        ))
        .bind(session_id.to_string())
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn transition(
        &self,
        task_id: &TaskId,
        set_where: &str,
        arg: Option<&str>,
        requirement: &str,
    ) -> StoreResult<Task> {
        let sql = format!("UPDATE tasks {set_where} RETURNING {TASK_COLUMNS}");
        let mut query = sqlx::query(&sql).bind(task_id.to_string());
        if let Some(arg) = arg {
            query = query.bind(arg);
        }
        let row = query.bind(now_str()).fetch_optional(self.pool()).await?;

        match row {
            Some(row) => task_from_row(&row),
            None => {
                let current = self.get_task(task_id).await?;
                match current {
                    Some(task) => Err(StoreError::InvalidTransition {
                        task_id: task_id.to_string(),
                        detail: format!("{requirement}, task is {}", task.status),
                    }),
                    None => Err(StoreError::NotFound {
                        kind: "task",
                        id: task_id.to_string(),
                    }),
                }
            },
        }
    }
}

fn task_from_row(row: &SqliteRow) -> StoreResult<Task> {
    let status_raw: String = row.try_get("status")?;
    let status = TaskStatus::parse(&status_raw).ok_or_else(|| StoreError::Corrupt {
        table: "tasks",
        detail: format!("unknown status {status_raw:?}"),
    })?;

    let id = parse_id::<TaskId>(row.try_get::<String, _>("id")?, "tasks")?;
    let session_id = parse_id::<SessionId>(row.try_get::<String, _>("session_id")?, "tasks")?;
    let parent_task_id = row
        .try_get::<Option<String>, _>("parent_task_id")?
        .map(|s| parse_id::<TaskId>(s, "tasks"))
        .transpose()?;

    Ok(Task {
        id,
        session_id,
        agent_id: AgentId::new(row.try_get::<String, _>("agent_id")?),
        parent_task_id,
        status,
        payload: row.try_get("payload")?,
        result: row.try_get("result")?,
        error: row.try_get("error")?,
        priority: row.try_get("priority")?,
        lease_owner: row.try_get("lease_owner")?,
        created_at: parse_ts("tasks", &row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_ts("tasks", &row.try_get::<String, _>("updated_at")?)?,
    })
}

trait ParseableId: Sized {
    fn from_str(s: &str) -> Result<Self, uuid::Error>;
}

impl ParseableId for TaskId {
    fn from_str(s: &str) -> Result<Self, uuid::Error> {
        Self::parse(s)
    }
}

impl ParseableId for SessionId {
    fn from_str(s: &str) -> Result<Self, uuid::Error> {
        Self::parse(s)
    }
}

fn parse_id<T: ParseableId>(s: String, table: &'static str) -> StoreResult<T> {
    T::from_str(&s).map_err(|e| StoreError::Corrupt {
        table,
        detail: format!("bad uuid {s:?}: {e}"),
    })
}
