//! The SQLite-backed store.

mod dedup;
mod delegations;
mod skills;
mod tasks;

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use warden_audit::AuditEntry;
use warden_core::{AgentId, SessionId};
use warden_events::EventBus;

use crate::error::{StoreError, StoreResult};
use crate::models::AgentRecord;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS sessions (
    id         TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS agents (
    id          TEXT PRIMARY KEY,
    description TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tasks (
    id             TEXT PRIMARY KEY,
    session_id     TEXT NOT NULL,
    agent_id       TEXT NOT NULL,
    parent_task_id TEXT,
    status         TEXT NOT NULL,
    payload        TEXT NOT NULL,
    result         TEXT,
    error          TEXT,
    priority       INTEGER NOT NULL DEFAULT 0,
    lease_owner    TEXT,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tasks_claim
    ON tasks (agent_id, status, priority, created_at);
CREATE INDEX IF NOT EXISTS idx_tasks_session ON tasks (session_id);

CREATE TABLE IF NOT EXISTS messages (
    id         TEXT PRIMARY KEY,
    from_agent TEXT NOT NULL,
    to_agent   TEXT NOT NULL,
    content    TEXT NOT NULL,
    read       INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_inbox ON messages (to_agent, read, created_at);

CREATE TABLE IF NOT EXISTS delegations (
    id           TEXT PRIMARY KEY,
    parent_agent TEXT NOT NULL,
    child_agent  TEXT NOT NULL,
    prompt       TEXT NOT NULL,
    task_id      TEXT,
    status       TEXT NOT NULL,
    result       TEXT,
    error        TEXT,
    injected     INTEGER NOT NULL DEFAULT 0,
    created_at   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_delegations_inject
    ON delegations (parent_agent, injected, status);

CREATE TABLE IF NOT EXISTS tool_call_dedup (
    dedup_key  TEXT PRIMARY KEY,
    req_hash   TEXT NOT NULL,
    result_ref TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS skill_faults (
    module      TEXT PRIMARY KEY,
    fault_count INTEGER NOT NULL DEFAULT 0,
    quarantined INTEGER NOT NULL DEFAULT 0,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS skill_registry (
    name         TEXT PRIMARY KEY,
    version      TEXT NOT NULL,
    path         TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    installed_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_mirror (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp      TEXT NOT NULL,
    decision       TEXT NOT NULL,
    capability     TEXT NOT NULL,
    reason         TEXT NOT NULL,
    policy_version INTEGER NOT NULL,
    subject        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS kv (
    namespace  TEXT NOT NULL,
    key        TEXT NOT NULL,
    value      BLOB NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (namespace, key)
);
";

/// The embedded persistence store.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    events: Option<EventBus>,
}

impl Store {
    /// Open (or create) the database file at `path` and run migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self { pool, events: None };
        store.migrate().await?;
        info!(path = %path.as_ref().display(), "Store opened");
        Ok(store)
    }

    /// Open an in-memory database (tests).
    ///
    /// A single connection is used so the in-memory database is shared
    /// across all operations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub async fn in_memory() -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool, events: None };
        store.migrate().await?;
        Ok(store)
    }

    /// Attach the process-wide event bus.
    #[must_use]
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// The attached event bus, if any. Bus absence is never fatal.
    #[must_use]
    pub fn event_bus(&self) -> Option<&EventBus> {
        self.events.as_ref()
    }

    async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // --- Sessions ---

    /// Create a session; inserting an existing id is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn ensure_session(&self, session_id: &SessionId) -> StoreResult<()> {
        sqlx::query("INSERT OR IGNORE INTO sessions (id, created_at) VALUES (?, ?)")
            .bind(session_id.to_string())
            .bind(now_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Whether a session exists.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn session_exists(&self, session_id: &SessionId) -> StoreResult<bool> {
        let row = sqlx::query("SELECT 1 FROM sessions WHERE id = ?")
            .bind(session_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Delete a session and cascade to its tasks.
    ///
    /// The audit mirror is deliberately untouched: retention of the
    /// decision trail outlives session retention.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn delete_session(&self, session_id: &SessionId) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM tasks WHERE session_id = ?")
            .bind(session_id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        debug!(session = %session_id, "Session deleted with its tasks");
        Ok(())
    }

    // --- Agents ---

    /// Create or update an agent.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn upsert_agent(&self, agent_id: &AgentId, description: &str) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO agents (id, description, created_at) VALUES (?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET description = excluded.description",
        )
        .bind(agent_id.as_str())
        .bind(description)
        .bind(now_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Look up an agent.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn get_agent(&self, agent_id: &AgentId) -> StoreResult<Option<AgentRecord>> {
        let row = sqlx::query("SELECT id, description, created_at FROM agents WHERE id = ?")
            .bind(agent_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(AgentRecord {
                id: AgentId::new(row.try_get::<String, _>("id")?),
                description: row.try_get("description")?,
                created_at: parse_ts("agents", &row.try_get::<String, _>("created_at")?)?,
            })
        })
        .transpose()
    }

    /// List all agents.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn list_agents(&self) -> StoreResult<Vec<AgentRecord>> {
        let rows = sqlx::query("SELECT id, description, created_at FROM agents ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok(AgentRecord {
                    id: AgentId::new(row.try_get::<String, _>("id")?),
                    description: row.try_get("description")?,
                    created_at: parse_ts("agents", &row.try_get::<String, _>("created_at")?)?,
                })
            })
            .collect()
    }

    /// Remove an agent.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn remove_agent(&self, agent_id: &AgentId) -> StoreResult<()> {
        sqlx::query("DELETE FROM agents WHERE id = ?")
            .bind(agent_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- Guest key-value namespace ---

    /// Read a value from the guest KV namespace.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn kv_get(&self, namespace: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT value FROM kv WHERE namespace = ? AND key = ?")
            .bind(namespace)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| Ok(row.try_get::<Vec<u8>, _>("value")?)).transpose()
    }

    /// Write a value into the guest KV namespace.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn kv_set(&self, namespace: &str, key: &str, value: &[u8]) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO kv (namespace, key, value, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT (namespace, key) DO UPDATE
             SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(namespace)
        .bind(key)
        .bind(value)
        .bind(now_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // --- Audit mirror ---

    /// Consume mirrored audit entries until the channel closes.
    ///
    /// Spawn this on the runtime next to the [`warden_audit::AuditSink`]
    /// it mirrors. Insert failures are logged and skipped; the mirror
    /// is an observability aid, the JSONL file is the authority.
    pub async fn run_audit_mirror(&self, mut entries: mpsc::UnboundedReceiver<AuditEntry>) {
        while let Some(entry) = entries.recv().await {
            let result = sqlx::query(
                "INSERT INTO audit_mirror
                     (timestamp, decision, capability, reason, policy_version, subject)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&entry.timestamp)
            .bind(entry.decision.to_string())
            .bind(&entry.capability)
            .bind(&entry.reason)
            .bind(i64::from_ne_bytes(entry.policy_version.to_ne_bytes()))
            .bind(&entry.subject)
            .execute(&self.pool)
            .await;
            if let Err(e) = result {
                error!(error = %e, "Audit mirror insert failed");
            }
        }
        debug!("Audit mirror channel closed");
    }

    /// Number of mirrored audit rows (observability).
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn audit_mirror_count(&self) -> StoreResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM audit_mirror")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

/// Current time in RFC3339 for storage.
pub(crate) fn now_str() -> String {
    Utc::now().to_rfc3339()
}

/// Parse an RFC3339 timestamp from storage.
pub(crate) fn parse_ts(table: &'static str, s: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            table,
            detail: format!("bad timestamp {s:?}: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_audit::Decision;

    #[tokio::test]
    async fn test_sessions() {
        let store = Store::in_memory().await.unwrap();
        let session = SessionId::new();

        assert!(!store.session_exists(&session).await.unwrap());
        store.ensure_session(&session).await.unwrap();
        store.ensure_session(&session).await.unwrap();
        assert!(store.session_exists(&session).await.unwrap());

        store.delete_session(&session).await.unwrap();
        assert!(!store.session_exists(&session).await.unwrap());
    }

    #[tokio::test]
    async fn test_agents_crud() {
        let store = Store::in_memory().await.unwrap();
        let agent = AgentId::from("coder");

        assert!(store.get_agent(&agent).await.unwrap().is_none());
        store.upsert_agent(&agent, "writes code").await.unwrap();
        let record = store.get_agent(&agent).await.unwrap().unwrap();
        assert_eq!(record.description, "writes code");

        store.upsert_agent(&agent, "writes better code").await.unwrap();
        let record = store.get_agent(&agent).await.unwrap().unwrap();
        assert_eq!(record.description, "writes better code");

        assert_eq!(store.list_agents().await.unwrap().len(), 1);
        store.remove_agent(&agent).await.unwrap();
        assert!(store.get_agent(&agent).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_kv_roundtrip() {
        let store = Store::in_memory().await.unwrap();
        assert!(store.kv_get("skill:a", "k").await.unwrap().is_none());

        store.kv_set("skill:a", "k", b"v1").await.unwrap();
        store.kv_set("skill:a", "k", b"v2").await.unwrap();
        assert_eq!(store.kv_get("skill:a", "k").await.unwrap().unwrap(), b"v2");
        // Namespaces are disjoint.
        assert!(store.kv_get("skill:b", "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_audit_mirror_consumes_entries() {
        let store = Store::in_memory().await.unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tx.send(AuditEntry::now(Decision::Deny, "tools.exec", "no", 42, "agent-a"))
            .unwrap();
        drop(tx);
        store.run_audit_mirror(rx).await;

        assert_eq!(store.audit_mirror_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("warden.db")).await.unwrap();
        let session = SessionId::new();
        store.ensure_session(&session).await.unwrap();
        assert!(store.session_exists(&session).await.unwrap());
    }
}
