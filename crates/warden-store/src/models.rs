//! Typed rows for the persistence layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_core::{AgentId, DelegationId, SessionId, TaskId};

/// Status of a scheduled work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting to be claimed.
    Queued,
    /// Claimed by a worker.
    Running,
    /// Finished with a result.
    Succeeded,
    /// Finished with an error.
    Failed,
    /// Aborted by a caller.
    Canceled,
    /// Poisoned; removed from normal scheduling.
    DeadLetter,
}

impl TaskStatus {
    /// Wire/storage form (`QUEUED`, `RUNNING`, ...).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
            Self::DeadLetter => "DEAD_LETTER",
        }
    }

    /// Parse the storage form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(Self::Queued),
            "RUNNING" => Some(Self::Running),
            "SUCCEEDED" => Some(Self::Succeeded),
            "FAILED" => Some(Self::Failed),
            "CANCELED" => Some(Self::Canceled),
            "DEAD_LETTER" => Some(Self::DeadLetter),
            _ => None,
        }
    }

    /// Whether this status is terminal (sticky).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Canceled | Self::DeadLetter
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A scheduled work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task id.
    pub id: TaskId,
    /// Owning session.
    pub session_id: SessionId,
    /// Agent the task is bound to.
    pub agent_id: AgentId,
    /// Parent task for spawned subtasks.
    pub parent_task_id: Option<TaskId>,
    /// Current status.
    pub status: TaskStatus,
    /// Opaque JSON payload.
    pub payload: String,
    /// Result, once succeeded.
    pub result: Option<String>,
    /// Error, once failed.
    pub error: Option<String>,
    /// Scheduling priority (higher first).
    pub priority: i64,
    /// Worker that claimed the task.
    pub lease_owner: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last transition time.
    pub updated_at: DateTime<Utc>,
}

/// Parameters for creating a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Owning session.
    pub session_id: SessionId,
    /// Agent the task is bound to.
    pub agent_id: AgentId,
    /// Parent task, for subtasks.
    pub parent_task_id: Option<TaskId>,
    /// Opaque JSON payload.
    pub payload: String,
    /// Scheduling priority (higher first).
    pub priority: i64,
}

/// Status of an asynchronous delegation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelegationStatus {
    /// Created, backing task not yet finished.
    Queued,
    /// Backing task claimed.
    Running,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Failed,
    /// Aborted.
    Canceled,
}

impl DelegationStatus {
    /// Storage form (`queued`, `running`, ...).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// Parse the storage form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }
}

impl std::fmt::Display for DelegationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An asynchronous inter-agent delegation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delegation {
    /// Delegation id.
    pub id: DelegationId,
    /// The delegating agent.
    pub parent_agent: AgentId,
    /// The agent doing the work.
    pub child_agent: AgentId,
    /// The delegated prompt.
    pub prompt: String,
    /// Backing task, set once created.
    pub task_id: Option<TaskId>,
    /// Current status.
    pub status: DelegationStatus,
    /// Result, once completed.
    pub result: Option<String>,
    /// Error, once failed.
    pub error: Option<String>,
    /// Whether the result was injected into the parent's turn.
    pub injected: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// An inter-agent message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Message id.
    pub id: uuid::Uuid,
    /// Sending agent.
    pub from_agent: AgentId,
    /// Receiving agent.
    pub to_agent: AgentId,
    /// Message body.
    pub content: String,
    /// Whether the recipient has read it.
    pub read: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// An addressable agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Agent id (name).
    pub id: AgentId,
    /// Operator-facing description.
    pub description: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// An installed skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillRecord {
    /// Normalized skill name.
    pub name: String,
    /// Declared version.
    pub version: String,
    /// Install location on disk.
    pub path: String,
    /// Content hash of the installed tree.
    pub content_hash: String,
    /// Install time.
    pub installed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_roundtrip() {
        for status in [
            TaskStatus::Queued,
            TaskStatus::Running,
            TaskStatus::Succeeded,
            TaskStatus::Failed,
            TaskStatus::Canceled,
            TaskStatus::DeadLetter,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("queued"), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Succeeded.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Canceled.is_terminal());
        assert!(TaskStatus::DeadLetter.is_terminal());
    }

    #[test]
    fn test_delegation_status_roundtrip() {
        for status in [
            DelegationStatus::Queued,
            DelegationStatus::Running,
            DelegationStatus::Completed,
            DelegationStatus::Failed,
            DelegationStatus::Canceled,
        ] {
            assert_eq!(DelegationStatus::parse(status.as_str()), Some(status));
        }
    }
}
