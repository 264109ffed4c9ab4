//! Warden Store - embedded persistence for the host runtime.
//!
//! One SQLite database holds everything that must survive a restart:
//! sessions, the task queue, inter-agent messages, delegations,
//! tool-call dedup records, skill fault counters, the installed-skill
//! registry, the guest key-value namespace, and the optional audit
//! mirror.
//!
//! # Contracts
//!
//! - Tasks move only along `QUEUED → RUNNING → {SUCCEEDED, FAILED,
//!   CANCELED, DEAD_LETTER}`; terminal states are sticky. Transitions
//!   are guarded single-statement updates, so they are linearizable.
//! - Dedup lookups are exact-match on the key and require an equal
//!   request hash; records are written only after a side effect
//!   succeeds.
//! - Skill fault increments are atomic; crossing the threshold sets
//!   the persistent quarantine flag.
//! - Deleting a session cascades to its tasks and delegations, never
//!   to the audit mirror.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod models;
mod store;

pub use error::{StoreError, StoreResult};
pub use models::{
    AgentRecord, Delegation, DelegationStatus, Message, NewTask, SkillRecord, Task, TaskStatus,
};
pub use store::Store;
