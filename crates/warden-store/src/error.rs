//! Store error types.

use thiserror::Error;

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored value failed to parse back into its typed form.
    #[error("corrupt row in {table}: {detail}")]
    Corrupt {
        /// Table the row came from.
        table: &'static str,
        /// What failed to parse.
        detail: String,
    },

    /// A requested row does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What kind of record was looked up.
        kind: &'static str,
        /// Identifier used for the lookup.
        id: String,
    },

    /// A task status transition violated the state machine.
    #[error("invalid task transition for {task_id}: {detail}")]
    InvalidTransition {
        /// The task that refused the transition.
        task_id: String,
        /// What was attempted.
        detail: String,
    },

    /// A dedup key exists but was registered for a different request.
    #[error("dedup key {key} exists with a different request hash")]
    DedupHashMismatch {
        /// The conflicting dedup key.
        key: String,
    },
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
