//! Audit error types.

use thiserror::Error;

/// Errors from audit log initialization.
///
/// Recording itself never fails; only opening the sink can.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The audit file could not be opened or created.
    #[error("failed to open audit log {path}: {source}")]
    Open {
        /// Path that failed to open.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The parent directory could not be created.
    #[error("failed to create audit log directory {path}: {source}")]
    CreateDir {
        /// Directory that failed to create.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Result type for audit operations.
pub type AuditResult<T> = Result<T, AuditError>;
