//! Policy error types.

use thiserror::Error;

/// Errors from policy load, validation, and persistence.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The policy file could not be read.
    #[error("failed to read policy file {path}: {source}")]
    Read {
        /// File path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The policy file is not valid YAML.
    #[error("failed to parse policy file {path}: {source}")]
    Parse {
        /// File path.
        path: String,
        /// Underlying YAML error.
        #[source]
        source: serde_yaml::Error,
    },

    /// A granted capability is outside the closed vocabulary.
    #[error("unknown capability in policy: {name:?}")]
    UnknownCapability {
        /// The offending name, as written in the file.
        name: String,
    },

    /// The policy file could not be written back after a mutation.
    #[error("failed to persist policy file {path}: {source}")]
    Persist {
        /// File path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The policy file could not be serialized for persistence.
    #[error("failed to serialize policy: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

/// Result type for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;
