//! Skill loading and installation errors.

use thiserror::Error;

/// Errors from manifest parsing, loading, and installation.
#[derive(Debug, Error)]
pub enum SkillError {
    /// The manifest exceeds the size bound.
    #[error("manifest too large: {size} bytes (max {max})")]
    TooLarge {
        /// Actual size.
        size: usize,
        /// The bound.
        max: usize,
    },

    /// A `---` frontmatter block was opened but never closed.
    #[error("unclosed frontmatter delimiter")]
    UnclosedFrontmatter,

    /// No skill name could be extracted.
    #[error("missing name in manifest")]
    MissingName,

    /// The manifest carries no script block.
    #[error("missing script in manifest")]
    MissingScript,

    /// The skill name fails validation.
    #[error("invalid skill name: {name:?}")]
    InvalidName {
        /// The offending name.
        name: String,
    },

    /// Installed skills must parse at the frontmatter stage.
    #[error("installed skill {name:?} does not use frontmatter")]
    FrontmatterRequired {
        /// The skill name.
        name: String,
    },

    /// Symlinked skill directories are refused.
    #[error("symlink not allowed: {path}")]
    SymlinkNotAllowed {
        /// The symlinked path.
        path: String,
    },

    /// The YAML payload failed to parse.
    #[error("manifest YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Filesystem failure.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path involved.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The install could not be completed; any backup was restored.
    #[error("install failed for {name:?}: {detail}")]
    InstallFailed {
        /// The skill name.
        name: String,
        /// What went wrong.
        detail: String,
    },

    /// Registry persistence failed.
    #[error("store error: {0}")]
    Store(#[from] warden_store::StoreError),
}

impl SkillError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Result type for skill operations.
pub type SkillResult<T> = Result<T, SkillError>;
