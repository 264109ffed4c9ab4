//! MCP server configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Configuration for a single MCP server.
///
/// A config with neither `command` nor `url` is a *reference*: the
/// per-agent entry aliases the global connection of the same name
/// instead of spawning its own process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server name (unique within its pool).
    pub name: String,
    /// Command to spawn (stdio transport).
    #[serde(default)]
    pub command: Option<String>,
    /// Arguments for the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// URL (reserved for network transports; unused by stdio).
    #[serde(default)]
    pub url: Option<String>,
    /// Environment overrides layered over the parent environment.
    /// Values may reference parent variables as `${VAR}`.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl ServerConfig {
    /// Create a stdio server config.
    #[must_use]
    pub fn stdio(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: Some(command.into()),
            ..Self::default()
        }
    }

    /// Create a reference to a global server of the same name.
    #[must_use]
    pub fn reference(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add arguments.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Add an environment override.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Whether this config references a global server instead of
    /// describing its own transport.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        self.command.as_deref().unwrap_or("").is_empty()
            && self.url.as_deref().unwrap_or("").is_empty()
    }

    /// The environment overrides with `${VAR}` references expanded
    /// from the parent environment. Unset references expand empty.
    #[must_use]
    pub fn expanded_env(&self) -> HashMap<String, String> {
        self.env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_refs(v)))
            .collect()
    }
}

/// Expand `${VAR}` references in a value from the process environment.
fn expand_env_refs(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var = &after[..end];
                out.push_str(&std::env::var(var).unwrap_or_default());
                rest = &after[end + 1..];
            },
            None => {
                // Unclosed reference; keep literal.
                out.push_str(&rest[start..]);
                rest = "";
            },
        }
    }
    out.push_str(rest);
    out
}
