//! On-disk policy file schema.
//!
//! Policies are YAML with top-level `allow_domains`, `allow_paths`,
//! `allow_capabilities`, `allow_loopback`, and an `mcp` section. All
//! keys are optional; an empty file is the default-deny policy.

use serde::{Deserialize, Serialize};

/// Serde schema for the policy YAML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyFile {
    /// Host suffixes allowed for outbound HTTP.
    #[serde(default)]
    pub allow_domains: Vec<String>,
    /// Absolute path prefixes allowed for filesystem access.
    /// Empty means all paths are allowed.
    #[serde(default)]
    pub allow_paths: Vec<String>,
    /// Granted capabilities (must be in the closed vocabulary).
    #[serde(default)]
    pub allow_capabilities: Vec<String>,
    /// Whether loopback hosts are reachable.
    #[serde(default)]
    pub allow_loopback: bool,
    /// Per-agent MCP tool access rules.
    #[serde(default)]
    pub mcp: McpSection,
}

/// The `mcp` section of the policy file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpSection {
    /// Fallback decision when no rule matches: `allow` or `deny`.
    #[serde(default = "default_mcp_default")]
    pub default: String,
    /// Ordered rule list.
    #[serde(default)]
    pub rules: Vec<McpRuleFile>,
}

impl Default for McpSection {
    fn default() -> Self {
        Self {
            default: default_mcp_default(),
            rules: Vec::new(),
        }
    }
}

fn default_mcp_default() -> String {
    "deny".to_string()
}

/// One MCP access rule as written in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpRuleFile {
    /// Agent name or `*`.
    pub agent: String,
    /// Server name or `*`.
    pub server: String,
    /// Allowed tool names, `*` for all. An empty list is an explicit
    /// deny for the matched agent/server combination.
    #[serde(default)]
    pub tools: Vec<String>,
}
