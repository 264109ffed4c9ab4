//! Immutable policy snapshots and their decision logic.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::path::{Component, Path, PathBuf};

use url::{Host, Url};

use warden_core::capability::{is_known_capability, normalize_capability};

use crate::error::{PolicyError, PolicyResult};
use crate::file::PolicyFile;

/// Fallback decision for MCP tool access when no rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpDefault {
    /// Unmatched calls are permitted.
    Allow,
    /// Unmatched calls are refused.
    Deny,
}

impl McpDefault {
    fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("allow") {
            Self::Allow
        } else {
            Self::Deny
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

/// A normalized MCP access rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McpRule {
    /// Agent name or `*`.
    pub agent: String,
    /// Server name or `*`.
    pub server: String,
    /// Allowed tools; `*` entry permits all. Empty list is an explicit
    /// deny for the matched agent/server combination.
    pub tools: Vec<String>,
}

impl McpRule {
    /// Specificity score when this rule matches `(agent, server)`.
    ///
    /// Agent: exact = 4, wildcard = 1. Server: exact = 2, wildcard = 0.
    /// Returns `None` when either component mismatches.
    fn match_score(&self, agent: &str, server: &str) -> Option<u8> {
        let agent_score = if self.agent == agent {
            4
        } else if self.agent == "*" {
            1
        } else {
            return None;
        };
        let server_score = if self.server == server {
            2
        } else if self.server == "*" {
            0
        } else {
            return None;
        };
        Some(agent_score + server_score)
    }

    /// Whether the rule's tool list permits `tool`.
    fn permits_tool(&self, tool: &str) -> bool {
        self.tools.iter().any(|t| t == "*" || t == tool)
    }
}

/// An immutable view of the active policy.
///
/// Snapshots are built once (at load or mutation time), validated, and
/// replaced wholesale; decision methods never lock or allocate beyond
/// path resolution.
#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    allow_domains: BTreeSet<String>,
    allow_paths: BTreeSet<String>,
    allow_capabilities: BTreeSet<String>,
    allow_loopback: bool,
    mcp_default: McpDefault,
    mcp_rules: Vec<McpRule>,
    version: u64,
}

impl PolicySnapshot {
    /// The default-deny policy: nothing granted, loopback closed,
    /// MCP defaulting to deny.
    #[must_use]
    pub fn default_deny() -> Self {
        Self::build(
            BTreeSet::new(),
            BTreeSet::new(),
            BTreeSet::new(),
            false,
            McpDefault::Deny,
            Vec::new(),
        )
    }

    /// Build a snapshot from a parsed policy file.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::UnknownCapability`] if any granted
    /// capability is outside the closed vocabulary.
    pub fn from_file(file: &PolicyFile) -> PolicyResult<Self> {
        let mut capabilities = BTreeSet::new();
        for raw in &file.allow_capabilities {
            let normalized = normalize_capability(raw);
            if !is_known_capability(&normalized) {
                return Err(PolicyError::UnknownCapability { name: raw.clone() });
            }
            capabilities.insert(normalized);
        }

        let domains = file
            .allow_domains
            .iter()
            .map(|d| d.trim().to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();

        let paths = file
            .allow_paths
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();

        let rules = file
            .mcp
            .rules
            .iter()
            .map(|r| McpRule {
                agent: r.agent.trim().to_string(),
                server: r.server.trim().to_string(),
                tools: r.tools.iter().map(|t| t.trim().to_string()).collect(),
            })
            .collect();

        Ok(Self::build(
            domains,
            paths,
            capabilities,
            file.allow_loopback,
            McpDefault::parse(&file.mcp.default),
            rules,
        ))
    }

    fn build(
        allow_domains: BTreeSet<String>,
        allow_paths: BTreeSet<String>,
        allow_capabilities: BTreeSet<String>,
        allow_loopback: bool,
        mcp_default: McpDefault,
        mcp_rules: Vec<McpRule>,
    ) -> Self {
        let mut snapshot = Self {
            allow_domains,
            allow_paths,
            allow_capabilities,
            allow_loopback,
            mcp_default,
            mcp_rules,
            version: 0,
        };
        snapshot.version = snapshot.compute_version();
        snapshot
    }

    /// Stable 64-bit version hash of this snapshot.
    ///
    /// FNV-1a over the canonical rendering of all fields; identical
    /// content yields the identical version across process restarts.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    fn compute_version(&self) -> u64 {
        let mut canonical = String::new();
        canonical.push_str("domains=");
        for d in &self.allow_domains {
            canonical.push_str(d);
            canonical.push(',');
        }
        canonical.push_str(";paths=");
        for p in &self.allow_paths {
            canonical.push_str(p);
            canonical.push(',');
        }
        canonical.push_str(";caps=");
        for c in &self.allow_capabilities {
            canonical.push_str(c);
            canonical.push(',');
        }
        canonical.push_str(";loopback=");
        canonical.push_str(if self.allow_loopback { "1" } else { "0" });
        canonical.push_str(";mcp=");
        canonical.push_str(self.mcp_default.as_str());
        canonical.push_str(";rules=");
        for rule in &self.mcp_rules {
            canonical.push_str(&rule.agent);
            canonical.push('|');
            canonical.push_str(&rule.server);
            canonical.push('|');
            for t in &rule.tools {
                canonical.push_str(t);
                canonical.push(',');
            }
            canonical.push(';');
        }
        fnv1a_64(canonical.as_bytes())
    }

    /// Whether a capability is granted. Default deny.
    #[must_use]
    pub fn allow_capability(&self, name: &str) -> bool {
        self.allow_capabilities
            .contains(&normalize_capability(name))
    }

    /// Whether an outbound HTTP(S) URL is permitted.
    ///
    /// Non-HTTP schemes, unparseable URLs, and non-loopback special
    /// addresses are always denied. Loopback hosts (IP literals or
    /// `localhost`) are permitted only when the policy opens loopback.
    /// Other hosts must equal an allowed domain or be a dotted
    /// subdomain of one.
    #[must_use]
    pub fn allow_http_url(&self, raw: &str) -> bool {
        let Ok(url) = Url::parse(raw) else {
            return false;
        };
        if url.scheme() != "http" && url.scheme() != "https" {
            return false;
        }
        let Some(host) = url.host() else {
            return false;
        };

        match host {
            Host::Ipv4(ip) => self.allow_ip(IpAddr::V4(ip)),
            Host::Ipv6(ip) => self.allow_ip(IpAddr::V6(ip)),
            Host::Domain(domain) => {
                let domain = domain.to_ascii_lowercase();
                if domain == "localhost" {
                    return self.allow_loopback;
                }
                self.domain_allowed(&domain)
            },
        }
    }

    fn allow_ip(&self, ip: IpAddr) -> bool {
        if ip_is_special(ip) {
            return self.allow_loopback && ip.is_loopback();
        }
        // Public IP literals never match a domain suffix.
        false
    }

    fn domain_allowed(&self, host: &str) -> bool {
        self.allow_domains
            .iter()
            .any(|d| host == d || host.ends_with(&format!(".{d}")))
    }

    /// Whether a filesystem path is permitted.
    ///
    /// An empty allow list permits everything. Otherwise the path is
    /// symlink-resolved (falling back to its parent when the leaf does
    /// not exist yet), absolutized, and compared component-wise against
    /// each resolved allowed root. `..` traversal resolves before the
    /// comparison, so escapes are denied.
    #[must_use]
    pub fn allow_path(&self, path: &Path) -> bool {
        if self.allow_paths.is_empty() {
            return true;
        }
        let resolved = resolve_path(path);
        self.allow_paths.iter().any(|root| {
            let root = resolve_path(Path::new(root));
            resolved == root || resolved.starts_with(&root)
        })
    }

    /// Whether an agent may call a tool on an MCP server.
    ///
    /// The highest-specificity matching rule decides; ties break by
    /// first-seen. A matching rule permits the tool iff its tool list
    /// contains the tool or `*`; an empty list is an explicit deny.
    /// With no matching rule, the section default applies.
    #[must_use]
    pub fn allow_mcp_tool(&self, agent: &str, server: &str, tool: &str) -> bool {
        let mut best: Option<(u8, &McpRule)> = None;
        for rule in &self.mcp_rules {
            if let Some(score) = rule.match_score(agent, server) {
                let beats = best.map_or(true, |(best_score, _)| score > best_score);
                if beats {
                    best = Some((score, rule));
                }
            }
        }

        match best {
            Some((_, rule)) => rule.permits_tool(tool),
            None => self.mcp_default == McpDefault::Allow,
        }
    }

    /// Whether loopback hosts are open.
    #[must_use]
    pub fn allow_loopback(&self) -> bool {
        self.allow_loopback
    }

    /// Granted capabilities, sorted.
    #[must_use]
    pub fn capabilities(&self) -> &BTreeSet<String> {
        &self.allow_capabilities
    }

    /// Allowed domains, sorted.
    #[must_use]
    pub fn domains(&self) -> &BTreeSet<String> {
        &self.allow_domains
    }

    /// Render this snapshot back into the file schema (for persistence
    /// after a live mutation).
    #[must_use]
    pub fn to_file(&self) -> PolicyFile {
        PolicyFile {
            allow_domains: self.allow_domains.iter().cloned().collect(),
            allow_paths: self.allow_paths.iter().cloned().collect(),
            allow_capabilities: self.allow_capabilities.iter().cloned().collect(),
            allow_loopback: self.allow_loopback,
            mcp: crate::file::McpSection {
                default: self.mcp_default.as_str().to_string(),
                rules: self
                    .mcp_rules
                    .iter()
                    .map(|r| crate::file::McpRuleFile {
                        agent: r.agent.clone(),
                        server: r.server.clone(),
                        tools: r.tools.clone(),
                    })
                    .collect(),
            },
        }
    }

    /// Copy of this snapshot with one more capability granted.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::UnknownCapability`] for names outside the
    /// closed vocabulary.
    pub fn with_capability(&self, name: &str) -> PolicyResult<Self> {
        let normalized = normalize_capability(name);
        if !is_known_capability(&normalized) {
            return Err(PolicyError::UnknownCapability {
                name: name.to_string(),
            });
        }
        let mut capabilities = self.allow_capabilities.clone();
        capabilities.insert(normalized);
        Ok(Self::build(
            self.allow_domains.clone(),
            self.allow_paths.clone(),
            capabilities,
            self.allow_loopback,
            self.mcp_default,
            self.mcp_rules.clone(),
        ))
    }

    /// Copy of this snapshot with one more allowed domain.
    #[must_use]
    pub fn with_domain(&self, name: &str) -> Self {
        let mut domains = self.allow_domains.clone();
        domains.insert(name.trim().to_ascii_lowercase());
        Self::build(
            domains,
            self.allow_paths.clone(),
            self.allow_capabilities.clone(),
            self.allow_loopback,
            self.mcp_default,
            self.mcp_rules.clone(),
        )
    }
}

/// Whether an IP address is loopback, private, link-local, or
/// unspecified - the classes that never reach the domain allowlist.
fn ip_is_special(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
        },
        IpAddr::V6(v6) => {
            let segments = v6.segments();
            let unique_local = (segments[0] & 0xfe00) == 0xfc00;
            let link_local = (segments[0] & 0xffc0) == 0xfe80;
            v6.is_loopback() || v6.is_unspecified() || unique_local || link_local
        },
    }
}

/// Resolve a path for comparison: symlinks followed where the file
/// exists, parent-resolved where only the leaf is missing, and `..`/`.`
/// components folded lexically otherwise.
fn resolve_path(path: &Path) -> PathBuf {
    if let Ok(resolved) = std::fs::canonicalize(path) {
        return resolved;
    }
    if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
        if let Ok(resolved) = std::fs::canonicalize(parent) {
            return resolved.join(name);
        }
    }

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    lexical_normalize(&absolute)
}

/// Fold `.` and `..` components without touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {},
            Component::ParentDir => {
                out.pop();
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// FNV-1a 64-bit hash.
fn fnv1a_64(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET_BASIS;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}
