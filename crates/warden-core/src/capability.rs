//! The closed capability vocabulary.
//!
//! Every side-effecting operation in the runtime is gated on a named
//! capability. The vocabulary is closed: a policy file that grants a
//! capability outside this list fails to load, which catches typos at
//! configuration time instead of silently never matching.

/// All capability names the policy engine will accept.
///
/// This is the single source of truth; the policy validator consults it
/// on every load.
pub const CAPABILITY_VOCABULARY: &[&str] = &[
    "acp.read",
    "acp.mutate",
    "tools.web_search",
    "tools.read_url",
    "tools.read_file",
    "tools.write_file",
    "tools.exec",
    "tools.spawn_task",
    "tools.delegate_task",
    "tools.delegate_task_async",
    "tools.send_message",
    "tools.read_messages",
    "tools.memory_read",
    "tools.memory_write",
    "tools.send_alert",
    "wasm.http.get",
    "wasm.kv.set",
    "legacy.run",
    "legacy.dangerous",
    "skill.inject",
    "tools.mcp",
    "agent.create",
    "agent.remove",
    "tools.price_comparison",
];

/// Normalize a capability name: trim whitespace, ASCII-lowercase.
///
/// The same normalization is applied at load time (validation) and at
/// decision time (lookup), so the two can never disagree.
#[must_use]
pub fn normalize_capability(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

/// Whether a (normalized) capability name is part of the closed vocabulary.
#[must_use]
pub fn is_known_capability(name: &str) -> bool {
    let normalized = normalize_capability(name);
    CAPABILITY_VOCABULARY.contains(&normalized.as_str())
}
