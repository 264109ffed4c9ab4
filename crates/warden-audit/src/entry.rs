//! Audit entry types.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a gated decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// The operation was permitted.
    Allow,
    /// The operation was refused.
    Deny,
    /// A skill module was quarantined.
    Quarantine,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::Deny => write!(f, "deny"),
            Self::Quarantine => write!(f, "quarantine"),
        }
    }
}

/// One line of the audit log.
///
/// `reason` and `subject` are stored post-redaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// RFC3339 timestamp with nanosecond precision, UTC.
    pub timestamp: String,
    /// The decision taken.
    pub decision: Decision,
    /// The capability (or pseudo-capability) that was consulted.
    pub capability: String,
    /// Human-readable reason for the decision.
    pub reason: String,
    /// Version hash of the policy snapshot that decided.
    pub policy_version: u64,
    /// Who or what the decision applied to (agent, URL, path, module).
    pub subject: String,
}

impl AuditEntry {
    /// Build an entry stamped with the current time.
    #[must_use]
    pub fn now(
        decision: Decision,
        capability: impl Into<String>,
        reason: impl Into<String>,
        policy_version: u64,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
            decision,
            capability: capability.into(),
            reason: reason.into(),
            policy_version,
            subject: subject.into(),
        }
    }
}
