//! The live policy engine: snapshot holder, reload, and mutations.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use warden_audit::{AuditSink, Decision};

use crate::error::{PolicyError, PolicyResult};
use crate::file::PolicyFile;
use crate::snapshot::PolicySnapshot;

/// Pseudo-capability stamped on URL decision audit records.
const CAP_HTTP_URL: &str = "http.url";
/// Pseudo-capability stamped on redirect re-check audit records.
const CAP_HTTP_REDIRECT: &str = "http.redirect";
/// Pseudo-capability stamped on path decision audit records.
const CAP_FS_PATH: &str = "fs.path";
/// Pseudo-capability stamped on MCP tool decision audit records.
const CAP_MCP_TOOL: &str = "mcp.tool";

/// Single-writer, many-reader holder of the active [`PolicySnapshot`].
///
/// Decisions take a read lock for the duration of one lookup; reload
/// and mutations take the write lock only across the snapshot swap
/// (and, for mutations, the persistence write, so the on-disk file
/// never lags a successful mutation).
///
/// Every decision is recorded in the shared audit sink, allow and deny
/// alike.
pub struct PolicyEngine {
    snapshot: RwLock<Arc<PolicySnapshot>>,
    path: PathBuf,
    audit: Arc<AuditSink>,
}

impl PolicyEngine {
    /// Load the policy from `path`.
    ///
    /// A missing file yields the default-deny policy; a present but
    /// invalid file is a hard error (this is initial load, there is no
    /// prior snapshot to fall back to).
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed,
    /// or validated.
    pub fn load(path: impl Into<PathBuf>, audit: Arc<AuditSink>) -> PolicyResult<Self> {
        let path = path.into();
        let snapshot = if path.exists() {
            Arc::new(read_snapshot(&path)?)
        } else {
            info!(path = %path.display(), "Policy file missing, starting default-deny");
            Arc::new(PolicySnapshot::default_deny())
        };

        Ok(Self {
            snapshot: RwLock::new(snapshot),
            path,
            audit,
        })
    }

    /// Build an engine around an existing snapshot (tests, embedders).
    #[must_use]
    pub fn with_snapshot(
        snapshot: PolicySnapshot,
        path: impl Into<PathBuf>,
        audit: Arc<AuditSink>,
    ) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
            path: path.into(),
            audit,
        }
    }

    /// The current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        Arc::clone(&self.read_guard())
    }

    /// Version hash of the current snapshot.
    #[must_use]
    pub fn policy_version(&self) -> u64 {
        self.read_guard().version()
    }

    /// Whether `name` is a granted capability. Audited.
    #[must_use]
    pub fn allow_capability(&self, name: &str) -> bool {
        let snapshot = self.snapshot();
        let allowed = snapshot.allow_capability(name);
        self.audit(
            allowed,
            name,
            if allowed {
                "capability granted"
            } else {
                "capability not granted"
            },
            snapshot.version(),
            name,
        );
        allowed
    }

    /// Whether an outbound HTTP(S) URL is permitted. Audited.
    #[must_use]
    pub fn allow_http_url(&self, raw: &str) -> bool {
        self.check_url(raw, CAP_HTTP_URL)
    }

    /// Re-check a redirect target. Audited under its own pseudo-capability
    /// so redirect-following is visible in the trail.
    #[must_use]
    pub fn allow_redirect_url(&self, raw: &str) -> bool {
        self.check_url(raw, CAP_HTTP_REDIRECT)
    }

    fn check_url(&self, raw: &str, capability: &str) -> bool {
        let snapshot = self.snapshot();
        let allowed = snapshot.allow_http_url(raw);
        self.audit(
            allowed,
            capability,
            if allowed {
                "URL host allowed"
            } else {
                "URL not allowed"
            },
            snapshot.version(),
            raw,
        );
        allowed
    }

    /// Whether a filesystem path is permitted. Audited.
    #[must_use]
    pub fn allow_path(&self, path: &Path) -> bool {
        let snapshot = self.snapshot();
        let allowed = snapshot.allow_path(path);
        self.audit(
            allowed,
            CAP_FS_PATH,
            if allowed {
                "path within allowed roots"
            } else {
                "path outside allowed roots"
            },
            snapshot.version(),
            &path.display().to_string(),
        );
        allowed
    }

    /// Whether `agent` may call `tool` on MCP server `server`. Audited.
    #[must_use]
    pub fn allow_mcp_tool(&self, agent: &str, server: &str, tool: &str) -> bool {
        let snapshot = self.snapshot();
        let allowed = snapshot.allow_mcp_tool(agent, server, tool);
        self.audit(
            allowed,
            CAP_MCP_TOOL,
            if allowed {
                "MCP rule permits tool"
            } else {
                "MCP rule denies tool"
            },
            snapshot.version(),
            &format!("{agent}/{server}/{tool}"),
        );
        allowed
    }

    /// Reload the policy from its file.
    ///
    /// On any failure (read, parse, validation) the previous snapshot
    /// stays active and the error is returned.
    ///
    /// # Errors
    ///
    /// Returns the load error; the active policy is unchanged.
    pub fn reload_from_file(&self) -> PolicyResult<()> {
        let snapshot = match read_snapshot(&self.path) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Policy reload failed, previous snapshot stays active"
                );
                return Err(e);
            },
        };
        self.swap(Arc::new(snapshot));
        info!(version = self.policy_version(), "Policy reloaded");
        Ok(())
    }

    /// Grant a capability, persist, and swap.
    ///
    /// The file write happens under the writer lock so the on-disk
    /// policy never lags a successful mutation.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown capability names or persistence
    /// failures; the active policy is unchanged on error.
    pub fn add_capability(&self, name: &str) -> PolicyResult<()> {
        let mut guard = self.write_guard();
        let updated = guard.with_capability(name)?;
        if updated.version() == guard.version() {
            return Ok(()); // Already granted.
        }
        persist(&self.path, &updated)?;
        *guard = Arc::new(updated);
        Ok(())
    }

    /// Allow a domain, persist, and swap.
    ///
    /// # Errors
    ///
    /// Returns an error if the updated policy cannot be persisted; the
    /// active policy is unchanged on error.
    pub fn add_domain(&self, name: &str) -> PolicyResult<()> {
        let mut guard = self.write_guard();
        let updated = guard.with_domain(name);
        if updated.version() == guard.version() {
            return Ok(()); // Already allowed.
        }
        persist(&self.path, &updated)?;
        *guard = Arc::new(updated);
        Ok(())
    }

    /// The audit sink shared with the rest of the runtime.
    #[must_use]
    pub fn audit_sink(&self) -> &Arc<AuditSink> {
        &self.audit
    }

    /// Path of the backing policy file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn audit(&self, allowed: bool, capability: &str, reason: &str, version: u64, subject: &str) {
        let decision = if allowed {
            Decision::Allow
        } else {
            Decision::Deny
        };
        self.audit.record(decision, capability, reason, version, subject);
    }

    fn swap(&self, snapshot: Arc<PolicySnapshot>) {
        *self.write_guard() = snapshot;
    }

    fn read_guard(&self) -> std::sync::RwLockReadGuard<'_, Arc<PolicySnapshot>> {
        match self.snapshot.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_guard(&self) -> std::sync::RwLockWriteGuard<'_, Arc<PolicySnapshot>> {
        match self.snapshot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("path", &self.path)
            .field("version", &self.policy_version())
            .finish_non_exhaustive()
    }
}

fn read_snapshot(path: &Path) -> PolicyResult<PolicySnapshot> {
    let raw = std::fs::read_to_string(path).map_err(|source| PolicyError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let file: PolicyFile = serde_yaml::from_str(&raw).map_err(|source| PolicyError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    PolicySnapshot::from_file(&file)
}

fn persist(path: &Path, snapshot: &PolicySnapshot) -> PolicyResult<()> {
    let rendered = serde_yaml::to_string(&snapshot.to_file())?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| PolicyError::Persist {
            path: path.display().to_string(),
            source,
        })?;
    }
    std::fs::write(path, rendered).map_err(|source| PolicyError::Persist {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_audit(dir: &tempfile::TempDir) -> Arc<AuditSink> {
        Arc::new(AuditSink::open(dir.path().join("audit.jsonl")).unwrap())
    }

    fn engine_with(dir: &tempfile::TempDir, yaml: &str) -> PolicyEngine {
        let path = dir.path().join("policy.yaml");
        std::fs::write(&path, yaml).unwrap();
        PolicyEngine::load(path, test_audit(dir)).unwrap()
    }

    #[test]
    fn test_missing_file_is_default_deny() {
        let dir = tempfile::tempdir().unwrap();
        let engine =
            PolicyEngine::load(dir.path().join("absent.yaml"), test_audit(&dir)).unwrap();

        assert!(!engine.allow_http_url("https://example.com"));
        assert!(!engine.allow_http_url("https://html.duckduckgo.com/html/?q=test"));
        assert!(!engine.allow_capability("acp.mutate"));
    }

    #[test]
    fn test_failed_reload_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(
            &dir,
            "allow_domains: [api.weather.com]\nallow_capabilities: [acp.read]\n",
        );
        let version_before = engine.policy_version();

        std::fs::write(
            engine.path(),
            "allow_domains: [api.weather.com]\nallow_capabilities: [acp.read, acp.unknown]\n",
        )
        .unwrap();
        assert!(engine.reload_from_file().is_err());

        assert_eq!(engine.policy_version(), version_before);
        assert!(engine.allow_http_url("https://api.weather.com/x"));
        assert!(engine.allow_capability("acp.read"));
        assert!(!engine.allow_capability("acp.unknown"));
    }

    #[test]
    fn test_successful_reload_swaps() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(&dir, "allow_capabilities: [acp.read]\n");
        assert!(!engine.allow_capability("acp.mutate"));

        std::fs::write(engine.path(), "allow_capabilities: [acp.read, acp.mutate]\n").unwrap();
        engine.reload_from_file().unwrap();
        assert!(engine.allow_capability("acp.mutate"));
    }

    #[test]
    fn test_add_capability_persists_and_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(&dir, "allow_capabilities: [acp.read]\n");

        engine.add_capability("tools.exec").unwrap();
        assert!(engine.allow_capability("tools.exec"));

        // The persisted file reloads to the same grant.
        engine.reload_from_file().unwrap();
        assert!(engine.allow_capability("tools.exec"));
        assert!(engine.allow_capability("acp.read"));
    }

    #[test]
    fn test_add_capability_rejects_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(&dir, "{}\n");
        assert!(engine.add_capability("made.up").is_err());
    }

    #[test]
    fn test_add_capability_dedups() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(&dir, "allow_capabilities: [acp.read]\n");
        let version = engine.policy_version();
        engine.add_capability("ACP.READ").unwrap();
        assert_eq!(engine.policy_version(), version);
    }

    #[test]
    fn test_add_domain() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(&dir, "{}\n");
        engine.add_domain("Example.COM").unwrap();
        assert!(engine.allow_http_url("https://api.example.com/"));

        engine.reload_from_file().unwrap();
        assert!(engine.allow_http_url("https://example.com/"));
    }

    #[test]
    fn test_decisions_are_audited_with_deny_count() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(&dir, "allow_capabilities: [acp.read]\n");

        assert!(engine.allow_capability("acp.read"));
        assert!(!engine.allow_capability("acp.mutate"));
        assert!(!engine.allow_mcp_tool("a", "s", "t"));

        assert_eq!(engine.audit_sink().deny_count(), 2);

        let content = std::fs::read_to_string(engine.audit_sink().path()).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert!(content.contains("\"capability\":\"acp.read\""));
        assert!(content.contains("\"capability\":\"mcp.tool\""));
    }

    #[test]
    fn test_redirect_check_audited_separately() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(&dir, "allow_domains: [example.com]\n");

        assert!(engine.allow_redirect_url("https://example.com/next"));
        assert!(!engine.allow_redirect_url("https://other.com/"));

        let content = std::fs::read_to_string(engine.audit_sink().path()).unwrap();
        assert!(content.contains("\"capability\":\"http.redirect\""));
    }
}
