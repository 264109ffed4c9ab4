//! The audit sink: single owner of the audit log file.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::error;

use crate::entry::{AuditEntry, Decision};
use crate::error::{AuditError, AuditResult};
use crate::redact::Redactor;

/// Append-only audit log.
///
/// The file is opened exactly once, in create-or-append mode. All
/// writes happen under a single mutex, so entries are totally ordered
/// and the file size is strictly non-decreasing. Recording is
/// non-failing by contract: I/O errors are logged and dropped.
///
/// An optional mirror channel forwards every entry to a database
/// writer (see `warden-store`); a full or closed channel is ignored.
pub struct AuditSink {
    file: Mutex<Option<File>>,
    path: PathBuf,
    deny_count: AtomicU64,
    redactor: Redactor,
    mirror: Option<mpsc::UnboundedSender<AuditEntry>>,
}

impl AuditSink {
    /// Open (or create) the audit log at `path` in append mode.
    ///
    /// Parent directories are created as needed.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Open`] or [`AuditError::CreateDir`] if the
    /// file or its directory cannot be created.
    pub fn open(path: impl AsRef<Path>) -> AuditResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| AuditError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| AuditError::Open {
                path: path.display().to_string(),
                source,
            })?;

        Ok(Self {
            file: Mutex::new(Some(file)),
            path,
            deny_count: AtomicU64::new(0),
            redactor: Redactor::new(),
            mirror: None,
        })
    }

    /// The conventional audit log location: `<home>/logs/audit.jsonl`.
    ///
    /// Falls back to a relative `logs/audit.jsonl` when the home
    /// directory cannot be resolved.
    #[must_use]
    pub fn default_path() -> PathBuf {
        directories::UserDirs::new()
            .map(|dirs| dirs.home_dir().join("logs").join("audit.jsonl"))
            .unwrap_or_else(|| PathBuf::from("logs/audit.jsonl"))
    }

    /// Attach a mirror channel; every recorded entry is also sent here.
    #[must_use]
    pub fn with_mirror(mut self, mirror: mpsc::UnboundedSender<AuditEntry>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Record a decision.
    ///
    /// Never fails. Deny decisions bump the process-wide deny counter;
    /// `reason` and `subject` are redacted before serialization.
    pub fn record(
        &self,
        decision: Decision,
        capability: &str,
        reason: &str,
        policy_version: u64,
        subject: &str,
    ) {
        if decision == Decision::Deny {
            self.deny_count.fetch_add(1, Ordering::Relaxed);
        }

        let entry = AuditEntry::now(
            decision,
            capability,
            self.redactor.redact(reason),
            policy_version,
            self.redactor.redact(subject),
        );

        let line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, "Failed to serialize audit entry");
                return;
            },
        };

        {
            // Lock poisoning only happens if a writer panicked mid-append;
            // keep recording with the inner file regardless.
            let mut guard = match self.file.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(file) = guard.as_mut() {
                if let Err(e) = writeln!(file, "{line}") {
                    error!(error = %e, path = %self.path.display(), "Audit write failed");
                }
            } else {
                error!("Audit entry dropped: sink already closed");
            }
        }

        if let Some(mirror) = &self.mirror {
            let _ = mirror.send(entry);
        }
    }

    /// Total number of `deny` decisions recorded by this sink.
    #[must_use]
    pub fn deny_count(&self) -> u64 {
        self.deny_count.load(Ordering::Relaxed)
    }

    /// Path of the underlying log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and drop the file handle. Idempotent.
    pub fn close(&self) {
        let mut guard = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(mut file) = guard.take() {
            if let Err(e) = file.flush() {
                error!(error = %e, "Audit flush on close failed");
            }
        }
    }
}

impl std::fmt::Debug for AuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditSink")
            .field("path", &self.path)
            .field("deny_count", &self.deny_count.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_sink(dir: &tempfile::TempDir) -> AuditSink {
        AuditSink::open(dir.path().join("logs/audit.jsonl")).unwrap()
    }

    #[test]
    fn test_append_only_and_parseable() {
        let dir = tempfile::tempdir().unwrap();
        let sink = open_sink(&dir);

        let mut last_size = 0;
        for i in 0..3 {
            sink.record(Decision::Allow, "acp.read", &format!("round {i}"), 9, "a");
            let size = std::fs::metadata(sink.path()).unwrap().len();
            assert!(size > last_size, "file must grow on every record");
            last_size = size;
        }

        let content = std::fs::read_to_string(sink.path()).unwrap();
        for line in content.lines() {
            let entry: AuditEntry = serde_json::from_str(line).unwrap();
            assert_eq!(entry.policy_version, 9);
        }
    }

    #[test]
    fn test_deny_counter() {
        let dir = tempfile::tempdir().unwrap();
        let sink = open_sink(&dir);

        sink.record(Decision::Allow, "c", "ok", 0, "s");
        assert_eq!(sink.deny_count(), 0);
        sink.record(Decision::Deny, "c", "no", 0, "s");
        sink.record(Decision::Deny, "c", "no", 0, "s");
        assert_eq!(sink.deny_count(), 2);
    }

    #[test]
    fn test_reason_and_subject_redacted() {
        let dir = tempfile::tempdir().unwrap();
        let sink = open_sink(&dir);

        sink.record(
            Decision::Deny,
            "tools.read_url",
            "denied Bearer abc123token",
            1,
            "api_key=verysecret123",
        );

        let content = std::fs::read_to_string(sink.path()).unwrap();
        assert!(!content.contains("abc123token"));
        assert!(!content.contains("verysecret123"));
        assert!(content.contains("Bearer [REDACTED]"));
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let sink = open_sink(&dir);
        sink.record(Decision::Allow, "c", "r", 0, "s");
        sink.close();
        sink.close();

        // Records after close are dropped, not appended.
        let size = std::fs::metadata(sink.path()).unwrap().len();
        sink.record(Decision::Allow, "c", "r", 0, "s");
        assert_eq!(std::fs::metadata(sink.path()).unwrap().len(), size);
    }

    #[test]
    fn test_mirror_receives_entries() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = open_sink(&dir).with_mirror(tx);

        sink.record(Decision::Quarantine, "wasm", "faults", 3, "random");
        let entry = rx.try_recv().unwrap();
        assert_eq!(entry.decision, Decision::Quarantine);
        assert_eq!(entry.subject, "random");
    }

    #[test]
    fn test_reopen_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let sink = AuditSink::open(&path).unwrap();
        sink.record(Decision::Allow, "c", "r", 0, "s");
        sink.close();
        let first = std::fs::metadata(&path).unwrap().len();

        let sink = AuditSink::open(&path).unwrap();
        sink.record(Decision::Allow, "c", "r", 0, "s");
        assert!(std::fs::metadata(&path).unwrap().len() > first);
    }
}
