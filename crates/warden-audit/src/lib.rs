//! Warden Audit - append-only decision logging with secret redaction.
//!
//! This crate provides:
//! - [`AuditSink`], the single owner of the audit log file. Every
//!   policy decision (allow, deny, quarantine) is appended as one JSONL
//!   line; the file is opened once in create-or-append mode and never
//!   truncated, so its size is monotonically non-decreasing.
//! - [`Redactor`], pattern-driven elision of secrets from the free-text
//!   fields of an entry before it reaches disk.
//!
//! The sink is injected into every component that records decisions;
//! there is no hidden global. Recording never fails: write errors are
//! logged and swallowed so an audit problem cannot take down the call
//! path it observes.
//!
//! # Example
//!
//! ```
//! use warden_audit::{AuditSink, Decision};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let sink = AuditSink::open(dir.path().join("audit.jsonl")).unwrap();
//!
//! sink.record(
//!     Decision::Deny,
//!     "tools.exec",
//!     "capability not granted",
//!     0x1234,
//!     "agent-a",
//! );
//! assert_eq!(sink.deny_count(), 1);
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod entry;
mod error;
mod redact;
mod sink;

pub use entry::{AuditEntry, Decision};
pub use error::{AuditError, AuditResult};
pub use redact::Redactor;
pub use sink::AuditSink;
