//! Warden Policy - the authoritative decision point for agent actions.
//!
//! This crate provides:
//! - [`PolicySnapshot`], an immutable, wholesale-replaced view of the
//!   active policy: allowed capabilities, domains, filesystem roots,
//!   loopback access, and per-agent MCP tool rules
//! - [`PolicyEngine`], the live single-writer / many-reader holder of
//!   the current snapshot, with file reload and persisted mutations
//! - Stable policy versioning (FNV-1a 64 over canonicalized fields)
//!
//! # Decision model
//!
//! All decision operations return a `bool` and never fail; errors only
//! occur at load time. Every decision, positive or negative, is
//! recorded in the shared audit log with the version of the snapshot
//! that decided it.
//!
//! # Fail-closed reload
//!
//! A reload that fails parsing or validation (e.g. a capability name
//! outside the closed vocabulary) leaves the previous snapshot active.
//! A missing policy file loads as the default-deny policy.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod engine;
mod error;
mod file;
mod snapshot;

pub use engine::PolicyEngine;
pub use error::{PolicyError, PolicyResult};
pub use file::{McpRuleFile, McpSection, PolicyFile};
pub use snapshot::{McpDefault, McpRule, PolicySnapshot};
