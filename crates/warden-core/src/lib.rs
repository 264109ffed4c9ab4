//! Warden Core - shared identifiers and ambient call context.
//!
//! This crate provides:
//! - Typed identifiers for agents, sessions, tasks, and delegations
//! - The closed capability vocabulary consulted by the policy engine
//! - [`CallContext`], the ambient per-call state threaded through every
//!   tool execution (agent identity, task linkage, delegation depth,
//!   cancellation)
//! - Deterministic JSON canonicalization for dedup keys

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod capability;
pub mod context;
pub mod ids;
pub mod json;
pub mod prelude;

pub use capability::{is_known_capability, normalize_capability, CAPABILITY_VOCABULARY};
pub use context::CallContext;
pub use ids::{AgentId, DelegationId, SessionId, TaskId};
pub use json::canonical_json;
