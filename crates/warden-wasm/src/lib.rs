//! Warden WASM - the sandboxed skill host.
//!
//! Untrusted extension code runs as WASM guest modules under:
//! - a per-module linear memory cap and an **aggregate** memory budget
//!   across all loaded modules (in 64 KiB pages)
//! - a per-invocation wall-clock timeout independent of the caller's
//!   deadline (the narrower of the two applies)
//! - persistent fault accounting with auto-quarantine once a module
//!   crosses the fault threshold
//!
//! Guests reach the outside world only through policy-gated host
//! functions (`host_http_get`, `host_kv_get`, `host_kv_set`,
//! `host_log`).
//!
//! [`SkillWatcher`] rebuilds modules when their sources change, with a
//! staged compile-then-atomic-swap so a broken rebuild never replaces
//! a working module.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod host;
mod hostfns;
mod memory;
mod watcher;

pub use error::{FaultReason, SkillFault, WasmError, WasmResult};
pub use host::{SkillHost, WasmHostConfig};
pub use memory::estimate_memory_pages;
pub use watcher::{SkillWatcher, WatchNotification, WatcherConfig, DEFAULT_DEBOUNCE};
