//! Integration tests for the Warden host runtime.
//!
//! The tests live in `tests/` and wire several crates together:
//! policy + audit + store + tools, and the WASM host + watcher.

#![deny(unsafe_code)]
#![deny(clippy::all)]

use std::sync::Once;

static INIT: Once = Once::new();

/// Install a test tracing subscriber once per process.
///
/// Controlled with `RUST_LOG`; quiet by default.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}
