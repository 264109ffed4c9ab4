//! Host functions exposed to skill guests.
//!
//! Four functions are registered with every plugin instance:
//!
//! | Function | Gate | Async bridge |
//! |----------|------|--------------|
//! | `host_http_get` | `wasm.http.get` + URL policy | yes |
//! | `host_kv_get`   | none (read-only)             | yes |
//! | `host_kv_set`   | `wasm.kv.set`                | yes |
//! | `host_log`      | none                         | no  |
//!
//! All host functions share a [`HostState`] via `UserData`. Async
//! operations are bridged with `Handle::block_on()`, which requires
//! the multi-threaded tokio runtime.

use std::sync::Arc;

use extism::{CurrentPlugin, Error, UserData, Val, PTR};
use serde_json::json;
use tracing::{debug, error, info, warn};

use warden_policy::PolicyEngine;
use warden_store::Store;

/// Maximum URL length accepted from a guest.
const MAX_URL_LEN: usize = 8 * 1024;
/// Maximum KV key length accepted from a guest.
const MAX_KEY_LEN: usize = 1024;
/// Maximum KV value / guest payload size (1 MiB).
const MAX_GUEST_PAYLOAD_LEN: usize = 1_048_576;
/// HTTP response body cap (1 MiB).
const MAX_RESPONSE_BYTES: usize = 1_048_576;
/// Bodies beyond this size are spilled to the KV store instead of
/// being returned inline in the result envelope.
const INLINE_MAX_BYTES: usize = 256 * 1024;

/// Shared state for host function calls.
pub(crate) struct HostState {
    /// Name of the guest module (used for KV namespacing and logs).
    pub module: String,
    /// Persistence handle for the guest KV namespace.
    pub store: Store,
    /// Policy engine for capability and URL gates.
    pub policy: Arc<PolicyEngine>,
    /// Runtime handle for bridging async operations.
    pub handle: tokio::runtime::Handle,
}

/// Register all host functions on a plugin builder.
pub(crate) fn register_host_functions(
    builder: extism::PluginBuilder,
    user_data: UserData<HostState>,
) -> extism::PluginBuilder {
    builder
        .with_function("host_http_get", [PTR], [PTR], user_data.clone(), host_http_get_impl)
        .with_function("host_kv_get", [PTR], [PTR], user_data.clone(), host_kv_get_impl)
        .with_function("host_kv_set", [PTR, PTR], [PTR], user_data.clone(), host_kv_set_impl)
        .with_function("host_log", [PTR, PTR], [], user_data, host_log_impl)
}

/// Read a guest string with a size cap.
fn get_capped_string(
    plugin: &mut CurrentPlugin,
    input: &Val,
    max_len: usize,
    what: &str,
) -> Result<String, Error> {
    let value: String = plugin.memory_get_val(input)?;
    if value.len() > max_len {
        return Err(Error::msg(format!(
            "{what} too long: {} bytes (max {max_len})",
            value.len()
        )));
    }
    Ok(value)
}

fn state_snapshot(
    user_data: &UserData<HostState>,
) -> Result<(String, Store, Arc<PolicyEngine>, tokio::runtime::Handle), Error> {
    let ud = user_data.get()?;
    let state = ud
        .lock()
        .map_err(|e| Error::msg(format!("host state lock poisoned: {e}")))?;
    Ok((
        state.module.clone(),
        state.store.clone(),
        Arc::clone(&state.policy),
        state.handle.clone(),
    ))
}

// ---------------------------------------------------------------------------
// host_http_get(url) -> result envelope
// ---------------------------------------------------------------------------

static HTTP_CLIENT: std::sync::LazyLock<reqwest::Client> = std::sync::LazyLock::new(|| {
    // Redirects are followed manually so every hop passes the policy's
    // redirect re-check.
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("failed to build guest HTTP client")
});

/// Maximum redirect hops the host will follow for a guest.
const MAX_REDIRECTS: usize = 5;

async fn fetch_checked(
    policy: &PolicyEngine,
    url: &str,
) -> Result<(u16, Vec<u8>), String> {
    let mut current = url.to_string();
    for _ in 0..=MAX_REDIRECTS {
        let response = HTTP_CLIENT
            .get(&current)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();

        if status.is_redirection() {
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| format!("redirect without location from {current}"))?;
            let next = response
                .url()
                .join(location)
                .map_err(|e| format!("bad redirect target: {e}"))?
                .to_string();
            if !policy.allow_redirect_url(&next) {
                return Err(format!("policy denied redirect URL {next:?}"));
            }
            current = next;
            continue;
        }

        let body = response.bytes().await.map_err(|e| e.to_string())?;
        return Ok((status.as_u16(), body.to_vec()));
    }
    Err(format!("too many redirects from {url}"))
}

/// Tagged result envelope for `host_http_get`.
///
/// Small bodies come back inline; large bodies are spilled to the
/// module's KV namespace under `http_response:<url>:<unix_nanos>` and
/// the envelope carries the key and length.
fn inline_envelope(status: u16, body: &str) -> String {
    json!({"kind": "inline", "status": status, "body": body}).to_string()
}

fn kv_envelope(status: u16, key: &str, len: usize) -> String {
    json!({"kind": "kv", "status": status, "key": key, "len": len}).to_string()
}

fn spill_key(url: &str) -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("http_response:{url}:{nanos}")
}

#[allow(clippy::needless_pass_by_value)] // Signature required by the Extism callback API
fn host_http_get_impl(
    plugin: &mut CurrentPlugin,
    inputs: &[Val],
    outputs: &mut [Val],
    user_data: UserData<HostState>,
) -> Result<(), Error> {
    let url = get_capped_string(plugin, &inputs[0], MAX_URL_LEN, "url")?;
    let (module, store, policy, handle) = state_snapshot(&user_data)?;

    if !policy.allow_capability("wasm.http.get") {
        return Err(Error::msg("policy denied capability \"wasm.http.get\""));
    }
    if !policy.allow_http_url(&url) {
        return Err(Error::msg(format!("policy denied URL {url:?}")));
    }

    let fetched = handle.block_on(async { fetch_checked(&policy, &url).await });

    let (status, mut body) =
        fetched.map_err(|e| Error::msg(format!("http get failed: {e}")))?;
    if body.len() > MAX_RESPONSE_BYTES {
        debug!(module = %module, url = %url, len = body.len(), "Truncating oversized response");
        body.truncate(MAX_RESPONSE_BYTES);
    }

    let envelope = if body.len() <= INLINE_MAX_BYTES {
        inline_envelope(status, &String::from_utf8_lossy(&body))
    } else {
        let key = spill_key(&url);
        let namespace = format!("skill:{module}");
        let len = body.len();
        handle
            .block_on(async { store.kv_set(&namespace, &key, &body).await })
            .map_err(|e| Error::msg(format!("kv spill failed: {e}")))?;
        kv_envelope(status, &key, len)
    };

    let mem = plugin.memory_new(&envelope)?;
    outputs[0] = plugin.memory_to_val(mem);
    Ok(())
}

// ---------------------------------------------------------------------------
// host_kv_get(key) -> value ("" when absent)
// ---------------------------------------------------------------------------

#[allow(clippy::needless_pass_by_value)]
fn host_kv_get_impl(
    plugin: &mut CurrentPlugin,
    inputs: &[Val],
    outputs: &mut [Val],
    user_data: UserData<HostState>,
) -> Result<(), Error> {
    let key = get_capped_string(plugin, &inputs[0], MAX_KEY_LEN, "key")?;
    let (module, store, _policy, handle) = state_snapshot(&user_data)?;
    let namespace = format!("skill:{module}");

    let value = handle
        .block_on(async { store.kv_get(&namespace, &key).await })
        .map_err(|e| Error::msg(format!("kv_get failed: {e}")))?;

    let rendered = match value {
        Some(bytes) if bytes.len() > MAX_GUEST_PAYLOAD_LEN => {
            return Err(Error::msg("KV value exceeds the guest payload limit"));
        },
        Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        None => String::new(),
    };

    let mem = plugin.memory_new(&rendered)?;
    outputs[0] = plugin.memory_to_val(mem);
    Ok(())
}

// ---------------------------------------------------------------------------
// host_kv_set(key, value) -> "1" | "0"
// ---------------------------------------------------------------------------

#[allow(clippy::needless_pass_by_value)]
fn host_kv_set_impl(
    plugin: &mut CurrentPlugin,
    inputs: &[Val],
    outputs: &mut [Val],
    user_data: UserData<HostState>,
) -> Result<(), Error> {
    let key = get_capped_string(plugin, &inputs[0], MAX_KEY_LEN, "key")?;
    let value = get_capped_string(plugin, &inputs[1], MAX_GUEST_PAYLOAD_LEN, "value")?;
    let (module, store, policy, handle) = state_snapshot(&user_data)?;

    // The deny is audited by the policy engine; the guest just sees "0".
    let result = if policy.allow_capability("wasm.kv.set") {
        let namespace = format!("skill:{module}");
        match handle.block_on(async { store.kv_set(&namespace, &key, value.as_bytes()).await }) {
            Ok(()) => "1",
            Err(e) => {
                error!(module = %module, error = %e, "Guest kv_set failed");
                "0"
            },
        }
    } else {
        "0"
    };

    let mem = plugin.memory_new(result)?;
    outputs[0] = plugin.memory_to_val(mem);
    Ok(())
}

// ---------------------------------------------------------------------------
// host_log(level, message)
// ---------------------------------------------------------------------------

fn log_with_level(module: &str, level: &str, message: &str) {
    match level {
        "error" => error!(skill = %module, "{message}"),
        "warn" => warn!(skill = %module, "{message}"),
        "debug" => debug!(skill = %module, "{message}"),
        _ => info!(skill = %module, "{message}"),
    }
}

#[allow(clippy::needless_pass_by_value)]
fn host_log_impl(
    plugin: &mut CurrentPlugin,
    inputs: &[Val],
    _outputs: &mut [Val],
    user_data: UserData<HostState>,
) -> Result<(), Error> {
    let level = get_capped_string(plugin, &inputs[0], 16, "level")?;
    let message = get_capped_string(plugin, &inputs[1], MAX_GUEST_PAYLOAD_LEN, "message")?;

    let ud = user_data.get()?;
    let state = ud
        .lock()
        .map_err(|e| Error::msg(format!("host state lock poisoned: {e}")))?;
    log_with_level(&state.module, level.trim(), &message);
    Ok(())
}
