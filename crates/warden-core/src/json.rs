//! Deterministic JSON canonicalization.
//!
//! Tool-call dedup keys hash the call input, so the serialized form
//! must not depend on the field order the caller happened to produce.
//! [`canonical_json`] renders any JSON value with object keys sorted
//! recursively; two structurally equal values always canonicalize to
//! the same string.

use serde_json::Value;

/// Render a JSON value with all object keys sorted, recursively.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Keys are plain strings; serde_json escaping is infallible.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(*key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        },
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        },
        other => out.push_str(&other.to_string()),
    }
}
