//! Order-independent content hashing.
//!
//! [`stable_hash`] maps structurally equal JSON values to the same short hex
//! string regardless of object key order. It is a djb2 rolling hash over a
//! canonical rendering of the value: cheap and reproducible, not
//! collision-resistant. Use it for deriving ids and detecting unchanged
//! values, never for anything security related.

use std::fmt::Write;

use serde_json::Value;

/// Canonical string rendering of a JSON value.
///
/// Primitives render as their JSON literal, arrays keep element order, and
/// objects list `key:value` pairs sorted by key.
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}:", Value::String(key.clone()));
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        primitive => {
            let _ = write!(out, "{primitive}");
        }
    }
}

/// djb2 over the bytes of `s`.
fn djb2_hash(s: &str) -> u32 {
    let mut hash: u32 = 5381;
    for byte in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(u32::from(byte));
    }
    hash
}

/// Deterministic 8-character lowercase hex hash of a JSON value.
pub fn stable_hash(value: &Value) -> String {
    format!("{:08x}", djb2_hash(&canonicalize(value)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
