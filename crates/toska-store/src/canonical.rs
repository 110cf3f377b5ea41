//! Canonical JSON and SHA-256 checksums.
//!
//! Checksums are computed over a canonical form so that they stay stable
//! across encoders and languages: maps become sorted `[key, value]` pair
//! arrays, arrays keep their order, scalars pass through. The SHA-256 of the
//! compact encoding of that form, as lowercase hex, is the checksum.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Rewrite a JSON value into its canonical form.
///
/// Maps are replaced by an array of `[key, canonical(value)]` pairs sorted by
/// key (lexicographic ascending), recursively. Array element order is
/// preserved.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let pairs: Vec<Value> = keys
                .into_iter()
                .map(|k| Value::Array(vec![Value::String(k.clone()), canonicalize(&map[k])]))
                .collect();
            Value::Array(pairs)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        scalar => scalar.clone(),
    }
}

/// Compact encoding of the canonical form.
pub fn canonical_bytes(value: &Value) -> Vec<u8> {
    // Compact serialization of the canonical form is deterministic: the only
    // unordered container (the map) has already been rewritten.
    serde_json::to_vec(&canonicalize(value)).expect("canonical form always serializes")
}

/// SHA-256 of the canonical encoding, as lowercase hex.
pub fn checksum_hex(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_bytes(value));
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Verify that `expected` matches the checksum of `value`.
pub fn verify_checksum(value: &Value, expected: &str) -> bool {
    checksum_hex(value) == expected
}
