//! Content hashing.
//!
//! Version and input identifiers are 32-hex content hashes of a canonical
//! JSON rendering: object keys sorted, compact separators, `null` fields
//! omitted. `serde_json` maps are ordered, so serializing a `Value` already
//! yields sorted keys.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Regexp matching a 32-hex content hash.
pub const HASH_REGEXP_32: &str = "^[0-9a-f]{32}$";

/// First 32 hex characters of the SHA-256 of `s`. Not for security.
pub fn hash_string(s: &str) -> String {
    let digest = Sha256::digest(s.as_bytes());
    let mut out = hex::encode(digest);
    out.truncate(32);
    out
}

/// Content hash of a JSON value after canonicalization.
pub fn hash_object<T: Serialize>(value: &T) -> String {
    let canonical = canonical_json(value);
    hash_string(&canonical)
}

/// Canonical JSON rendering: `null` values dropped from objects, keys
/// sorted (serde_json's default map ordering), compact output.
pub fn canonical_json<T: Serialize>(value: &T) -> String {
    let value = serde_json::to_value(value).unwrap_or(Value::Null);
    let stripped = strip_nulls(value);
    serde_json::to_string(&stripped).unwrap_or_default()
}

fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_nulls).collect()),
        other => other,
    }
}

/// Full SHA-256 hex digest, for security-sensitive lookups (API keys).
pub fn secure_hash(val: &str) -> String {
    hex::encode(Sha256::digest(val.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_is_stable_across_key_order() {
        let a = json!({"b": 1, "a": "x"});
        let b = json!({"a": "x", "b": 1});
        assert_eq!(hash_object(&a), hash_object(&b));
    }

    #[test]
    fn null_fields_do_not_affect_the_hash() {
        let a = json!({"a": "x", "b": null});
        let b = json!({"a": "x"});
        assert_eq!(hash_object(&a), hash_object(&b));
    }

    #[test]
    fn hash_is_32_hex() {
        let h = hash_object(&json!({"a": 1}));
        assert_eq!(h.len(), 32);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn secure_hash_is_full_sha256() {
        assert_eq!(secure_hash("").len(), 64);
    }
}
