//! hitl_common
//!
//! Canonical JSON serialization + SHA-256 hashing utilities.
//! This exists to guarantee determinism for:
//! - audit chain hashing
//! - pseudonymisation tokens used by PII redaction
//!
//! IMPORTANT: Do not "pretty print". Hashes must be computed over canonical bytes.

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length of the hex prefix used as a pseudonymisation token.
pub const TOKEN_HEX_LEN: usize = 10;

#[derive(Debug, Error)]
pub enum CanonError {
    #[error("failed to serialize json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialize to canonical JSON bytes:
/// - stable key ordering (we enforce sorting via Value roundtrip)
/// - no whitespace
/// - UTF-8
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CanonError> {
    let v = serde_json::to_value(value)?;
    let sorted = sort_json_value(v);
    Ok(serde_json::to_vec(&sorted)?)
}

/// Lowercase hex SHA-256 of canonical JSON bytes.
pub fn sha256_canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String, CanonError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(sha256_hex(&bytes))
}

/// Lowercase hex SHA-256 of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Short deterministic token for a value: the first 10 hex chars of its SHA-256.
///
/// Same input, same token, across calls and processes.
pub fn short_token(value: &str) -> String {
    let mut digest = sha256_hex(value.as_bytes());
    digest.truncate(TOKEN_HEX_LEN);
    digest
}

fn sort_json_value(v: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match v {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in entries {
                out.insert(k, sort_json_value(v));
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(sort_json_value).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Obj {
        b: u32,
        a: u32,
    }

    #[test]
    fn canonical_hash_is_stable() {
        let x = Obj { b: 2, a: 1 };
        let y = serde_json::json!({ "a": 1, "b": 2 });
        let hx = sha256_canonical_json(&x).unwrap();
        let hy = sha256_canonical_json(&y).unwrap();
        assert_eq!(hx, hy);
        assert_eq!(hx.len(), 64);
    }

    #[test]
    fn canonical_bytes_sort_nested_keys() {
        let v = serde_json::json!({ "z": { "b": 1, "a": [ { "d": 0, "c": 0 } ] }, "y": null });
        let bytes = canonical_json_bytes(&v).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"y":null,"z":{"a":[{"c":0,"d":0}],"b":1}}"#
        );
    }

    #[test]
    fn short_token_is_ten_hex_chars_and_deterministic() {
        let t1 = short_token("alice");
        let t2 = short_token("alice");
        assert_eq!(t1, t2);
        assert_eq!(t1.len(), TOKEN_HEX_LEN);
        assert!(t1.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(t1, short_token("bob"));
        // sha256("abc") = ba7816bf8f01cfea...
        assert_eq!(short_token("abc"), "ba7816bf8f");
    }
}
