//! Canonical JSON content hashing.
//!
//! Events are deduplicated by a SHA-256 digest over their canonical JSON
//! form: object keys sorted, UTF-8, no insignificant whitespace, and the
//! volatile fields (`id`, `lifecycle`, `consolidated_at`) excluded so the
//! same observation hashes identically regardless of when it was recorded.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Fields excluded from the canonical form before hashing.
const VOLATILE_FIELDS: [&str; 3] = ["id", "lifecycle", "consolidated_at"];

/// Compute the content hash of a JSON value.
///
/// Returns a lowercase hex string of the 32-byte SHA-256 digest.
#[must_use]
pub fn content_hash(value: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(value, true, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    to_hex(&hasher.finalize())
}

/// Compute the content hash of raw text content plus structured context.
///
/// This is the form used for [`EpisodicEvent`](crate::episodic::EpisodicEvent)
/// dedup: the event is projected onto its identity-bearing fields only.
#[must_use]
pub fn event_content_hash(
    event_type: &str,
    content: &str,
    structured_context: &serde_json::Map<String, Value>,
) -> String {
    let value = serde_json::json!({
        "event_type": event_type,
        "content": content,
        "structured_context": structured_context,
    });
    content_hash(&value)
}

fn write_canonical(value: &Value, top_level: bool, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            let mut first = true;
            for key in keys {
                if top_level && VOLATILE_FIELDS.contains(&key.as_str()) {
                    continue;
                }
                if !first {
                    out.push(',');
                }
                first = false;
                // serde_json escapes the key the same way for every key order
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                write_canonical(&map[key], false, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, false, out);
            }
            out.push(']');
        }
        other => {
            out.push_str(&serde_json::to_string(other).unwrap_or_default());
        }
    }
}

/// Derive a stable UUID from seed text.
///
/// Used where repeated runs must mint the same id for the same content
/// (consolidation promotion); the digest's first 16 bytes are stamped with
/// v4 version/variant bits so the id is indistinguishable from random ones.
#[must_use]
pub fn deterministic_uuid(seed: &str) -> uuid::Uuid {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    uuid::Uuid::from_bytes(bytes)
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_does_not_change_hash() {
        let a = json!({"b": 1, "a": {"y": 2, "x": 3}});
        let b = json!({"a": {"x": 3, "y": 2}, "b": 1});
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn test_volatile_fields_excluded() {
        let a = json!({"content": "login failed", "id": "one", "lifecycle": "active"});
        let b = json!({"content": "login failed", "id": "two", "consolidated_at": 99});
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn test_volatile_fields_only_excluded_at_top_level() {
        let a = json!({"ctx": {"id": "one"}});
        let b = json!({"ctx": {"id": "two"}});
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn test_different_content_different_hash() {
        let a = json!({"content": "login failed"});
        let b = json!({"content": "login succeeded"});
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn test_hash_is_64_hex_chars() {
        let digest = content_hash(&json!({"content": "x"}));
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_event_content_hash_stable() {
        let mut ctx = serde_json::Map::new();
        ctx.insert("file".to_string(), json!("auth.rs"));
        let first = event_content_hash("tool_execution", "ran tests", &ctx);
        let second = event_content_hash("tool_execution", "ran tests", &ctx);
        assert_eq!(first, second);
    }

    #[test]
    fn test_deterministic_uuid_stable() {
        let a = deterministic_uuid("proj:db connection error");
        let b = deterministic_uuid("proj:db connection error");
        let c = deterministic_uuid("proj:something else");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.get_version_num(), 4);
    }

    #[test]
    fn test_array_order_matters() {
        let a = json!({"steps": [1, 2]});
        let b = json!({"steps": [2, 1]});
        assert_ne!(content_hash(&a), content_hash(&b));
    }
}
