//! Deterministic fingerprints for values and declarations.
//!
//! All hashes in the engine flow through this module: structural
//! hashes over variable declarations and input hashes over consumed
//! values. Values are rendered to canonical JSON (sorted object keys,
//! no insignificant whitespace) before hashing so the fingerprint is
//! stable across runs and map iteration orders.

use serde_json::Value;
use std::collections::BTreeMap;

/// Renders a JSON value in canonical form.
///
/// Object keys are sorted; array order is preserved; numbers use
/// serde_json's default rendering (NaN/Inf never appear in engine
/// values).
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => serde_json::to_string(s).unwrap_or_default(),
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", rendered.join(","))
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, String> =
                map.iter().map(|(k, v)| (k, canonical_json(v))).collect();
            let rendered: Vec<String> = sorted
                .into_iter()
                .map(|(k, v)| format!("{}:{}", serde_json::to_string(k).unwrap_or_default(), v))
                .collect();
            format!("{{{}}}", rendered.join(","))
        }
    }
}

/// Folds a sequence of byte chunks into a single `u64` fingerprint.
///
/// Chunks are length-prefixed so `["ab", "c"]` and `["a", "bc"]`
/// produce different digests.
#[must_use]
pub fn fingerprint<I, B>(parts: I) -> u64
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        let bytes = part.as_ref();
        hasher.update(&(bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    }
    digest_to_u64(&hasher.finalize())
}

/// Hashes one JSON value through its canonical rendering.
#[must_use]
pub fn hash_value(value: &Value) -> u64 {
    fingerprint([canonical_json(value)])
}

fn digest_to_u64(digest: &blake3::Hash) -> u64 {
    let bytes = digest.as_bytes();
    let mut first = [0u8; 8];
    first.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(first)
}
