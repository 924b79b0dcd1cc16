//! Deterministic content hashing for record field maps using blake3.
//!
//! Used by both backends to decide whether an update actually changes a
//! record: a write whose canonical hash equals the stored hash emits no
//! mutation event, which is what terminates benign recomputation cascades.
//!
//! # Determinism
//!
//! JSON objects are hashed with keys sorted recursively, so two field maps
//! with the same content but different insertion order hash identically.

use deriva_core::record::Fields;
use serde_json::Value;

/// Computes a blake3 hash of a JSON value's canonical form.
pub fn value_hash(value: &Value) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    update_canonical(&mut hasher, value);
    hasher.finalize()
}

/// Computes a blake3 hash of a record's field map, key order independent.
pub fn fields_hash(fields: &Fields) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    let mut names: Vec<&String> = fields.keys().collect();
    names.sort();
    for name in names {
        hasher.update(name.as_bytes());
        hasher.update(&[0]);
        update_canonical(&mut hasher, &fields[name.as_str()]);
    }
    hasher.finalize()
}

/// Feeds a value into the hasher with object keys sorted recursively.
/// Scalars and arrays hash their serde_json bytes directly.
fn update_canonical(hasher: &mut blake3::Hasher, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            hasher.update(b"{");
            for key in keys {
                hasher.update(key.as_bytes());
                hasher.update(&[0]);
                update_canonical(hasher, &map[key.as_str()]);
            }
            hasher.update(b"}");
        }
        Value::Array(items) => {
            hasher.update(b"[");
            for item in items {
                update_canonical(hasher, item);
                hasher.update(&[0]);
            }
            hasher.update(b"]");
        }
        other => {
            // Scalar serialization is already canonical.
            let bytes = serde_json::to_vec(other)
                .expect("scalar JSON serialization should never fail");
            hasher.update(&bytes);
        }
    }
}
