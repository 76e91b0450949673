//! Canonical serialization and SHA-256 checksums.
//!
//! Object keys are sorted recursively and the JSON is emitted without
//! whitespace, so the same logical value hashes identically on every platform
//! regardless of map insertion order.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::types::Event;

/// Rebuild a JSON value with every object's keys in byte order.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Compact canonical JSON text.
pub fn canonical_string(value: &Value) -> String {
    // Serializing a `Value` cannot fail.
    serde_json::to_string(&canonicalize(value)).unwrap_or_default()
}

/// Lowercase hex SHA-256.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Checksum over the six semantic fields of an event.
pub fn event_checksum(event: &Event) -> String {
    let value = serde_json::json!({
        "id": event.id,
        "type": event.event_type,
        "payload": event.payload,
        "actorId": event.actor_id,
        "version": event.version,
        "timestamp": event.timestamp,
    });
    sha256_hex(canonical_string(&value).as_bytes())
}

/// Checksum over a snapshot's content. The creation timestamp is excluded so
/// that two folds of the same events produce the same checksum.
pub fn snapshot_checksum(actor_id: &str, state: &Value, version: u64, last_event_id: &str) -> String {
    let value = serde_json::json!({
        "actorId": actor_id,
        "state": state,
        "version": version,
        "lastEventId": last_event_id,
    });
    sha256_hex(canonical_string(&value).as_bytes())
}

/// Checksum over a bare state value.
pub fn state_checksum(state: &Value) -> String {
    sha256_hex(canonical_string(state).as_bytes())
}
