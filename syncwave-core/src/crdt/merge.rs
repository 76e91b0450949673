//! Merge functions for concurrent CRDT states
//!
//! A merge function receives both data values and the union clock and
//! returns the reconciled data. It only runs when neither side's clock
//! dominates the other.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::vector_clock::VectorClock;
use crate::event_store::checksum::canonical_string;

/// Reconciles two concurrent data values
pub trait MergeFn: Send + Sync {
    fn merge(&self, local: &Value, remote: &Value, clock: &VectorClock) -> Value;
}

impl<F> MergeFn for F
where
    F: Fn(&Value, &Value, &VectorClock) -> Value + Send + Sync,
{
    fn merge(&self, local: &Value, remote: &Value, clock: &VectorClock) -> Value {
        self(local, remote, clock)
    }
}

/// Shallow object merge where remote fields win. Not commutative when both
/// sides set the same key to different values; supply a domain merge for
/// real conflicts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShallowMerge;

impl MergeFn for ShallowMerge {
    fn merge(&self, local: &Value, remote: &Value, _clock: &VectorClock) -> Value {
        match (local, remote) {
            (Value::Object(local), Value::Object(remote)) => {
                let mut merged = local.clone();
                for (key, value) in remote {
                    merged.insert(key.clone(), value.clone());
                }
                Value::Object(merged)
            }
            (_, Value::Null) => local.clone(),
            _ => remote.clone(),
        }
    }
}

/// Per-field last-writer-wins over objects that carry a `_ts` sub-object
/// mapping field name to write timestamp. Ties are broken by comparing the
/// canonical JSON of the values, so the result is the same whichever side
/// is local.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriteWinsMerge;

pub const TIMESTAMP_FIELD: &str = "_ts";

impl LastWriteWinsMerge {
    /// Set `field` to `value` at `timestamp` on an object state.
    pub fn write(data: &mut Value, field: &str, value: Value, timestamp: u64) {
        if !data.is_object() {
            *data = Value::Object(Map::new());
        }
        if let Value::Object(object) = data {
            object.insert(field.to_string(), value);
            let stamps = object
                .entry(TIMESTAMP_FIELD.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(stamps) = stamps {
                stamps.insert(field.to_string(), Value::from(timestamp));
            } else {
                let mut fresh = Map::new();
                fresh.insert(field.to_string(), Value::from(timestamp));
                *stamps = Value::Object(fresh);
            }
        }
    }

    fn stamp(data: &Map<String, Value>, field: &str) -> u64 {
        data.get(TIMESTAMP_FIELD)
            .and_then(|ts| ts.get(field))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }
}

impl MergeFn for LastWriteWinsMerge {
    fn merge(&self, local: &Value, remote: &Value, _clock: &VectorClock) -> Value {
        let empty = Map::new();
        let local = local.as_object().unwrap_or(&empty);
        let remote = remote.as_object().unwrap_or(&empty);

        let mut merged = Map::new();
        let mut stamps = Map::new();
        let fields = local
            .keys()
            .chain(remote.keys())
            .filter(|k| k.as_str() != TIMESTAMP_FIELD);

        for field in fields {
            if merged.contains_key(field) {
                continue;
            }
            let winner = match (local.get(field), remote.get(field)) {
                (Some(l), Some(r)) => {
                    let (lt, rt) = (Self::stamp(local, field), Self::stamp(remote, field));
                    let order = lt
                        .cmp(&rt)
                        .then_with(|| canonical_string(l).cmp(&canonical_string(r)));
                    match order {
                        Ordering::Less => (r, rt),
                        _ => (l, lt),
                    }
                }
                (Some(l), None) => (l, Self::stamp(local, field)),
                (None, Some(r)) => (r, Self::stamp(remote, field)),
                (None, None) => continue,
            };
            merged.insert(field.clone(), winner.0.clone());
            stamps.insert(field.clone(), Value::from(winner.1));
        }

        if !stamps.is_empty() {
            merged.insert(TIMESTAMP_FIELD.to_string(), Value::Object(stamps));
        }
        Value::Object(merged)
    }
}
