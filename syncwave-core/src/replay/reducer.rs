//! Reducers fold events into actor state
//!
//! A reducer must be a pure function of `(state, event)`: replaying the same
//! events always produces the same state, which is what makes snapshots and
//! full replays interchangeable.

use serde_json::{Map, Value};

use crate::event_store::Event;

/// Folds one event into an actor's state
pub trait Reducer: Send + Sync {
    fn initial_state(&self) -> Value;

    fn apply(&self, state: Value, event: &Event) -> Value;
}

/// Reducer built from a closure
pub struct FnReducer<F> {
    initial: Value,
    apply: F,
}

impl<F> FnReducer<F>
where
    F: Fn(Value, &Event) -> Value + Send + Sync,
{
    pub fn new(initial: Value, apply: F) -> Self {
        FnReducer { initial, apply }
    }
}

impl<F> Reducer for FnReducer<F>
where
    F: Fn(Value, &Event) -> Value + Send + Sync,
{
    fn initial_state(&self) -> Value {
        self.initial.clone()
    }

    fn apply(&self, state: Value, event: &Event) -> Value {
        (self.apply)(state, event)
    }
}

/// Shallow-merges object payloads into an object state and records the
/// version of the last applied event under `"version"`. Non-object payloads
/// are stored under `"value"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMergeReducer;

impl Reducer for JsonMergeReducer {
    fn initial_state(&self) -> Value {
        Value::Object(Map::new())
    }

    fn apply(&self, state: Value, event: &Event) -> Value {
        let mut object = match state {
            Value::Object(object) => object,
            _ => Map::new(),
        };
        match &event.payload {
            Value::Object(fields) => {
                for (key, value) in fields {
                    object.insert(key.clone(), value.clone());
                }
            }
            Value::Null => {}
            other => {
                object.insert("value".to_string(), other.clone());
            }
        }
        object.insert("version".to_string(), Value::from(event.version));
        Value::Object(object)
    }
}

/// Fold `events` in order, starting from `state`.
pub fn fold<'a, I>(reducer: &dyn Reducer, state: Value, events: I) -> Value
where
    I: IntoIterator<Item = &'a Event>,
{
    events
        .into_iter()
        .fold(state, |state, event| reducer.apply(state, event))
}
