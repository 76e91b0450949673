//! Test fixtures for creating common test objects
//!
//! Factory functions for stores, services and seeded actors, plus a builder
//! for events.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::config::{Config, EventStoreConfig};
use crate::event_log::MemoryEventLog;
use crate::event_store::{Event, EventEnvelope, EventStore};
use crate::replay::{FnReducer, Reducer};
use crate::service::RealtimeService;

/// Builder for test events
pub struct TestEventBuilder {
    actor_id: String,
    event_type: String,
    payload: Value,
    version: u64,
}

impl TestEventBuilder {
    pub fn new(actor_id: &str, version: u64) -> Self {
        Self {
            actor_id: actor_id.to_string(),
            event_type: "increment".to_string(),
            payload: json!({ "by": 1 }),
            version,
        }
    }

    pub fn with_type(mut self, event_type: &str) -> Self {
        self.event_type = event_type.to_string();
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn build(self) -> Event {
        Event::new(self.actor_id, self.event_type, self.payload, self.version)
    }

    pub fn sealed(self) -> EventEnvelope {
        EventEnvelope::seal(self.build())
    }
}

/// Reducer over `{"count": n}`: `increment` adds `payload.by` (default 1),
/// `reset` sets the count to 0, anything else is ignored.
pub fn counter_reducer() -> Arc<dyn Reducer> {
    Arc::new(FnReducer::new(json!({ "count": 0 }), |state: Value, event: &Event| {
        let count = state["count"].as_i64().unwrap_or(0);
        let count = match event.event_type.as_str() {
            "increment" => count + event.payload["by"].as_i64().unwrap_or(1),
            "reset" => 0,
            _ => count,
        };
        json!({ "count": count, "version": event.version })
    }))
}

/// Config for tests: both transports, heartbeats far enough apart not to
/// interleave with assertions, snapshots every 5 events.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.event_store.snapshot_interval = 5;
    config.transport.heartbeat_interval = Duration::from_secs(60);
    config.transport.reconnect.interval = Duration::from_millis(50);
    config.server.shutdown_timeout = Duration::from_secs(5);
    config
}

/// Store over a fresh in-memory log. The log is returned for fault injection.
pub fn memory_store(snapshot_interval: u64) -> (Arc<MemoryEventLog>, Arc<EventStore>) {
    let log = Arc::new(MemoryEventLog::new());
    let store = Arc::new(EventStore::new(
        log.clone(),
        EventStoreConfig {
            snapshot_interval,
            ..Default::default()
        },
    ));
    (log, store)
}

/// Realtime service over a fresh in-memory log with the counter reducer
pub fn test_service(config: Config) -> Arc<RealtimeService> {
    test_service_with_log(Arc::new(MemoryEventLog::new()), config)
}

pub fn test_service_with_log(log: Arc<MemoryEventLog>, config: Config) -> Arc<RealtimeService> {
    Arc::new(RealtimeService::new(log, counter_reducer(), config))
}

/// Append `count` increment events to `actor_id` at the next free versions.
pub async fn seed_events(store: &EventStore, actor_id: &str, count: u64) -> Vec<EventEnvelope> {
    let mut appended = Vec::with_capacity(count as usize);
    for i in 0..count {
        let envelope = store
            .append_next(actor_id, "increment", json!({ "by": 1, "seq": i }))
            .await
            .expect("seed append");
        appended.push(envelope);
    }
    appended
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::fold;

    #[test]
    fn test_counter_reducer() {
        let reducer = counter_reducer();
        let events = vec![
            TestEventBuilder::new("a", 1).build(),
            TestEventBuilder::new("a", 2).with_payload(json!({ "by": 4 })).build(),
            TestEventBuilder::new("a", 3).with_type("noop").build(),
        ];
        let state = fold(reducer.as_ref(), reducer.initial_state(), &events);
        assert_eq!(state, json!({ "count": 5, "version": 3 }));
    }

    #[tokio::test]
    async fn test_seed_events() {
        let (_, store) = memory_store(0);
        let seeded = seed_events(&store, "room-1", 3).await;
        assert_eq!(seeded.len(), 3);
        assert_eq!(store.get_latest_version("room-1").await.unwrap(), 3);
    }
}
