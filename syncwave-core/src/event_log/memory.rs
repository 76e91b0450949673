/*
    memory.rs - In-process event log

    Reference implementation of the log contract. A single write lock makes
    the expected-version check and the push one atomic step, which gives the
    same per-actor linearizability a durable backend must provide.
*/

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{EventFilter, EventLog, LogError, LogRecordId};
use crate::event_store::{ActorSnapshot, EventEnvelope};

#[derive(Debug, Default)]
struct ActorStream {
    events: Vec<EventEnvelope>,
    /// Survives pruning so versions never restart
    latest: u64,
    snapshots: BTreeMap<u64, ActorSnapshot>,
}

#[derive(Debug, Default)]
struct Inner {
    actors: HashMap<String, ActorStream>,
    by_id: HashMap<String, (String, u64)>,
}

/// Event log held entirely in memory
#[derive(Debug)]
pub struct MemoryEventLog {
    inner: RwLock<Inner>,
    available: AtomicBool,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        MemoryEventLog {
            inner: RwLock::new(Inner::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: while unavailable every call fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Replace a stored envelope in place without re-sealing it.
    /// Used to exercise integrity checks.
    pub async fn overwrite_envelope(&self, envelope: EventEnvelope) -> bool {
        let mut inner = self.inner.write().await;
        let Some(stream) = inner.actors.get_mut(&envelope.event.actor_id) else {
            return false;
        };
        match stream
            .events
            .iter_mut()
            .find(|stored| stored.event.version == envelope.event.version)
        {
            Some(slot) => {
                *slot = envelope;
                true
            }
            None => false,
        }
    }

    /// Number of events currently retained for an actor.
    pub async fn retained_events(&self, actor_id: &str) -> usize {
        let inner = self.inner.read().await;
        inner.actors.get(actor_id).map_or(0, |s| s.events.len())
    }

    fn check_available(&self) -> Result<(), LogError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LogError::Unavailable("memory log switched off".to_string()))
        }
    }
}

impl Default for MemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, envelope: EventEnvelope) -> Result<LogRecordId, LogError> {
        self.check_available()?;
        let mut inner = self.inner.write().await;

        let actor_id = envelope.event.actor_id.clone();
        let version = envelope.event.version;
        let event_id = envelope.event.id.clone();

        let stream = inner.actors.entry(actor_id.clone()).or_default();
        let expected = stream.latest + 1;
        if version != expected {
            return Err(LogError::VersionConflict {
                actor_id,
                expected,
                actual: version,
            });
        }

        stream.events.push(envelope);
        stream.latest = version;
        inner.by_id.insert(event_id.clone(), (actor_id, version));
        Ok(event_id)
    }

    async fn query(&self, filter: &EventFilter) -> Result<Vec<EventEnvelope>, LogError> {
        self.check_available()?;
        let inner = self.inner.read().await;
        let Some(stream) = inner.actors.get(&filter.actor_id) else {
            return Ok(Vec::new());
        };

        let matching = stream.events.iter().filter(|e| filter.matches(e)).cloned();
        Ok(match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    async fn get(&self, event_id: &str) -> Result<Option<EventEnvelope>, LogError> {
        self.check_available()?;
        let inner = self.inner.read().await;
        let Some((actor_id, version)) = inner.by_id.get(event_id) else {
            return Ok(None);
        };
        Ok(inner.actors.get(actor_id).and_then(|stream| {
            stream
                .events
                .iter()
                .find(|e| e.event.version == *version)
                .cloned()
        }))
    }

    async fn latest_version(&self, actor_id: &str) -> Result<u64, LogError> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner.actors.get(actor_id).map_or(0, |s| s.latest))
    }

    async fn put_snapshot(&self, snapshot: ActorSnapshot) -> Result<(), LogError> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        let stream = inner.actors.entry(snapshot.actor_id.clone()).or_default();
        stream.snapshots.insert(snapshot.version, snapshot);
        Ok(())
    }

    async fn latest_snapshot(&self, actor_id: &str) -> Result<Option<ActorSnapshot>, LogError> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner
            .actors
            .get(actor_id)
            .and_then(|s| s.snapshots.values().next_back().cloned()))
    }

    async fn list_snapshots(&self, actor_id: &str) -> Result<Vec<ActorSnapshot>, LogError> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner
            .actors
            .get(actor_id)
            .map(|s| s.snapshots.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_snapshot(&self, actor_id: &str, version: u64) -> Result<bool, LogError> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        Ok(inner
            .actors
            .get_mut(actor_id)
            .map_or(false, |s| s.snapshots.remove(&version).is_some()))
    }

    async fn prune_events(&self, actor_id: &str, up_to_version: u64) -> Result<usize, LogError> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        let Inner { actors, by_id } = &mut *inner;
        let Some(stream) = actors.get_mut(actor_id) else {
            return Ok(0);
        };

        let before = stream.events.len();
        stream.events.retain(|e| {
            let keep = e.event.version > up_to_version;
            if !keep {
                by_id.remove(&e.event.id);
            }
            keep
        });
        let pruned = before - stream.events.len();
        debug!(actor_id, up_to_version, pruned, "pruned events");
        Ok(pruned)
    }
}
