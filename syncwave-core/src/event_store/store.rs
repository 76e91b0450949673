/*
    store.rs - EventStore

    Append path:
      1. Seal the event (checksum + sequence hint)
      2. Atomic append through the log (expected-version check)
      3. If the version lands on the snapshot cadence, hand a request to the
         installed trigger without waiting on it

    Read path verifies every envelope before handing it out.
*/

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use super::types::{ActorSnapshot, Event, EventEnvelope};
use crate::config::EventStoreConfig;
use crate::error::{SyncError, SyncResult};
use crate::event_log::{EventFilter, EventLog, LogError};
use crate::metrics::{record_counter, Timer};

/// Request for the background snapshot worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRequest {
    pub actor_id: String,
    pub version: u64,
}

/// Event store over a pluggable log backend
pub struct EventStore {
    log: Arc<dyn EventLog>,
    config: EventStoreConfig,
    snapshot_trigger: RwLock<Option<mpsc::Sender<SnapshotRequest>>>,
}

impl EventStore {
    pub fn new(log: Arc<dyn EventLog>, config: EventStoreConfig) -> Self {
        EventStore {
            log,
            config,
            snapshot_trigger: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &EventStoreConfig {
        &self.config
    }

    pub fn snapshot_interval(&self) -> u64 {
        self.config.snapshot_interval
    }

    /// Append an event whose version the caller computed as `latest + 1`.
    /// Returns the assigned sequence id.
    pub async fn append_event(&self, event: Event) -> SyncResult<String> {
        let envelope = self.append_sealed(event).await?;
        Ok(envelope.sequence_id)
    }

    /// Like `append_event`, returning the stored envelope.
    pub async fn append_envelope(&self, event: Event) -> SyncResult<EventEnvelope> {
        self.append_sealed(event).await
    }

    /// Append at the next free version, re-reading and retrying when another
    /// writer wins the race.
    pub async fn append_next(
        &self,
        actor_id: &str,
        event_type: &str,
        payload: Value,
    ) -> SyncResult<EventEnvelope> {
        let mut attempt = 0;
        loop {
            let latest = self.get_latest_version(actor_id).await?;
            let event = Event::new(actor_id, event_type, payload.clone(), latest + 1);

            match self.append_sealed(event).await {
                Err(SyncError::VersionConflict { expected, actual, .. })
                    if attempt < self.config.max_append_retries =>
                {
                    attempt += 1;
                    debug!(actor_id, expected, actual, attempt, "append lost version race, retrying");
                }
                result => return result,
            }
        }
    }

    async fn append_sealed(&self, event: Event) -> SyncResult<EventEnvelope> {
        let timer = Timer::new("event_store.append.duration_ms");
        let actor_id = event.actor_id.clone();
        let version = event.version;
        let envelope = EventEnvelope::seal(event);

        match self.log.append(envelope.clone()).await {
            Ok(_) => {}
            Err(LogError::VersionConflict { expected, actual, .. }) => {
                record_counter("event_store.appends.conflicts", 1);
                return Err(SyncError::VersionConflict {
                    actor_id,
                    expected,
                    actual,
                });
            }
            Err(LogError::Unavailable(reason)) => {
                record_counter("event_store.appends.failed", 1);
                error!(actor_id = %actor_id, version, %reason, "append failed");
                return Err(SyncError::AppendFailed { actor_id, reason });
            }
        }

        record_counter("event_store.appends.total", 1);
        let elapsed = timer.stop();
        debug!(
            actor_id = %actor_id,
            version,
            sequence_id = %envelope.sequence_id,
            elapsed_ms = elapsed.as_millis() as u64,
            "event appended"
        );

        if self.config.snapshot_interval > 0 && version % self.config.snapshot_interval == 0 {
            self.request_snapshot(&actor_id, version).await;
        }
        Ok(envelope)
    }

    async fn request_snapshot(&self, actor_id: &str, version: u64) {
        let trigger = self.snapshot_trigger.read().await;
        let Some(sender) = trigger.as_ref() else {
            debug!(actor_id, version, "snapshot due but no trigger installed");
            return;
        };

        let request = SnapshotRequest {
            actor_id: actor_id.to_string(),
            version,
        };
        match sender.try_send(request) {
            Ok(()) => debug!(actor_id, version, "snapshot requested"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                record_counter("snapshot.requests.dropped", 1);
                warn!(actor_id, version, "snapshot queue full, request dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(actor_id, version, "snapshot worker gone, request dropped");
            }
        }
    }

    /// Install the channel snapshot requests are sent on. Returns false and
    /// keeps the existing trigger if one is already installed.
    pub async fn install_snapshot_trigger(&self, sender: mpsc::Sender<SnapshotRequest>) -> bool {
        let mut trigger = self.snapshot_trigger.write().await;
        if trigger.as_ref().is_some_and(|s| !s.is_closed()) {
            warn!("snapshot trigger already installed");
            return false;
        }
        *trigger = Some(sender);
        info!("snapshot trigger installed");
        true
    }

    /// Drop the trigger. The worker sees its channel close and exits.
    pub async fn remove_snapshot_trigger(&self) -> bool {
        self.snapshot_trigger.write().await.take().is_some()
    }

    pub async fn has_snapshot_trigger(&self) -> bool {
        self.snapshot_trigger.read().await.is_some()
    }

    /// Events with version > `since_version`, ascending, each verified.
    pub async fn get_events(&self, actor_id: &str, since_version: u64) -> SyncResult<Vec<Event>> {
        let envelopes = self.get_envelopes(actor_id, since_version, None).await?;
        Ok(envelopes.into_iter().map(|e| e.event).collect())
    }

    pub async fn get_envelopes(
        &self,
        actor_id: &str,
        since_version: u64,
        limit: Option<usize>,
    ) -> SyncResult<Vec<EventEnvelope>> {
        let mut filter = EventFilter::for_actor(actor_id).since(since_version);
        filter.limit = limit;
        self.query_verified(&filter).await
    }

    /// Events with `from <= version <= to`.
    pub async fn get_event_range(&self, actor_id: &str, from: u64, to: u64) -> SyncResult<Vec<Event>> {
        if from > to {
            return Ok(Vec::new());
        }
        let filter = EventFilter::for_actor(actor_id)
            .since(from.saturating_sub(1))
            .until(to);
        let envelopes = self.query_verified(&filter).await?;
        Ok(envelopes.into_iter().map(|e| e.event).collect())
    }

    pub async fn query(&self, filter: &EventFilter) -> SyncResult<Vec<EventEnvelope>> {
        self.query_verified(filter).await
    }

    async fn query_verified(&self, filter: &EventFilter) -> SyncResult<Vec<EventEnvelope>> {
        let envelopes = self.log.query(filter).await.map_err(query_failed)?;
        for envelope in &envelopes {
            verify_envelope(envelope)?;
        }
        Ok(envelopes)
    }

    pub async fn get_event(&self, event_id: &str) -> SyncResult<Option<Event>> {
        match self.log.get(event_id).await.map_err(query_failed)? {
            Some(envelope) => {
                verify_envelope(&envelope)?;
                Ok(Some(envelope.event))
            }
            None => Ok(None),
        }
    }

    /// Highest appended version, 0 for an unknown actor.
    pub async fn get_latest_version(&self, actor_id: &str) -> SyncResult<u64> {
        self.log.latest_version(actor_id).await.map_err(query_failed)
    }

    pub async fn save_snapshot(&self, snapshot: ActorSnapshot) -> SyncResult<()> {
        let actor_id = snapshot.actor_id.clone();
        self.log
            .put_snapshot(snapshot)
            .await
            .map_err(|e| SyncError::AppendFailed {
                actor_id,
                reason: e.to_string(),
            })
    }

    /// Latest stored snapshot. Not verified here; callers decide how to
    /// treat a corrupt one.
    pub async fn latest_snapshot(&self, actor_id: &str) -> SyncResult<Option<ActorSnapshot>> {
        self.log.latest_snapshot(actor_id).await.map_err(query_failed)
    }

    pub async fn list_snapshots(&self, actor_id: &str) -> SyncResult<Vec<ActorSnapshot>> {
        self.log.list_snapshots(actor_id).await.map_err(query_failed)
    }

    pub async fn delete_snapshot(&self, actor_id: &str, version: u64) -> SyncResult<bool> {
        self.log.delete_snapshot(actor_id, version).await.map_err(query_failed)
    }

    pub async fn prune_events(&self, actor_id: &str, up_to_version: u64) -> SyncResult<usize> {
        self.log.prune_events(actor_id, up_to_version).await.map_err(query_failed)
    }
}

fn query_failed(err: LogError) -> SyncError {
    SyncError::QueryFailed(err.to_string())
}

fn verify_envelope(envelope: &EventEnvelope) -> SyncResult<()> {
    envelope.verify().map_err(|e| {
        record_counter("event_store.checksum.failures", 1);
        error!(
            actor_id = %envelope.event.actor_id,
            version = envelope.event.version,
            "stored event failed checksum verification"
        );
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::MemoryEventLog;
    use serde_json::json;

    fn store_with(interval: u64) -> (Arc<MemoryEventLog>, EventStore) {
        let log = Arc::new(MemoryEventLog::new());
        let config = EventStoreConfig {
            snapshot_interval: interval,
            ..Default::default()
        };
        (log.clone(), EventStore::new(log, config))
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let (_, store) = store_with(0);
        for v in 1..=3 {
            let seq = store
                .append_event(Event::new("room-1", "msg", json!({ "n": v }), v))
                .await
                .unwrap();
            assert!(seq.starts_with("room-1-"));
        }

        assert_eq!(store.get_latest_version("room-1").await.unwrap(), 3);
        let events = store.get_events("room-1", 1).await.unwrap();
        let versions: Vec<u64> = events.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_stale_version_is_conflict() {
        let (_, store) = store_with(0);
        store.append_event(Event::new("a", "x", json!({}), 1)).await.unwrap();

        let err = store.append_event(Event::new("a", "x", json!({}), 1)).await.unwrap_err();
        assert!(matches!(err, SyncError::VersionConflict { expected: 2, actual: 1, .. }));
    }

    #[tokio::test]
    async fn test_unavailable_log_is_append_failed() {
        let (log, store) = store_with(0);
        log.set_available(false);
        let err = store.append_event(Event::new("a", "x", json!({}), 1)).await.unwrap_err();
        assert!(matches!(err, SyncError::AppendFailed { .. }));

        let err = store.get_events("a", 0).await.unwrap_err();
        assert!(matches!(err, SyncError::QueryFailed(_)));
    }

    #[tokio::test]
    async fn test_append_next_retries_races() {
        let (_, store) = store_with(0);
        let store = Arc::new(store);

        let mut tasks = Vec::new();
        for i in 0..3 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.append_next("shared", "inc", json!({ "writer": i })).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.get_latest_version("shared").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_tampered_event_fails_read() {
        let (log, store) = store_with(0);
        store.append_event(Event::new("a", "x", json!({ "n": 1 }), 1)).await.unwrap();

        let mut envelope = log.query(&EventFilter::for_actor("a")).await.unwrap().remove(0);
        envelope.event.payload = json!({ "n": 2 });
        assert!(log.overwrite_envelope(envelope).await);

        let err = store.get_events("a", 0).await.unwrap_err();
        assert!(matches!(err, SyncError::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn test_snapshot_request_on_cadence() {
        let (_, store) = store_with(2);
        let (tx, mut rx) = mpsc::channel(4);
        assert!(store.install_snapshot_trigger(tx.clone()).await);
        assert!(!store.install_snapshot_trigger(tx).await);

        for v in 1..=4 {
            store.append_event(Event::new("a", "x", json!({}), v)).await.unwrap();
        }

        assert_eq!(rx.recv().await.unwrap(), SnapshotRequest { actor_id: "a".into(), version: 2 });
        assert_eq!(rx.recv().await.unwrap(), SnapshotRequest { actor_id: "a".into(), version: 4 });
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_trigger_never_fails_append() {
        let (_, store) = store_with(1);
        let (tx, _rx) = mpsc::channel(1);
        store.install_snapshot_trigger(tx).await;

        for v in 1..=5 {
            store.append_event(Event::new("a", "x", json!({}), v)).await.unwrap();
        }
        assert_eq!(store.get_latest_version("a").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_event_range_and_lookup() {
        let (_, store) = store_with(0);
        let mut ids = Vec::new();
        for v in 1..=6 {
            let event = Event::new("a", "x", json!({ "v": v }), v);
            ids.push(event.id.clone());
            store.append_event(event).await.unwrap();
        }

        let range = store.get_event_range("a", 2, 4).await.unwrap();
        assert_eq!(range.iter().map(|e| e.version).collect::<Vec<_>>(), vec![2, 3, 4]);
        assert!(store.get_event_range("a", 5, 2).await.unwrap().is_empty());

        let found = store.get_event(&ids[3]).await.unwrap().unwrap();
        assert_eq!(found.version, 4);
        assert!(store.get_event("missing").await.unwrap().is_none());
    }
}
