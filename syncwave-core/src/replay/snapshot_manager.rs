/*
    snapshot_manager.rs - Snapshot creation, replay and compaction

    Snapshots are folds of an actor's events persisted through the
    EventStore. A snapshot that fails checksum verification is never
    trusted: replay logs it and starts from the next older intact one, or
    from the full history. Any fold over a range with missing (pruned)
    events fails instead of producing a partial state.

    The background worker consumes `SnapshotRequest`s sent by the
    EventStore when an append lands on the snapshot cadence. Its failures
    are logged and counted, never surfaced to the appender.
*/

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::reducer::{fold, Reducer};
use crate::config::ReplayConfig;
use crate::error::{SyncError, SyncResult};
use crate::event_store::checksum::state_checksum;
use crate::event_store::{ActorSnapshot, Event, EventStore, SnapshotRequest};
use crate::metrics::{record_counter, Timer};
use crate::shutdown::ShutdownSignal;

/// Outcome of folding a range of events. Derived, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayResult {
    pub actor_id: String,
    pub from_version: u64,
    pub to_version: u64,

    /// Snapshot the fold started from, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_version: Option<u64>,

    pub events: Vec<Event>,
    pub final_state: Value,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// SHA-256 over the canonical final state
    pub checksum: String,
}

/// What `compact_snapshots` removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionReport {
    pub actor_id: String,
    pub kept: Vec<u64>,
    pub deleted: Vec<u64>,
    pub events_pruned: usize,
}

/// Builds snapshots and replays actor state through a reducer
pub struct SnapshotManager {
    store: Arc<EventStore>,
    reducer: Arc<dyn Reducer>,
    config: ReplayConfig,
}

impl SnapshotManager {
    pub fn new(store: Arc<EventStore>, reducer: Arc<dyn Reducer>, config: ReplayConfig) -> Self {
        SnapshotManager {
            store,
            reducer,
            config,
        }
    }

    /// Build a manager, install it as the store's snapshot trigger and spawn
    /// the worker that serves it.
    pub async fn attach(
        store: Arc<EventStore>,
        reducer: Arc<dyn Reducer>,
        config: ReplayConfig,
    ) -> SyncResult<(Arc<Self>, SnapshotWorker)> {
        let manager = Arc::new(Self::new(store.clone(), reducer, config));
        let (tx, rx) = mpsc::channel(store.config().snapshot_queue_capacity.max(1));
        if !store.install_snapshot_trigger(tx).await {
            return Err(SyncError::InvalidRequest(
                "a snapshot trigger is already installed on this store".to_string(),
            ));
        }
        let worker = manager.spawn_worker(rx, None);
        Ok((manager, worker))
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    pub fn reducer(&self) -> &Arc<dyn Reducer> {
        &self.reducer
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Snapshot the actor at its latest version.
    pub async fn create_snapshot(&self, actor_id: &str) -> SyncResult<ActorSnapshot> {
        let latest = self
            .store
            .get_latest_version(actor_id)
            .await
            .map_err(|e| SyncError::snapshot_failed(actor_id, e))?;
        if latest == 0 {
            return Err(SyncError::NoEventsForSnapshot(actor_id.to_string()));
        }
        self.create_snapshot_at(actor_id, latest).await
    }

    /// Snapshot the actor at exactly `version`.
    pub async fn create_snapshot_at(&self, actor_id: &str, version: u64) -> SyncResult<ActorSnapshot> {
        if version == 0 {
            return Err(SyncError::NoEventsForSnapshot(actor_id.to_string()));
        }
        let snapshot = self
            .build_snapshot(actor_id, version)
            .await
            .map_err(|e| SyncError::snapshot_failed(actor_id, e))?;

        self.store
            .save_snapshot(snapshot.clone())
            .await
            .map_err(|e| SyncError::snapshot_failed(actor_id, e))?;

        record_counter("snapshot.created", 1);
        info!(actor_id, version, checksum = %snapshot.checksum, "snapshot created");
        Ok(snapshot)
    }

    async fn build_snapshot(&self, actor_id: &str, version: u64) -> SyncResult<ActorSnapshot> {
        // Start from the newest trusted snapshot at or below the target
        let base = self
            .store
            .list_snapshots(actor_id)
            .await?
            .into_iter()
            .rev()
            .filter(|s| s.version <= version)
            .find(|s| s.verify().is_ok());

        let (base_version, base_state, base_event_id) = match base {
            Some(snapshot) => (snapshot.version, snapshot.state, snapshot.last_event_id),
            None => (0, self.reducer.initial_state(), String::new()),
        };
        if base_version == version {
            return Ok(ActorSnapshot::new(actor_id, base_state, version, base_event_id));
        }

        let events = self.store.get_event_range(actor_id, base_version + 1, version).await?;
        check_contiguous(actor_id, base_version + 1, version, &events)?;

        let state = fold(self.reducer.as_ref(), base_state, &events);
        record_counter("replay.events.folded", events.len() as u64);
        let last_event_id = events.last().map(|e| e.id.clone()).unwrap_or(base_event_id);
        Ok(ActorSnapshot::new(actor_id, state, version, last_event_id))
    }

    /// Fold events `from_version..=to_version` (to defaults to the latest)
    /// from the reducer's initial state. `max_replay_events`, when set,
    /// keeps only the most recent events of the range.
    pub async fn replay_events(
        &self,
        actor_id: &str,
        from_version: u64,
        to_version: Option<u64>,
    ) -> SyncResult<ReplayResult> {
        self.replay_range(actor_id, from_version, to_version, self.config.max_replay_events)
            .await
            .map_err(|e| SyncError::replay_failed(actor_id, e))
    }

    /// Fold the complete history, ignoring any replay cap.
    pub async fn replay_all(&self, actor_id: &str) -> SyncResult<ReplayResult> {
        self.replay_range(actor_id, 1, None, None)
            .await
            .map_err(|e| SyncError::replay_failed(actor_id, e))
    }

    async fn replay_range(
        &self,
        actor_id: &str,
        from_version: u64,
        to_version: Option<u64>,
        cap: Option<usize>,
    ) -> SyncResult<ReplayResult> {
        let timer = Timer::new("replay.duration_ms");
        let from = from_version.max(1);
        let latest = self.store.get_latest_version(actor_id).await?;
        let to = to_version.map_or(latest, |to| to.min(latest));

        let mut events = self.store.get_event_range(actor_id, from, to).await?;
        check_contiguous(actor_id, from, to, &events)?;
        if let Some(cap) = cap {
            if events.len() > cap {
                let skip = events.len() - cap;
                debug!(actor_id, cap, skipped = skip, "replay capped to most recent events");
                events.drain(..skip);
            }
        }

        let final_state = fold(self.reducer.as_ref(), self.reducer.initial_state(), &events);
        record_counter("replay.events.folded", events.len() as u64);

        Ok(ReplayResult {
            actor_id: actor_id.to_string(),
            from_version: events.first().map_or(from, |e| e.version),
            to_version: events.last().map_or(to, |e| e.version),
            snapshot_version: None,
            checksum: state_checksum(&final_state),
            events,
            final_state,
            duration: timer.stop(),
        })
    }

    /// Newest snapshot that passes verification. Corrupt snapshots are
    /// logged and skipped, so an older intact one is used before falling
    /// back to the full history.
    pub async fn load_trusted_snapshot(&self, actor_id: &str) -> SyncResult<Option<ActorSnapshot>> {
        let snapshots = self.store.list_snapshots(actor_id).await?;
        for snapshot in snapshots.into_iter().rev() {
            match snapshot.verify() {
                Ok(()) => return Ok(Some(snapshot)),
                Err(e) => {
                    record_counter("event_store.checksum.failures", 1);
                    record_counter("replay.fallbacks", 1);
                    warn!(actor_id, version = snapshot.version, error = %e, "snapshot failed verification, trying an older one");
                }
            }
        }
        Ok(None)
    }

    /// Fold only the events newer than the latest trusted snapshot.
    pub async fn replay_from_latest_snapshot(&self, actor_id: &str) -> SyncResult<ReplayResult> {
        let snapshot = self
            .load_trusted_snapshot(actor_id)
            .await
            .map_err(|e| SyncError::replay_failed(actor_id, e))?;
        let Some(snapshot) = snapshot else {
            return self.replay_all(actor_id).await;
        };

        let timer = Timer::new("replay.duration_ms");
        let events = self
            .snapshot_tail(actor_id, snapshot.version)
            .await
            .map_err(|e| SyncError::replay_failed(actor_id, e))?;

        let final_state = fold(self.reducer.as_ref(), snapshot.state.clone(), &events);
        record_counter("replay.events.folded", events.len() as u64);
        debug!(actor_id, snapshot_version = snapshot.version, tail = events.len(), "replayed from snapshot");

        Ok(ReplayResult {
            actor_id: actor_id.to_string(),
            from_version: snapshot.version + 1,
            to_version: events.last().map_or(snapshot.version, |e| e.version),
            snapshot_version: Some(snapshot.version),
            checksum: state_checksum(&final_state),
            events,
            final_state,
            duration: timer.stop(),
        })
    }

    /// Every event after `base_version` up to the latest, with no gaps.
    pub(crate) async fn snapshot_tail(&self, actor_id: &str, base_version: u64) -> SyncResult<Vec<Event>> {
        let latest = self.store.get_latest_version(actor_id).await?;
        let events = self.store.get_event_range(actor_id, base_version + 1, latest).await?;
        check_contiguous(actor_id, base_version + 1, latest, &events)?;
        Ok(events)
    }

    /// Keep the newest `keep_versions` snapshots (at least one) and delete
    /// the rest. With `compact_events` set, also prunes events at or below
    /// the oldest retained snapshot.
    pub async fn compact_snapshots(&self, actor_id: &str, keep_versions: usize) -> SyncResult<CompactionReport> {
        let keep = keep_versions.max(1);
        let snapshots = self.store.list_snapshots(actor_id).await?;
        let split = snapshots.len().saturating_sub(keep);

        let mut report = CompactionReport {
            actor_id: actor_id.to_string(),
            kept: snapshots[split..].iter().map(|s| s.version).collect(),
            ..Default::default()
        };

        for snapshot in &snapshots[..split] {
            if self.store.delete_snapshot(actor_id, snapshot.version).await? {
                report.deleted.push(snapshot.version);
            }
        }
        record_counter("snapshot.compacted", report.deleted.len() as u64);

        if self.config.compact_events {
            if let Some(&oldest_kept) = report.kept.first() {
                report.events_pruned = self.store.prune_events(actor_id, oldest_kept).await?;
            }
        }

        info!(
            actor_id,
            kept = report.kept.len(),
            deleted = report.deleted.len(),
            events_pruned = report.events_pruned,
            "snapshots compacted"
        );
        Ok(report)
    }

    /// Serve snapshot requests until the channel closes or shutdown is signalled.
    pub fn spawn_worker(
        self: &Arc<Self>,
        mut requests: mpsc::Receiver<SnapshotRequest>,
        mut shutdown: Option<broadcast::Receiver<ShutdownSignal>>,
    ) -> SnapshotWorker {
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            info!("snapshot worker started");
            loop {
                let request = tokio::select! {
                    request = requests.recv() => request,
                    _ = wait_for_signal(shutdown.as_mut()) => {
                        info!("snapshot worker received shutdown");
                        break;
                    }
                };
                let Some(request) = request else { break };

                if let Err(e) = manager.create_snapshot_at(&request.actor_id, request.version).await {
                    record_counter("snapshot.failed", 1);
                    warn!(actor_id = %request.actor_id, version = request.version, error = %e, "background snapshot failed");
                }
            }
            info!("snapshot worker stopped");
        });

        SnapshotWorker {
            store: self.store.clone(),
            handle,
        }
    }
}

async fn wait_for_signal(shutdown: Option<&mut broadcast::Receiver<ShutdownSignal>>) {
    match shutdown {
        Some(rx) => {
            let _ = rx.recv().await;
        }
        None => std::future::pending().await,
    }
}

fn check_contiguous(actor_id: &str, from: u64, to: u64, events: &[Event]) -> SyncResult<()> {
    let expected = (to + 1).saturating_sub(from) as usize;
    if events.len() != expected || events.first().is_some_and(|e| e.version != from) {
        return Err(SyncError::QueryFailed(format!(
            "events {from}..={to} of {actor_id} are not all retained ({} found)",
            events.len()
        )));
    }
    Ok(())
}

/// Handle to the background snapshot worker
pub struct SnapshotWorker {
    store: Arc<EventStore>,
    handle: JoinHandle<()>,
}

impl SnapshotWorker {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop immediately, abandoning queued requests.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Detach from the store and wait for queued requests to drain.
    pub async fn stop(self) {
        self.store.remove_snapshot_trigger().await;
        if let Err(e) = self.handle.await {
            warn!(error = %e, "snapshot worker ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EventStoreConfig;
    use crate::event_log::{EventLog, MemoryEventLog};
    use crate::replay::JsonMergeReducer;
    use crate::test_utils::eventually;
    use serde_json::json;

    async fn manager_with(interval: u64, config: ReplayConfig) -> (Arc<MemoryEventLog>, Arc<SnapshotManager>) {
        let log = Arc::new(MemoryEventLog::new());
        let store = Arc::new(EventStore::new(
            log.clone(),
            EventStoreConfig {
                snapshot_interval: interval,
                ..Default::default()
            },
        ));
        let manager = Arc::new(SnapshotManager::new(store, Arc::new(JsonMergeReducer), config));
        (log, manager)
    }

    async fn append_n(manager: &SnapshotManager, actor: &str, n: u64) {
        for v in 1..=n {
            manager
                .store()
                .append_event(Event::new(actor, "set", json!({ "n": v }), v))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_snapshot_requires_events() {
        let (_, manager) = manager_with(0, ReplayConfig::default()).await;
        let err = manager.create_snapshot("empty").await.unwrap_err();
        assert!(matches!(err, SyncError::NoEventsForSnapshot(_)));
    }

    #[tokio::test]
    async fn test_snapshot_matches_full_replay() {
        let (_, manager) = manager_with(0, ReplayConfig::default()).await;
        append_n(&manager, "a", 7).await;

        let snapshot = manager.create_snapshot("a").await.unwrap();
        let full = manager.replay_all("a").await.unwrap();
        assert_eq!(snapshot.version, 7);
        assert_eq!(snapshot.state, full.final_state);
    }

    #[tokio::test]
    async fn test_replay_is_deterministic() {
        let (_, manager) = manager_with(0, ReplayConfig::default()).await;
        append_n(&manager, "a", 5).await;

        let first = manager.replay_events("a", 1, Some(5)).await.unwrap();
        let second = manager.replay_events("a", 1, Some(5)).await.unwrap();
        assert_eq!(first.final_state, second.final_state);
        assert_eq!(first.checksum, second.checksum);
        assert_eq!(first.events.len(), 5);
    }

    #[tokio::test]
    async fn test_replay_cap_keeps_most_recent() {
        let config = ReplayConfig {
            max_replay_events: Some(2),
            ..Default::default()
        };
        let (_, manager) = manager_with(0, config).await;
        append_n(&manager, "a", 5).await;

        let result = manager.replay_events("a", 1, None).await.unwrap();
        let versions: Vec<u64> = result.events.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![4, 5]);
        assert_eq!(result.from_version, 4);
        assert_eq!(result.to_version, 5);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_falls_back() {
        let (log, manager) = manager_with(0, ReplayConfig::default()).await;
        append_n(&manager, "a", 3).await;

        let mut corrupt = manager.create_snapshot("a").await.unwrap();
        corrupt.state = json!({ "bogus": true });
        log.put_snapshot(corrupt).await.unwrap();

        let result = manager.replay_from_latest_snapshot("a").await.unwrap();
        assert_eq!(result.snapshot_version, None);
        assert_eq!(result.events.len(), 3);
        assert_eq!(result.final_state, manager.replay_all("a").await.unwrap().final_state);
    }

    #[tokio::test]
    async fn test_replay_errors_are_wrapped() {
        let (log, manager) = manager_with(0, ReplayConfig::default()).await;
        append_n(&manager, "a", 1).await;
        log.set_available(false);

        let err = manager.replay_events("a", 1, None).await.unwrap_err();
        assert!(matches!(err, SyncError::EventReplayFailed { .. }));
        let err = manager.create_snapshot("a").await.unwrap_err();
        assert!(matches!(err, SyncError::SnapshotCreationFailed { .. }));
    }

    #[tokio::test]
    async fn test_compaction_keeps_newest() {
        let config = ReplayConfig {
            compact_events: true,
            ..Default::default()
        };
        let (log, manager) = manager_with(0, config).await;
        for v in 1..=4u64 {
            manager
                .store()
                .append_event(Event::new("a", "set", json!({ "n": v }), v))
                .await
                .unwrap();
            manager.create_snapshot("a").await.unwrap();
        }

        let report = manager.compact_snapshots("a", 2).await.unwrap();
        assert_eq!(report.kept, vec![3, 4]);
        assert_eq!(report.deleted, vec![1, 2]);
        assert_eq!(report.events_pruned, 3);
        assert_eq!(log.retained_events("a").await, 1);

        let result = manager.replay_from_latest_snapshot("a").await.unwrap();
        assert_eq!(result.final_state, json!({ "n": 4, "version": 4 }));
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_after_pruning_uses_older_snapshot() {
        use crate::replay::OptimizedReplayManager;
        use crate::test_utils::{counter_reducer, memory_store, seed_events};

        let (log, store) = memory_store(0);
        let config = ReplayConfig {
            compact_events: true,
            ..Default::default()
        };
        let manager = Arc::new(SnapshotManager::new(store.clone(), counter_reducer(), config));
        seed_events(&store, "a", 6).await;
        manager.create_snapshot_at("a", 4).await.unwrap();
        let mut latest = manager.create_snapshot_at("a", 5).await.unwrap();

        let report = manager.compact_snapshots("a", 2).await.unwrap();
        assert_eq!(report.kept, vec![4, 5]);
        assert_eq!(report.events_pruned, 4);

        latest.state = json!({ "count": 99, "version": 5 });
        log.put_snapshot(latest).await.unwrap();

        let result = manager.replay_from_latest_snapshot("a").await.unwrap();
        assert_eq!(result.snapshot_version, Some(4));
        assert_eq!(result.events.iter().map(|e| e.version).collect::<Vec<_>>(), vec![5, 6]);
        assert_eq!(result.final_state["count"], 6);

        let sync = OptimizedReplayManager::new(manager.clone()).sync_actor("a").await.unwrap();
        assert_eq!(sync.state["count"], 6);
        assert_eq!(sync.version, 6);
        assert_eq!(sync.snapshot.map(|s| s.version), Some(4));

        // The pruned prefix cannot be folded from scratch.
        let err = manager.replay_events("a", 1, None).await.unwrap_err();
        assert!(matches!(err, SyncError::EventReplayFailed { .. }));
    }

    #[tokio::test]
    async fn test_no_intact_snapshot_over_pruned_history_fails() {
        use crate::test_utils::{counter_reducer, memory_store, seed_events};

        let (log, store) = memory_store(0);
        let config = ReplayConfig {
            compact_events: true,
            ..Default::default()
        };
        let manager = SnapshotManager::new(store.clone(), counter_reducer(), config);
        seed_events(&store, "a", 4).await;
        let mut only = manager.create_snapshot_at("a", 3).await.unwrap();
        manager.compact_snapshots("a", 1).await.unwrap();

        only.state = json!({ "count": 0, "version": 3 });
        log.put_snapshot(only).await.unwrap();

        let err = manager.replay_from_latest_snapshot("a").await.unwrap_err();
        assert!(matches!(err, SyncError::EventReplayFailed { .. }));
    }

    #[tokio::test]
    async fn test_replay_range_is_clamped_to_latest() {
        let (_, manager) = manager_with(0, ReplayConfig::default()).await;
        append_n(&manager, "a", 3).await;

        let result = manager.replay_events("a", 1, Some(10)).await.unwrap();
        assert_eq!(result.to_version, 3);
        assert_eq!(result.events.len(), 3);
    }

    #[tokio::test]
    async fn test_compaction_keeps_at_least_one() {
        let (_, manager) = manager_with(0, ReplayConfig::default()).await;
        append_n(&manager, "a", 2).await;
        manager.create_snapshot("a").await.unwrap();

        let report = manager.compact_snapshots("a", 0).await.unwrap();
        assert_eq!(report.kept, vec![2]);
        assert!(report.deleted.is_empty());
    }

    #[tokio::test]
    async fn test_worker_snapshots_on_cadence() {
        let log = Arc::new(MemoryEventLog::new());
        let store = Arc::new(EventStore::new(
            log.clone(),
            EventStoreConfig {
                snapshot_interval: 5,
                ..Default::default()
            },
        ));
        let (manager, worker) =
            SnapshotManager::attach(store.clone(), Arc::new(JsonMergeReducer), ReplayConfig::default())
                .await
                .unwrap();

        for v in 1..=5 {
            store.append_event(Event::new("room-1", "set", json!({ "n": v }), v)).await.unwrap();
        }

        let store_ref = &store;
        let created = eventually(Duration::from_secs(2), move || async move {
            store_ref.latest_snapshot("room-1").await.ok().flatten().is_some()
        })
        .await;
        assert!(created);

        let result = manager.replay_from_latest_snapshot("room-1").await.unwrap();
        assert_eq!(result.snapshot_version, Some(5));
        assert!(result.events.is_empty());

        worker.stop().await;
        assert!(!store.has_snapshot_trigger().await);
    }
}
