//! Realtime coordinator
//!
//! Owns the event store, the replay managers and the configured transports.
//! Every appended envelope is fanned out to remote clients whose actor filter
//! accepts it and to in-process channel subscribers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::Router;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::subscription::{ChannelSubscription, SubscriptionHub};
use crate::config::Config;
use crate::error::{SyncError, SyncResult};
use crate::event_log::EventLog;
use crate::event_store::{Event, EventEnvelope, EventStore};
use crate::metrics::record_counter;
use crate::replay::{
    ActorSync, CompactionReport, IncrementalSync, OptimizedReplayManager, Reducer, SnapshotManager,
    SnapshotWorker,
};
use crate::transport::{
    ClientInfo, ConnectionInfo, ConnectionRegistry, ServerMessage, SocketService, StreamService,
    SubscriptionRequest, Transport, TransportKind,
};

pub struct RealtimeService {
    config: Config,
    store: Arc<EventStore>,
    snapshots: Arc<SnapshotManager>,
    replay: Arc<OptimizedReplayManager>,
    socket: Option<Arc<SocketService>>,
    stream: Option<Arc<StreamService>>,
    hub: SubscriptionHub,
    worker: Mutex<Option<SnapshotWorker>>,
    connected: AtomicBool,
}

impl RealtimeService {
    pub fn new(log: Arc<dyn EventLog>, reducer: Arc<dyn Reducer>, config: Config) -> Self {
        let store = Arc::new(EventStore::new(log, config.event_store.clone()));
        let snapshots = Arc::new(SnapshotManager::new(store.clone(), reducer, config.replay.clone()));
        let replay = Arc::new(OptimizedReplayManager::new(snapshots.clone()));

        let mode = config.transport.mode;
        let socket = mode
            .includes(TransportKind::WebSocket)
            .then(|| Arc::new(SocketService::new(replay.clone(), &config.transport)));
        let stream = mode
            .includes(TransportKind::Sse)
            .then(|| Arc::new(StreamService::new(&config.transport)));

        RealtimeService {
            hub: SubscriptionHub::new(config.transport.subscriber_capacity),
            config,
            store,
            snapshots,
            replay,
            socket,
            stream,
            worker: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    pub fn snapshots(&self) -> &Arc<SnapshotManager> {
        &self.snapshots
    }

    pub fn replay(&self) -> &Arc<OptimizedReplayManager> {
        &self.replay
    }

    pub fn socket(&self) -> Option<&Arc<SocketService>> {
        self.socket.as_ref()
    }

    pub fn stream(&self) -> Option<&Arc<StreamService>> {
        self.stream.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// The enabled transports
    pub fn transports(&self) -> Vec<Arc<dyn Transport>> {
        let mut transports: Vec<Arc<dyn Transport>> = Vec::with_capacity(2);
        if let Some(socket) = &self.socket {
            transports.push(socket.clone());
        }
        if let Some(stream) = &self.stream {
            transports.push(stream.clone());
        }
        transports
    }

    /// Start transports, heartbeats and the snapshot worker. No-op when
    /// already connected.
    pub async fn connect(&self) -> SyncResult<()> {
        if self.connected.swap(true, Ordering::SeqCst) {
            debug!("realtime service already connected");
            return Ok(());
        }

        for transport in self.transports() {
            if let Err(e) = transport.start().await {
                self.connected.store(false, Ordering::SeqCst);
                self.stop_transports().await;
                return Err(e);
            }
        }

        self.ensure_snapshot_worker().await;

        info!(mode = ?self.config.transport.mode, "realtime service connected");
        Ok(())
    }

    /// Stop everything `connect` started and drop every client. No-op when
    /// not connected. A later append restarts the snapshot worker.
    pub async fn disconnect(&self) -> SyncResult<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            debug!("realtime service already disconnected");
            return Ok(());
        }

        self.stop_transports().await;
        if let Some(worker) = self.worker.lock().await.take() {
            worker.stop().await;
        }
        info!("realtime service disconnected");
        Ok(())
    }

    /// Install the store's snapshot trigger and spawn its worker unless one
    /// is already serving. Appends go through here so the snapshot cadence
    /// holds whether or not transports are up.
    async fn ensure_snapshot_worker(&self) {
        if self.store.snapshot_interval() == 0 {
            return;
        }
        let mut worker = self.worker.lock().await;
        if worker.as_ref().is_some_and(|w| !w.is_finished()) {
            return;
        }

        let capacity = self.store.config().snapshot_queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        if self.store.install_snapshot_trigger(tx).await {
            *worker = Some(self.snapshots.spawn_worker(rx, None));
        } else {
            warn!("snapshot trigger owned elsewhere, background snapshots disabled");
        }
    }

    async fn stop_transports(&self) {
        for transport in self.transports() {
            if let Err(e) = transport.shutdown().await {
                warn!(transport = %transport.kind(), error = %e, "transport shutdown failed");
            }
        }
    }

    /// Append a caller-versioned event and fan the stored envelope out.
    pub async fn broadcast_event(&self, event: Event) -> SyncResult<EventEnvelope> {
        self.ensure_snapshot_worker().await;
        let envelope = self.store.append_envelope(event).await?;
        self.fan_out(&envelope).await;
        Ok(envelope)
    }

    /// Append at the next free version and fan the envelope out.
    pub async fn publish(&self, actor_id: &str, event_type: &str, payload: Value) -> SyncResult<EventEnvelope> {
        self.ensure_snapshot_worker().await;
        let envelope = self.store.append_next(actor_id, event_type, payload).await?;
        self.fan_out(&envelope).await;
        Ok(envelope)
    }

    /// Deliver an envelope to every interested client and subscriber.
    /// Returns the number of remote clients reached.
    async fn fan_out(&self, envelope: &EventEnvelope) -> usize {
        let actor_id = envelope.event.actor_id.as_str();
        let message = ServerMessage::Broadcast(envelope.clone());
        let filter = |info: &ClientInfo| info.accepts(actor_id);

        let mut delivered = 0;
        for transport in self.transports() {
            if transport.is_running() {
                delivered += transport.broadcast_where(&message, &filter).await;
            }
        }
        let local = self.hub.publish(envelope);

        record_counter("transport.broadcasts.total", 1);
        debug!(
            actor_id,
            version = envelope.event.version,
            delivered,
            local,
            "envelope fanned out"
        );
        delivered
    }

    pub async fn sync_actor(&self, actor_id: &str) -> SyncResult<ActorSync> {
        self.replay.sync_actor(actor_id).await
    }

    /// Page of events after `known_version`; the configured page size applies
    /// when `max_events` is not given.
    pub async fn incremental_sync(
        &self,
        actor_id: &str,
        known_version: u64,
        max_events: Option<usize>,
    ) -> SyncResult<IncrementalSync> {
        let max_events = max_events.unwrap_or_else(|| self.replay.default_page_size());
        self.replay.incremental_sync(actor_id, known_version, max_events).await
    }

    /// Compact an actor's snapshots down to the configured retention.
    pub async fn compact(&self, actor_id: &str) -> SyncResult<CompactionReport> {
        self.snapshots
            .compact_snapshots(actor_id, self.config.replay.keep_snapshots)
            .await
    }

    pub fn subscribe_channel(&self, request: SubscriptionRequest) -> ChannelSubscription {
        debug!(channel_id = %request.channel_id, actor_id = ?request.actor_id, "channel subscription opened");
        self.hub.subscribe(request)
    }

    /// Scope a connected remote client to an actor. A request without an
    /// actor leaves the client receiving everything.
    pub fn subscribe_client(&self, client_id: &str, request: &SubscriptionRequest) -> SyncResult<()> {
        let registry = self.registry_of(client_id)?;
        if let Some(actor_id) = &request.actor_id {
            registry.subscribe(client_id, actor_id)?;
            debug!(client_id, channel_id = %request.channel_id, %actor_id, "client subscribed");
        }
        Ok(())
    }

    pub fn unsubscribe_client(&self, client_id: &str, request: &SubscriptionRequest) -> SyncResult<bool> {
        let registry = self.registry_of(client_id)?;
        match &request.actor_id {
            Some(actor_id) => registry.unsubscribe(client_id, actor_id),
            None => Ok(false),
        }
    }

    fn registry_of(&self, client_id: &str) -> SyncResult<&Arc<ConnectionRegistry>> {
        self.socket
            .iter()
            .map(|s| s.registry())
            .chain(self.stream.iter().map(|s| s.registry()))
            .find(|registry| registry.contains(client_id))
            .ok_or_else(|| SyncError::ClientNotFound(client_id.to_string()))
    }

    pub async fn connection_info(&self) -> Vec<ConnectionInfo> {
        let mut info = Vec::new();
        for transport in self.transports() {
            info.push(transport.connection_info().await);
        }
        info
    }

    pub fn router(self: &Arc<Self>) -> Router {
        super::api::build_router(Arc::clone(self))
    }
}

impl Drop for RealtimeService {
    fn drop(&mut self) {
        // The worker holds the store, and the store holds the worker's
        // channel, so it would never see the channel close on its own.
        if let Some(worker) = self.worker.get_mut().take() {
            worker.abort();
        }
    }
}
