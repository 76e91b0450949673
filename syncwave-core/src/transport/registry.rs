/*
    registry.rs - Connections of one transport service

    Every connection owns a bounded outbound queue drained by its writer
    task. Delivery never blocks: `try_send` either queues the message or the
    connection is considered dead (queue closed) or too slow (queue full)
    and is removed. Removal of one connection never aborts delivery to the
    rest.
*/

use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use metrics::gauge;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{ClientFilter, ClientId, ClientInfo, ConnectionInfo, ServerMessage, TransportKind};
use crate::error::{SyncError, SyncResult};
use crate::event_store::{now_millis, EventEnvelope};
use crate::metrics::record_counter;

struct Connection {
    info: ClientInfo,
    outbound: mpsc::Sender<ServerMessage>,
}

/// Registered connections keyed by client id
pub struct ConnectionRegistry {
    kind: TransportKind,
    queue_capacity: usize,
    connections: RwLock<HashMap<ClientId, Connection>>,
}

impl ConnectionRegistry {
    pub fn new(kind: TransportKind, queue_capacity: usize) -> Self {
        ConnectionRegistry {
            kind,
            queue_capacity: queue_capacity.max(1),
            connections: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ClientId, Connection>> {
        self.connections.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ClientId, Connection>> {
        self.connections.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_gauge(&self, active: usize) {
        gauge!("transport.connections.active", "transport" => self.kind.as_str()).set(active as f64);
    }

    /// Register a new connection. The receiver feeds its writer task.
    pub fn register(&self, actor_filter: BTreeSet<String>) -> (ClientId, mpsc::Receiver<ServerMessage>) {
        let client_id = uuid::Uuid::new_v4().to_string();
        let (outbound, rx) = mpsc::channel(self.queue_capacity);
        let info = ClientInfo {
            client_id: client_id.clone(),
            connected_at: now_millis(),
            actor_filter,
        };

        let active = {
            let mut connections = self.write();
            connections.insert(client_id.clone(), Connection { info, outbound });
            connections.len()
        };
        self.update_gauge(active);
        info!(transport = %self.kind, client_id = %client_id, active, "client connected");
        (client_id, rx)
    }

    pub fn unregister(&self, client_id: &str) -> bool {
        let (removed, active) = {
            let mut connections = self.write();
            let removed = connections.remove(client_id).is_some();
            (removed, connections.len())
        };
        if removed {
            self.update_gauge(active);
            info!(transport = %self.kind, client_id, active, "client disconnected");
        }
        removed
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.read().contains_key(client_id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn client_info(&self, client_id: &str) -> Option<ClientInfo> {
        self.read().get(client_id).map(|c| c.info.clone())
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        let connections = self.read();
        let mut clients: Vec<ClientInfo> = connections.values().map(|c| c.info.clone()).collect();
        clients.sort_by_key(|c| c.connected_at);
        ConnectionInfo {
            transport: self.kind,
            active_connections: clients.len(),
            clients,
        }
    }

    /// Narrow a client to an additional actor.
    pub fn subscribe(&self, client_id: &str, actor_id: &str) -> SyncResult<()> {
        let mut connections = self.write();
        let connection = connections
            .get_mut(client_id)
            .ok_or_else(|| SyncError::ClientNotFound(client_id.to_string()))?;
        connection.info.actor_filter.insert(actor_id.to_string());
        debug!(client_id, actor_id, "client subscribed to actor");
        Ok(())
    }

    /// Remove one actor from a client's filter. Returns whether it was present.
    pub fn unsubscribe(&self, client_id: &str, actor_id: &str) -> SyncResult<bool> {
        let mut connections = self.write();
        let connection = connections
            .get_mut(client_id)
            .ok_or_else(|| SyncError::ClientNotFound(client_id.to_string()))?;
        Ok(connection.info.actor_filter.remove(actor_id))
    }

    pub fn send_to(&self, client_id: &str, message: ServerMessage) -> SyncResult<()> {
        let result = {
            let connections = self.read();
            let connection = connections
                .get(client_id)
                .ok_or_else(|| SyncError::ClientNotFound(client_id.to_string()))?;
            connection.outbound.try_send(message)
        };

        match result {
            Ok(()) => {
                record_counter("transport.messages.sent", 1);
                Ok(())
            }
            Err(e) => {
                self.drop_failed(&[client_id.to_string()]);
                Err(SyncError::Transport(format!("client {client_id} dropped: {e}")))
            }
        }
    }

    pub fn broadcast(&self, message: &ServerMessage) -> usize {
        self.broadcast_where(message, &|_: &ClientInfo| true)
    }

    /// Deliver an event to every client whose actor filter accepts it.
    pub fn broadcast_event(&self, envelope: &EventEnvelope) -> usize {
        let actor_id = envelope.event.actor_id.clone();
        let message = ServerMessage::Broadcast(envelope.clone());
        self.broadcast_where(&message, &move |info: &ClientInfo| info.accepts(&actor_id))
    }

    pub fn broadcast_where(&self, message: &ServerMessage, filter: ClientFilter<'_>) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();
        {
            let connections = self.read();
            for (client_id, connection) in connections.iter() {
                if !filter(&connection.info) {
                    continue;
                }
                match connection.outbound.try_send(message.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(transport = %self.kind, client_id = %client_id, "outbound queue full, dropping client");
                        failed.push(client_id.clone());
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        debug!(transport = %self.kind, client_id = %client_id, "outbound queue closed");
                        failed.push(client_id.clone());
                    }
                }
            }
        }

        if !failed.is_empty() {
            self.drop_failed(&failed);
        }
        record_counter("transport.messages.sent", delivered as u64);
        delivered
    }

    fn drop_failed(&self, client_ids: &[ClientId]) {
        let active = {
            let mut connections = self.write();
            for client_id in client_ids {
                connections.remove(client_id);
            }
            connections.len()
        };
        record_counter("transport.connections.dropped", client_ids.len() as u64);
        self.update_gauge(active);
        warn!(transport = %self.kind, dropped = client_ids.len(), active, "removed failed connections");
    }

    /// Drop every connection. Writers see their queues close and exit.
    pub fn clear(&self) -> usize {
        let cleared = {
            let mut connections = self.write();
            let cleared = connections.len();
            connections.clear();
            cleared
        };
        self.update_gauge(0);
        if cleared > 0 {
            info!(transport = %self.kind, cleared, "connection registry cleared");
        }
        cleared
    }
}
