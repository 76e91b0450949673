//! Server-Sent Events transport
//!
//! Server to client only. Each connection is an SSE response whose body
//! drains the connection's outbound queue. When the body is dropped (client
//! went away, or a write failed) the connection is unregistered and an
//! `offline` presence is broadcast.

use std::collections::BTreeSet;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use axum::response::sse::{Event as SseEvent, Sse};
use futures::{Stream, StreamExt};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use super::message::{PresenceStatus, ServerMessage};
use super::registry::ConnectionRegistry;
use super::ticker::{Ticker, TickerHandle};
use super::{ClientFilter, ClientId, ClientInfo, ConnectionInfo, Transport, TransportKind};
use crate::config::TransportConfig;
use crate::error::{SyncError, SyncResult};

/// Body of one SSE connection
pub type EventStream = Pin<Box<dyn Stream<Item = Result<SseEvent, Infallible>> + Send>>;

pub struct StreamService {
    registry: Arc<ConnectionRegistry>,
    heartbeat_interval: Duration,
    running: AtomicBool,
    heartbeat: Mutex<Option<TickerHandle>>,
}

impl StreamService {
    pub fn new(config: &TransportConfig) -> Self {
        StreamService {
            registry: Arc::new(ConnectionRegistry::new(TransportKind::Sse, config.outbound_queue_capacity)),
            heartbeat_interval: config.heartbeat_interval,
            running: AtomicBool::new(false),
            heartbeat: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Register a connection and build its SSE response.
    pub fn open(&self, actor_filter: BTreeSet<String>) -> SyncResult<Sse<EventStream>> {
        if !self.is_running() {
            return Err(SyncError::Transport("sse transport is not running".to_string()));
        }

        let (client_id, rx) = self.registry.register(actor_filter);
        self.registry
            .send_to(&client_id, ServerMessage::hello(&client_id, TransportKind::Sse))?;
        announce(&self.registry, &client_id, PresenceStatus::Online);

        let guard = DisconnectGuard {
            registry: self.registry.clone(),
            client_id,
        };
        let stream = ReceiverStream::new(rx).map(move |message| {
            let _ = &guard;
            Ok(to_sse_event(&message))
        });
        Ok(Sse::new(Box::pin(stream) as EventStream))
    }
}

fn announce(registry: &ConnectionRegistry, client_id: &str, status: PresenceStatus) {
    let message = ServerMessage::presence(client_id, status);
    registry.broadcast_where(&message, &|info: &ClientInfo| info.client_id != client_id);
}

/// Frame a message as `event: <type>` / `data: <payload json>`.
pub fn to_sse_event(message: &ServerMessage) -> SseEvent {
    let event = SseEvent::default().event(message.stream_event_name());
    let event = match message {
        ServerMessage::Broadcast(envelope) => event.id(envelope.sequence_id.clone()),
        _ => event,
    };
    match message.payload_json() {
        Ok(data) => event.data(data),
        Err(e) => {
            warn!(error = %e, "failed to encode stream payload");
            SseEvent::default().event("error").data(r#"{"message":"encoding failed"}"#)
        }
    }
}

struct DisconnectGuard {
    registry: Arc<ConnectionRegistry>,
    client_id: ClientId,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if self.registry.unregister(&self.client_id) {
            announce(&self.registry, &self.client_id, PresenceStatus::Offline);
        }
    }
}

#[async_trait]
impl Transport for StreamService {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn start(&self) -> SyncResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let registry = self.registry.clone();
        let ticker = Ticker::spawn("sse-heartbeat", self.heartbeat_interval, move || {
            let registry = registry.clone();
            async move {
                registry.broadcast(&ServerMessage::heartbeat());
            }
        });
        *self.heartbeat.lock().unwrap_or_else(PoisonError::into_inner) = Some(ticker);
        info!(transport = "sse", "transport started");
        Ok(())
    }

    async fn shutdown(&self) -> SyncResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(mut ticker) = self.heartbeat.lock().unwrap_or_else(PoisonError::into_inner).take() {
            ticker.cancel();
        }
        let dropped = self.registry.clear();
        info!(transport = "sse", dropped, "transport stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn broadcast(&self, message: &ServerMessage) -> usize {
        self.registry.broadcast(message)
    }

    async fn broadcast_where(&self, message: &ServerMessage, filter: ClientFilter<'_>) -> usize {
        self.registry.broadcast_where(message, filter)
    }

    async fn send_to(&self, client_id: &str, message: ServerMessage) -> SyncResult<()> {
        self.registry.send_to(client_id, message)
    }

    async fn connection_info(&self) -> ConnectionInfo {
        self.registry.connection_info()
    }
}
