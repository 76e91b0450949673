//! WebSocket transport
//!
//! One reader loop and one writer task per connection. The writer drains
//! the connection's outbound queue; when the registry drops the queue the
//! writer closes the socket and the reader loop ends.
//!
//! Unparseable client frames get an `error` reply; the connection stays open.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use super::message::{ClientMessage, Heartbeat, PresenceStatus, ServerMessage};
use super::registry::ConnectionRegistry;
use super::ticker::{Ticker, TickerHandle};
use super::{ClientFilter, ClientInfo, ConnectionInfo, Transport, TransportKind};
use crate::config::TransportConfig;
use crate::error::{SyncError, SyncResult};
use crate::replay::OptimizedReplayManager;

pub struct SocketService {
    registry: Arc<ConnectionRegistry>,
    replay: Arc<OptimizedReplayManager>,
    heartbeat_interval: Duration,
    running: AtomicBool,
    heartbeat: Mutex<Option<TickerHandle>>,
}

impl SocketService {
    pub fn new(replay: Arc<OptimizedReplayManager>, config: &TransportConfig) -> Self {
        SocketService {
            registry: Arc::new(ConnectionRegistry::new(
                TransportKind::WebSocket,
                config.outbound_queue_capacity,
            )),
            replay,
            heartbeat_interval: config.heartbeat_interval,
            running: AtomicBool::new(false),
            heartbeat: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Complete a WebSocket upgrade, or refuse it while stopped.
    pub fn accept(self: &Arc<Self>, upgrade: WebSocketUpgrade, actor_filter: BTreeSet<String>) -> Response {
        if !self.is_running() {
            return (StatusCode::SERVICE_UNAVAILABLE, "websocket transport is not running").into_response();
        }
        let service = Arc::clone(self);
        upgrade.on_upgrade(move |socket| service.run_connection(socket, actor_filter))
    }

    async fn run_connection(self: Arc<Self>, socket: WebSocket, actor_filter: BTreeSet<String>) {
        let (client_id, mut outbound) = self.registry.register(actor_filter);
        let (mut sink, mut stream) = socket.split();

        let _ = self
            .registry
            .send_to(&client_id, ServerMessage::hello(&client_id, TransportKind::WebSocket));
        self.announce(&client_id, PresenceStatus::Online);

        let writer_id = client_id.clone();
        let writer = tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                let text = match message.to_socket_text() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(client_id = %writer_id, error = %e, "failed to encode message");
                        continue;
                    }
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    debug!(client_id = %writer_id, "socket write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => self.handle_client_message(&client_id, &text).await,
                Ok(Message::Binary(_)) => {
                    let _ = self
                        .registry
                        .send_to(&client_id, ServerMessage::error("binary frames are not supported"));
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(client_id = %client_id, error = %e, "socket read failed");
                    break;
                }
            }
            if !self.registry.contains(&client_id) {
                break;
            }
        }

        self.registry.unregister(&client_id);
        writer.abort();
        if self.is_running() {
            self.announce(&client_id, PresenceStatus::Offline);
        }
    }

    fn announce(&self, client_id: &str, status: PresenceStatus) {
        let message = ServerMessage::presence(client_id, status);
        self.registry
            .broadcast_where(&message, &|info: &ClientInfo| info.client_id != client_id);
    }

    /// Handle one text frame from a client. Replies go to that client only.
    pub async fn handle_client_message(&self, client_id: &str, text: &str) {
        let reply = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.dispatch(client_id, message).await,
            Err(e) => {
                debug!(client_id, error = %e, "unparseable client frame");
                Some(ServerMessage::error(format!("invalid message: {e}")))
            }
        };

        if let Some(reply) = reply {
            if let Err(e) = self.registry.send_to(client_id, reply) {
                debug!(client_id, error = %e, "reply not delivered");
            }
        }
    }

    async fn dispatch(&self, client_id: &str, message: ClientMessage) -> Option<ServerMessage> {
        match message {
            ClientMessage::SyncRequest(request) => Some(
                match self.replay.sync_actor(&request.actor_id).await {
                    Ok(sync) => ServerMessage::SyncResponse(sync),
                    Err(e) => error_reply(&request.actor_id, e),
                },
            ),
            ClientMessage::IncrementalSyncRequest(request) => {
                let max_events = request
                    .max_events
                    .unwrap_or_else(|| self.replay.default_page_size());
                Some(
                    match self
                        .replay
                        .incremental_sync(&request.actor_id, request.known_version, max_events)
                        .await
                    {
                        Ok(page) => ServerMessage::IncrementalSyncResponse(page),
                        Err(e) => error_reply(&request.actor_id, e),
                    },
                )
            }
            ClientMessage::Subscribe(request) => {
                let actor_id = request.actor_id?;
                match self.registry.subscribe(client_id, &actor_id) {
                    Ok(()) => {
                        debug!(client_id, channel_id = %request.channel_id, %actor_id, "socket subscription added");
                        None
                    }
                    Err(e) => Some(ServerMessage::error(e.to_string())),
                }
            }
            ClientMessage::Unsubscribe(request) => {
                let actor_id = request.actor_id?;
                match self.registry.unsubscribe(client_id, &actor_id) {
                    Ok(_) => None,
                    Err(e) => Some(ServerMessage::error(e.to_string())),
                }
            }
            ClientMessage::Ping => Some(ServerMessage::Pong(Heartbeat::now())),
        }
    }
}

fn error_reply(actor_id: &str, err: SyncError) -> ServerMessage {
    warn!(actor_id, error = %err, "sync request failed");
    ServerMessage::error(err.to_string())
}

#[async_trait]
impl Transport for SocketService {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    async fn start(&self) -> SyncResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let registry = self.registry.clone();
        let ticker = Ticker::spawn("socket-heartbeat", self.heartbeat_interval, move || {
            let registry = registry.clone();
            async move {
                registry.broadcast(&ServerMessage::heartbeat());
            }
        });
        *self.heartbeat.lock().unwrap_or_else(PoisonError::into_inner) = Some(ticker);
        info!(transport = "websocket", "transport started");
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
        info!(transport = "websocket", dropped, "transport stopped");
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
