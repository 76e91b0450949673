/*
    transport - Real-time delivery to remote clients

    Two interchangeable services share one contract (`Transport`):
    - SocketService: bidirectional WebSocket, JSON `{type, payload}` frames
    - StreamService: server-to-client Server-Sent Events

    Each service owns its own ConnectionRegistry. Writes go through bounded
    per-connection queues; a connection whose queue is closed or full is
    removed without affecting delivery to the others.

    ┌────────────────┐  broadcast   ┌────────────────────┐  mpsc  ┌────────────┐
    │ RealtimeService│─────────────►│ ConnectionRegistry │───────►│ writer task│──► socket
    └────────────────┘              └────────────────────┘        └────────────┘
                                             ▲
                                     Ticker (heartbeat)
*/

pub mod client;
pub mod message;
pub mod reconnect;
pub mod registry;
pub mod socket;
pub mod stream;
pub mod ticker;

#[cfg(test)]
mod tests;

pub use client::{ClientEvent, SseDecoder, SseFrame, StreamClient, StreamClientConfig, StreamClientHandle};
pub use message::{
    ActorRef, ClientMessage, ConnectionHello, ErrorPayload, Heartbeat, IncrementalSyncRequest,
    PresenceStatus, PresenceUpdate, ServerMessage, SubscriptionRequest,
};
pub use reconnect::ReconnectPolicy;
pub use registry::ConnectionRegistry;
pub use socket::SocketService;
pub use stream::StreamService;
pub use ticker::{Ticker, TickerHandle};

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SyncResult;

/// Opaque connection identifier (UUID v4 string)
pub type ClientId = String;

/// Concrete transport a connection arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    WebSocket,
    Sse,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::WebSocket => "websocket",
            TransportKind::Sse => "sse",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which transports a service runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    WebSocket,
    Sse,
    #[default]
    Both,
}

impl TransportMode {
    pub fn includes(&self, kind: TransportKind) -> bool {
        matches!(
            (self, kind),
            (TransportMode::Both, _)
                | (TransportMode::WebSocket, TransportKind::WebSocket)
                | (TransportMode::Sse, TransportKind::Sse)
        )
    }
}

impl FromStr for TransportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "websocket" | "ws" => Ok(TransportMode::WebSocket),
            "sse" => Ok(TransportMode::Sse),
            "both" => Ok(TransportMode::Both),
            other => Err(format!("unknown transport mode '{other}' (expected websocket, sse or both)")),
        }
    }
}

/// Public view of one registered connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub client_id: ClientId,
    pub connected_at: u64,

    /// Actors this client wants events for. Empty means all.
    pub actor_filter: BTreeSet<String>,
}

impl ClientInfo {
    pub fn accepts(&self, actor_id: &str) -> bool {
        self.actor_filter.is_empty() || self.actor_filter.contains(actor_id)
    }
}

/// Snapshot of a transport's connections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub transport: TransportKind,
    pub active_connections: usize,
    pub clients: Vec<ClientInfo>,
}

/// Predicate used by `Transport::broadcast_where`
pub type ClientFilter<'a> = &'a (dyn Fn(&ClientInfo) -> bool + Send + Sync);

/// Contract shared by the socket and stream services
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Begin accepting connections and start the heartbeat.
    async fn start(&self) -> SyncResult<()>;

    /// Stop the heartbeat and drop every connection.
    async fn shutdown(&self) -> SyncResult<()>;

    fn is_running(&self) -> bool;

    /// Deliver to every connection. Returns how many accepted the message.
    async fn broadcast(&self, message: &ServerMessage) -> usize;

    async fn broadcast_where(&self, message: &ServerMessage, filter: ClientFilter<'_>) -> usize;

    async fn send_to(&self, client_id: &str, message: ServerMessage) -> SyncResult<()>;

    async fn connection_info(&self) -> ConnectionInfo;
}
