//! Wire messages for both transports
//!
//! Socket frames are JSON `{"type": ..., "payload": ...}`. Stream frames
//! carry the same payload in `data:` with the type as the SSE event name
//! (`broadcast` travels as `event`).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{ClientId, TransportKind};
use crate::error::{SyncError, SyncResult};
use crate::event_store::{now_millis, EventEnvelope};
use crate::replay::{ActorSync, IncrementalSync};

/// Server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    Connection(ConnectionHello),
    Broadcast(EventEnvelope),
    SyncResponse(ActorSync),
    IncrementalSyncResponse(IncrementalSync),
    Presence(PresenceUpdate),
    Heartbeat(Heartbeat),
    Pong(Heartbeat),
    Error(ErrorPayload),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionHello {
    pub client_id: ClientId,
    pub timestamp: u64,
    pub transport: TransportKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub client_id: ClientId,
    pub status: PresenceStatus,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub timestamp: u64,
}

impl Heartbeat {
    pub fn now() -> Self {
        Heartbeat { timestamp: now_millis() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

impl ServerMessage {
    pub fn hello(client_id: &str, transport: TransportKind) -> Self {
        ServerMessage::Connection(ConnectionHello {
            client_id: client_id.to_string(),
            timestamp: now_millis(),
            transport,
        })
    }

    pub fn presence(client_id: &str, status: PresenceStatus) -> Self {
        ServerMessage::Presence(PresenceUpdate {
            client_id: client_id.to_string(),
            status,
            timestamp: now_millis(),
        })
    }

    pub fn heartbeat() -> Self {
        ServerMessage::Heartbeat(Heartbeat::now())
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorPayload { message: message.into() })
    }

    /// Type tag as written to the socket.
    pub fn type_name(&self) -> &'static str {
        match self {
            ServerMessage::Connection(_) => "connection",
            ServerMessage::Broadcast(_) => "broadcast",
            ServerMessage::SyncResponse(_) => "sync_response",
            ServerMessage::IncrementalSyncResponse(_) => "incremental_sync_response",
            ServerMessage::Presence(_) => "presence",
            ServerMessage::Heartbeat(_) => "heartbeat",
            ServerMessage::Pong(_) => "pong",
            ServerMessage::Error(_) => "error",
        }
    }

    /// SSE event name.
    pub fn stream_event_name(&self) -> &'static str {
        match self {
            ServerMessage::Broadcast(_) => "event",
            other => other.type_name(),
        }
    }

    /// Actor the message concerns, if any. Used for subscription scoping.
    pub fn actor_id(&self) -> Option<&str> {
        match self {
            ServerMessage::Broadcast(envelope) => Some(&envelope.event.actor_id),
            ServerMessage::SyncResponse(sync) => Some(&sync.actor_id),
            ServerMessage::IncrementalSyncResponse(sync) => Some(&sync.actor_id),
            _ => None,
        }
    }

    pub fn payload_json(&self) -> SyncResult<String> {
        let value = serde_json::to_value(self)?;
        let payload = value.get("payload").cloned().unwrap_or(Value::Null);
        Ok(serde_json::to_string(&payload)?)
    }

    pub fn to_socket_text(&self) -> SyncResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Rebuild a message from an SSE `event:` name and `data:` body.
    pub fn from_stream_frame(event: &str, data: &str) -> SyncResult<Self> {
        let type_name = if event == "event" { "broadcast" } else { event };
        let payload: Value = serde_json::from_str(data)?;
        serde_json::from_value(json!({ "type": type_name, "payload": payload }))
            .map_err(|e| SyncError::Serialization(format!("{event} frame: {e}")))
    }
}

/// Client to server (socket only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    SyncRequest(ActorRef),
    IncrementalSyncRequest(IncrementalSyncRequest),
    Subscribe(SubscriptionRequest),
    Unsubscribe(SubscriptionRequest),
    Ping,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorRef {
    pub actor_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementalSyncRequest {
    pub actor_id: String,
    #[serde(default)]
    pub known_version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_events: Option<usize>,
}

/// Interest in a channel, optionally narrowed to one actor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
}

impl SubscriptionRequest {
    pub fn new(channel_id: impl Into<String>, actor_id: Option<String>) -> Self {
        SubscriptionRequest {
            channel_id: channel_id.into(),
            actor_id,
        }
    }
}
