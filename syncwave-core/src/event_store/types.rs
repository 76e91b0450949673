/*
    types.rs - Event, envelope and snapshot records

    Wire and storage shapes for everything the event store persists.
    All JSON uses camelCase field names.
*/

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::checksum::{event_checksum, snapshot_checksum};
use crate::error::{SyncError, SyncResult};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A single state change for one actor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique event id (UUID v4)
    pub id: String,

    /// Application-defined event type tag
    #[serde(rename = "type")]
    pub event_type: String,

    /// Arbitrary JSON payload
    pub payload: Value,

    /// Actor this event belongs to
    pub actor_id: String,

    /// Per-actor version, starting at 1, no gaps
    pub version: u64,

    /// Creation time in milliseconds since epoch
    pub timestamp: u64,
}

impl Event {
    pub fn new(
        actor_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: Value,
        version: u64,
    ) -> Self {
        Event {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            payload,
            actor_id: actor_id.into(),
            version,
            timestamp: now_millis(),
        }
    }
}

/// An event as stored in and read back from the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event: Event,

    /// Cross-actor ordering hint. Not a correctness guarantee.
    pub sequence_id: String,

    /// SHA-256 over the event's canonical form
    pub checksum: String,
}

impl EventEnvelope {
    /// Wrap an event, assigning a sequence hint and computing its checksum.
    pub fn seal(event: Event) -> Self {
        let sequence_id = format!(
            "{}-{}-{:08x}",
            event.actor_id,
            now_millis(),
            rand::random::<u32>()
        );
        let checksum = event_checksum(&event);
        EventEnvelope { event, sequence_id, checksum }
    }

    /// Recompute the checksum and compare with the stored one.
    pub fn verify(&self) -> SyncResult<()> {
        let actual = event_checksum(&self.event);
        if actual != self.checksum {
            return Err(SyncError::ChecksumMismatch {
                context: format!("event {}@{}", self.event.actor_id, self.event.version),
                expected: self.checksum.clone(),
                actual,
            });
        }
        Ok(())
    }
}

/// A persisted fold of an actor's events up to `version`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorSnapshot {
    pub actor_id: String,
    pub state: Value,
    pub version: u64,
    pub last_event_id: String,
    pub timestamp: u64,
    pub checksum: String,
}

impl ActorSnapshot {
    pub fn new(actor_id: impl Into<String>, state: Value, version: u64, last_event_id: impl Into<String>) -> Self {
        let actor_id = actor_id.into();
        let last_event_id = last_event_id.into();
        let checksum = snapshot_checksum(&actor_id, &state, version, &last_event_id);
        ActorSnapshot {
            actor_id,
            state,
            version,
            last_event_id,
            timestamp: now_millis(),
            checksum,
        }
    }

    pub fn verify(&self) -> SyncResult<()> {
        let actual = snapshot_checksum(&self.actor_id, &self.state, self.version, &self.last_event_id);
        if actual != self.checksum {
            return Err(SyncError::ChecksumMismatch {
                context: format!("snapshot {}@{}", self.actor_id, self.version),
                expected: self.checksum.clone(),
                actual,
            });
        }
        Ok(())
    }
}
