/*
    event_log - Client interface to the durable append-only log

    The log is the single source of truth and the only resource that needs
    cross-instance coordination. It must provide:
    - Atomic per-actor append with an expected-version check
    - Per-actor ordered reads
    - Snapshot persistence keyed by (actor, version)

    `MemoryEventLog` implements the contract in-process.
*/

pub mod memory;

pub use memory::MemoryEventLog;

use async_trait::async_trait;
use thiserror::Error;

use crate::event_store::{ActorSnapshot, EventEnvelope};

/// Identifier the log assigns to a stored record
pub type LogRecordId = String;

/// Errors surfaced by a log backend
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LogError {
    /// The appended version was not `latest + 1`
    #[error("version conflict on {actor_id}: expected {expected}, got {actual}")]
    VersionConflict {
        actor_id: String,
        expected: u64,
        actual: u64,
    },

    /// Backend unreachable or failed
    #[error("log unavailable: {0}")]
    Unavailable(String),
}

/// Read filter for `EventLog::query`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub actor_id: String,

    /// Exclusive lower bound
    pub since_version: u64,

    /// Inclusive upper bound
    pub until_version: Option<u64>,

    pub event_type: Option<String>,

    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn for_actor(actor_id: impl Into<String>) -> Self {
        EventFilter {
            actor_id: actor_id.into(),
            ..Default::default()
        }
    }

    pub fn since(mut self, version: u64) -> Self {
        self.since_version = version;
        self
    }

    pub fn until(mut self, version: u64) -> Self {
        self.until_version = Some(version);
        self
    }

    pub fn of_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a stored envelope passes every bound except `limit`.
    pub fn matches(&self, envelope: &EventEnvelope) -> bool {
        let event = &envelope.event;
        event.actor_id == self.actor_id
            && event.version > self.since_version
            && self.until_version.map_or(true, |until| event.version <= until)
            && self
                .event_type
                .as_ref()
                .map_or(true, |t| &event.event_type == t)
    }
}

/// Durable, per-key-ordered append-only store
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append iff `envelope.event.version == latest_version + 1`.
    async fn append(&self, envelope: EventEnvelope) -> Result<LogRecordId, LogError>;

    /// Events matching the filter in ascending version order.
    async fn query(&self, filter: &EventFilter) -> Result<Vec<EventEnvelope>, LogError>;

    async fn get(&self, event_id: &str) -> Result<Option<EventEnvelope>, LogError>;

    /// Highest appended version, 0 for an unknown actor.
    async fn latest_version(&self, actor_id: &str) -> Result<u64, LogError>;

    /// Store a snapshot, replacing any existing one at the same version.
    async fn put_snapshot(&self, snapshot: ActorSnapshot) -> Result<(), LogError>;

    async fn latest_snapshot(&self, actor_id: &str) -> Result<Option<ActorSnapshot>, LogError>;

    /// All snapshots of an actor in ascending version order.
    async fn list_snapshots(&self, actor_id: &str) -> Result<Vec<ActorSnapshot>, LogError>;

    async fn delete_snapshot(&self, actor_id: &str, version: u64) -> Result<bool, LogError>;

    /// Drop events with version <= `up_to_version`. Backends that cannot
    /// delete report 0.
    async fn prune_events(&self, _actor_id: &str, _up_to_version: u64) -> Result<usize, LogError> {
        Ok(0)
    }
}
