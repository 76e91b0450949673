/*
    error.rs - Error types for the sync engine

    One taxonomy shared by the event store, replay, CRDT and transport layers:
    - Log I/O failures (retryable by the caller)
    - Precondition and integrity violations
    - Transport-level failures
*/

use thiserror::Error;

/// Errors that can occur anywhere in the sync engine
#[derive(Debug, Error)]
pub enum SyncError {
    /// The event log rejected or could not complete an append
    #[error("Append failed for actor {actor_id}: {reason}")]
    AppendFailed { actor_id: String, reason: String },

    /// The event log could not answer a read
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Another writer already took this version
    #[error("Version conflict for actor {actor_id}: expected version {expected}, got {actual}")]
    VersionConflict {
        actor_id: String,
        expected: u64,
        actual: u64,
    },

    /// Snapshot requested for an actor with no events
    #[error("No events to snapshot for actor {0}")]
    NoEventsForSnapshot(String),

    /// Snapshot fold or persist failed
    #[error("Snapshot creation failed for actor {actor_id}: {source}")]
    SnapshotCreationFailed {
        actor_id: String,
        #[source]
        source: Box<SyncError>,
    },

    /// Replay could not complete
    #[error("Event replay failed for actor {actor_id}: {source}")]
    EventReplayFailed {
        actor_id: String,
        #[source]
        source: Box<SyncError>,
    },

    /// Stored checksum does not match recomputed checksum
    #[error("Checksum mismatch for {context}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        context: String,
        expected: String,
        actual: String,
    },

    /// No connection registered under this client id
    #[error("Client not found: {0}")]
    ClientNotFound(String),

    /// Stream client could not open the event stream
    #[error("SSE connect failed: {0}")]
    SseConnectFailed(String),

    /// Generic transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Malformed or out-of-range request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type for sync engine operations
pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    /// Whether a caller may retry the same operation and expect a different outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::AppendFailed { .. }
                | SyncError::QueryFailed(_)
                | SyncError::VersionConflict { .. }
                | SyncError::SseConnectFailed(_)
                | SyncError::Transport(_)
        )
    }

    pub(crate) fn snapshot_failed(actor_id: &str, source: SyncError) -> Self {
        SyncError::SnapshotCreationFailed {
            actor_id: actor_id.to_string(),
            source: Box::new(source),
        }
    }

    pub(crate) fn replay_failed(actor_id: &str, source: SyncError) -> Self {
        SyncError::EventReplayFailed {
            actor_id: actor_id.to_string(),
            source: Box::new(source),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Transport(err.to_string())
    }
}
