/*
    event_store - Versioned, checksummed event persistence

    Wraps an `EventLog` backend and owns:
    - Sequence hint assignment and checksum sealing
    - Integrity verification on every read
    - Snapshot cadence (`version % snapshot_interval == 0`)
*/

pub mod checksum;
pub mod store;
pub mod types;

pub use store::{EventStore, SnapshotRequest};
pub use types::{now_millis, ActorSnapshot, Event, EventEnvelope};
