pub mod config;
pub mod crdt;
pub mod error;
pub mod event_log;
pub mod event_store;
pub mod logging;
pub mod metrics;
pub mod replay;
pub mod service;
pub mod shutdown;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transport;

pub use config::Config;
pub use crdt::{CrdtState, CrdtStateManager, MergeFn, VectorClock};
pub use error::{SyncError, SyncResult};
pub use event_log::{EventLog, MemoryEventLog};
pub use event_store::{ActorSnapshot, Event, EventEnvelope, EventStore};
pub use logging::{init_logging, LogLevel};
pub use replay::{OptimizedReplayManager, Reducer, SnapshotManager};
pub use service::{RealtimeServer, RealtimeService};
pub use shutdown::ShutdownCoordinator;
pub use transport::{ClientMessage, ServerMessage, StreamClient, Transport, TransportMode};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        // Ensure the main exports are accessible
        let _ = LogLevel::Info;
        let _ = TransportMode::default();
        let _ = VectorClock::new();
    }
}
