//! Metrics for observability
//!
//! Everything goes through the `metrics` facade. Without an installed
//! recorder the macros are no-ops, so library code records unconditionally
//! and the binary decides whether to export.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::{Duration, Instant};

/// Register descriptions for every metric the engine emits
pub fn init_metrics() {
    // Event store
    describe_counter!("event_store.appends.total", "Events appended to the log");
    describe_counter!("event_store.appends.conflicts", "Appends rejected by a version race");
    describe_counter!("event_store.appends.failed", "Appends failed because the log was unavailable");
    describe_counter!("event_store.checksum.failures", "Envelopes or snapshots that failed verification");
    describe_histogram!("event_store.append.duration_ms", "Append latency in milliseconds");

    // Snapshots and replay
    describe_counter!("snapshot.created", "Snapshots persisted");
    describe_counter!("snapshot.failed", "Background snapshot attempts that failed");
    describe_counter!("snapshot.requests.dropped", "Snapshot requests dropped because the queue was full");
    describe_counter!("snapshot.compacted", "Snapshots removed by compaction");
    describe_counter!("replay.events.folded", "Events folded through a reducer");
    describe_counter!("replay.fallbacks", "Snapshot replays that fell back to a full replay");
    describe_histogram!("replay.duration_ms", "Replay duration in milliseconds");

    // CRDT
    describe_counter!("crdt.merges.fast_path", "Merges resolved by clock dominance");
    describe_counter!("crdt.merges.concurrent", "Merges that ran a merge function");

    // Transport
    describe_counter!("transport.broadcasts.total", "Envelopes fanned out to transports and subscribers");
    describe_counter!("transport.messages.sent", "Messages queued to connections");
    describe_counter!("transport.connections.dropped", "Connections removed after a failed write");
    describe_gauge!("transport.connections.active", "Currently registered connections");
}

pub fn record_counter(name: &'static str, value: u64) {
    counter!(name).increment(value);
}

pub fn record_gauge(name: &'static str, value: f64) {
    gauge!(name).set(value);
}

pub fn record_histogram(name: &'static str, value: f64) {
    histogram!(name).record(value);
}

/// Measures an operation and records it as a millisecond histogram
pub struct Timer {
    name: &'static str,
    start: Instant,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer, record, and return the measured duration
    pub fn stop(self) -> Duration {
        let duration = self.start.elapsed();
        histogram!(self.name).record(duration.as_secs_f64() * 1000.0);
        duration
    }
}
