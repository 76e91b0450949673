//! CRDT reconciliation of optimistic client state
//!
//! Vector clocks decide whether one copy causally supersedes the other;
//! only truly concurrent copies go through a merge function.

pub mod merge;
pub mod state_manager;
pub mod vector_clock;

#[cfg(test)]
mod tests;

pub use merge::{LastWriteWinsMerge, MergeFn, ShallowMerge, TIMESTAMP_FIELD};
pub use state_manager::{ClockOrdering, CrdtState, CrdtStateManager};
pub use vector_clock::{ReplicaId, VectorClock};
