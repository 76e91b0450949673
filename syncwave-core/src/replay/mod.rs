//! Replay and snapshotting of actor state
//!
//! Reducers fold events into state, `SnapshotManager` persists and
//! compacts folds, and `OptimizedReplayManager` serves sync requests from
//! the cheapest available starting point.

pub mod optimized;
pub mod reducer;
pub mod snapshot_manager;

pub use optimized::{ActorSync, IncrementalSync, OptimizedReplayManager, ReplayVerification};
pub use reducer::{fold, FnReducer, JsonMergeReducer, Reducer};
pub use snapshot_manager::{CompactionReport, ReplayResult, SnapshotManager, SnapshotWorker};
