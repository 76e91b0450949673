/*
    state_manager.rs - Reconciliation of divergent actor state copies

    Clients holding optimistic local state merge it with the server copy:
    - One clock dominates: that side is returned unchanged
    - Otherwise (including equal clocks): the merge function combines the
      data and the clocks are unioned
*/

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::merge::{MergeFn, ShallowMerge};
use super::vector_clock::VectorClock;
use crate::event_store::now_millis;
use crate::metrics::record_counter;

/// A derived, mergeable view of an actor's state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrdtState {
    pub actor_id: String,
    pub data: Value,
    pub vector_clock: VectorClock,
    pub last_modified: u64,
}

impl CrdtState {
    pub fn new(actor_id: impl Into<String>, data: Value) -> Self {
        CrdtState {
            actor_id: actor_id.into(),
            data,
            vector_clock: VectorClock::new(),
            last_modified: now_millis(),
        }
    }
}

/// Causal relation of a local clock to a remote one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockOrdering {
    Concurrent,
    LocalNewer,
    RemoteNewer,
}

pub struct CrdtStateManager {
    default_merge: Arc<dyn MergeFn>,
}

impl Default for CrdtStateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CrdtStateManager {
    /// Manager whose fallback merge is `ShallowMerge`.
    pub fn new() -> Self {
        CrdtStateManager {
            default_merge: Arc::new(ShallowMerge),
        }
    }

    pub fn with_default_merge(merge: Arc<dyn MergeFn>) -> Self {
        CrdtStateManager { default_merge: merge }
    }

    /// Equal clocks are `Concurrent`; a side is newer only if it strictly
    /// dominates.
    pub fn compare_clocks(&self, local: &VectorClock, remote: &VectorClock) -> ClockOrdering {
        if local.strictly_dominates(remote) {
            ClockOrdering::LocalNewer
        } else if remote.strictly_dominates(local) {
            ClockOrdering::RemoteNewer
        } else {
            ClockOrdering::Concurrent
        }
    }

    pub fn merge_states(&self, local: &CrdtState, remote: &CrdtState, merge_fn: Option<&dyn MergeFn>) -> CrdtState {
        match self.compare_clocks(&local.vector_clock, &remote.vector_clock) {
            ClockOrdering::LocalNewer => {
                record_counter("crdt.merges.fast_path", 1);
                local.clone()
            }
            ClockOrdering::RemoteNewer => {
                record_counter("crdt.merges.fast_path", 1);
                remote.clone()
            }
            ClockOrdering::Concurrent => {
                record_counter("crdt.merges.concurrent", 1);
                let clock = local.vector_clock.merged(&remote.vector_clock);
                let merge = merge_fn.unwrap_or(self.default_merge.as_ref());
                let data = merge.merge(&local.data, &remote.data, &clock);
                debug!(actor_id = %local.actor_id, replicas = clock.len(), "merged concurrent states");

                CrdtState {
                    actor_id: local.actor_id.clone(),
                    data,
                    vector_clock: clock,
                    last_modified: local.last_modified.max(remote.last_modified),
                }
            }
        }
    }

    /// Advance the local replica's counter ahead of a local change.
    pub fn tick(&self, state: &mut CrdtState, replica_id: &str) -> u64 {
        let counter = state.vector_clock.increment(replica_id);
        state.last_modified = now_millis().max(state.last_modified);
        counter
    }

    /// Apply a local change: tick, then shallow-merge `patch` into the data.
    pub fn local_update(&self, state: &CrdtState, replica_id: &str, patch: &Value) -> CrdtState {
        let mut next = state.clone();
        self.tick(&mut next, replica_id);
        next.data = ShallowMerge.merge(&state.data, patch, &next.vector_clock);
        next
    }
}
