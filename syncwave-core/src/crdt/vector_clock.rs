/*
    vector_clock.rs - Vector clock for causal ordering of replica updates

    Maps replica id -> counter. A clock dominates another when every entry
    is >= the other's (missing entries count as 0). Merging takes the
    element-wise maximum, so counters never decrease.
*/

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Replica identifier
pub type ReplicaId = String;

/// Vector clock for tracking causal order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    clock: BTreeMap<ReplicaId, u64>,
}

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the counter of one replica, returning the new value.
    pub fn increment(&mut self, replica_id: &str) -> u64 {
        let counter = self.clock.entry(replica_id.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    pub fn get(&self, replica_id: &str) -> u64 {
        self.clock.get(replica_id).copied().unwrap_or(0)
    }

    pub fn set(&mut self, replica_id: &str, counter: u64) {
        self.clock.insert(replica_id.to_string(), counter);
    }

    /// Merge in place (take maximum of each entry)
    pub fn merge(&mut self, other: &VectorClock) {
        for (replica_id, &counter) in &other.clock {
            let current = self.clock.entry(replica_id.clone()).or_insert(0);
            *current = (*current).max(counter);
        }
    }

    pub fn merged(&self, other: &VectorClock) -> VectorClock {
        let mut union = self.clone();
        union.merge(other);
        union
    }

    /// Every entry of self is >= the matching entry of other.
    pub fn dominates(&self, other: &VectorClock) -> bool {
        other
            .clock
            .iter()
            .all(|(replica_id, &counter)| self.get(replica_id) >= counter)
    }

    /// Dominates and differs in at least one entry.
    pub fn strictly_dominates(&self, other: &VectorClock) -> bool {
        self.dominates(other) && !other.dominates(self)
    }

    pub fn happened_before(&self, other: &VectorClock) -> bool {
        other.strictly_dominates(self)
    }

    pub fn replica_ids(&self) -> impl Iterator<Item = &str> {
        self.clock.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.clock.is_empty()
    }

    pub fn len(&self) -> usize {
        self.clock.len()
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for VectorClock {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        VectorClock {
            clock: iter.into_iter().map(|(id, c)| (id.into(), c)).collect(),
        }
    }
}
