//! Version vector implementation for tracking causality between replicas.
//!
//! Version vectors let the CRDT models determine the causal ordering of
//! writes across replicas, which is what makes conflict-free merging
//! possible: two writes are comparable exactly when one replica had seen
//! the other's write before producing its own.

use crate::{Actor, CrdtError, CrdtResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// A version vector mapping each actor to the count of writes observed from
/// it. A missing actor is equivalent to a count of zero.
///
/// The partial order is pointwise: `u <= v` iff every actor's count in `u`
/// is at most its count in `v`. Vectors where neither side dominates are
/// concurrent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionVector {
    /// Map from actor to that actor's write count.
    clocks: BTreeMap<Actor, u64>,
}

impl VersionVector {
    /// Create a new empty version vector.
    pub fn new() -> Self {
        Self {
            clocks: BTreeMap::new(),
        }
    }

    /// Create a version vector with an initial count for the given actor.
    pub fn with_actor(actor: Actor, count: u64) -> Self {
        let mut clocks = BTreeMap::new();
        clocks.insert(actor, count);
        Self { clocks }
    }

    /// Get the current count for a specific actor.
    pub fn get(&self, actor: &Actor) -> u64 {
        self.clocks.get(actor).copied().unwrap_or(0)
    }

    /// Set the count for a specific actor.
    pub fn set(&mut self, actor: Actor, count: u64) {
        if count == 0 {
            self.clocks.remove(&actor);
        } else {
            self.clocks.insert(actor, count);
        }
    }

    /// Increment the count for the given actor.
    pub fn increment(&mut self, actor: &Actor) {
        let current = self.get(actor);
        self.clocks.insert(actor.clone(), current + 1);
    }

    /// Return a copy of this vector with the given actor's count
    /// incremented. This is the clock an actor stamps on its next write.
    pub fn incremented(&self, actor: &Actor) -> Self {
        let mut next = self.clone();
        next.increment(actor);
        next
    }

    /// Update this vector with another by taking the pointwise maximum.
    pub fn merge(&mut self, other: &VersionVector) {
        for (actor, &count) in &other.clocks {
            let current = self.get(actor);
            if count > current {
                self.clocks.insert(actor.clone(), count);
            }
        }
    }

    /// Return the pointwise maximum of this vector and another.
    pub fn merged_with(&self, other: &VersionVector) -> Self {
        let mut merged = self.clone();
        merged.merge(other);
        merged
    }

    /// Compare this vector with another to determine causal ordering.
    ///
    /// Returns:
    /// - `Some(Ordering::Less)` if this vector happened-before the other
    /// - `Some(Ordering::Greater)` if the other happened-before this one
    /// - `Some(Ordering::Equal)` if they are equal
    /// - `None` if they are concurrent (no causal relationship)
    pub fn compare(&self, other: &VersionVector) -> Option<Ordering> {
        let all_actors: BTreeSet<_> = self.clocks.keys().chain(other.clocks.keys()).collect();

        let mut has_strict_less = false;
        let mut has_strict_greater = false;

        for actor in &all_actors {
            match self.get(actor).cmp(&other.get(actor)) {
                Ordering::Less => has_strict_less = true,
                Ordering::Greater => has_strict_greater = true,
                Ordering::Equal => {}
            }
        }

        match (has_strict_less, has_strict_greater) {
            (false, false) => Some(Ordering::Equal),
            (true, false) => Some(Ordering::Less),
            (false, true) => Some(Ordering::Greater),
            (true, true) => None, // Concurrent
        }
    }

    /// Check if this vector happened-before another.
    pub fn happened_before(&self, other: &VersionVector) -> bool {
        matches!(self.compare(other), Some(Ordering::Less))
    }

    /// Check if this vector is concurrent with another.
    pub fn is_concurrent(&self, other: &VersionVector) -> bool {
        self.compare(other).is_none()
    }

    /// Check if this vector strictly dominates another: at least equal in
    /// every dimension and strictly ahead in at least one.
    pub fn dominates(&self, other: &VersionVector) -> bool {
        matches!(self.compare(other), Some(Ordering::Greater))
    }

    /// Check if this vector is at least equal to another in every
    /// dimension. This is the predicate observed-remove semantics use: a
    /// removal applies only to writes it has fully observed.
    pub fn dominates_or_equal(&self, other: &VersionVector) -> bool {
        other.clocks.iter().all(|(actor, &count)| self.get(actor) >= count)
    }

    /// Get all actors tracked by this vector.
    pub fn actors(&self) -> Vec<Actor> {
        self.clocks.keys().cloned().collect()
    }

    /// Iterate over (actor, count) entries in actor order.
    pub fn iter(&self) -> impl Iterator<Item = (&Actor, &u64)> {
        self.clocks.iter()
    }

    /// Get the total number of writes across all actors.
    pub fn total_events(&self) -> u64 {
        self.clocks.values().sum()
    }

    /// True when no actor has produced a write.
    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty()
    }

    /// Create a compact representation for driver payloads.
    pub fn to_compact_bytes(&self) -> CrdtResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| {
            CrdtError::SerializationError(format!("Version vector serialization failed: {e}"))
        })
    }

    /// Restore from a compact representation.
    pub fn from_compact_bytes(bytes: &[u8]) -> CrdtResult<Self> {
        bincode::deserialize(bytes).map_err(|e| {
            CrdtError::SerializationError(format!("Version vector deserialization failed: {e}"))
        })
    }

    /// Get a deterministic hash of this vector for debugging.
    pub fn hash(&self) -> String {
        use sha2::{Digest, Sha256};

        // BTreeMap iteration is already sorted, so the hash is stable.
        let mut hasher = Sha256::new();
        for (actor, count) in &self.clocks {
            hasher.update(actor.as_str().as_bytes());
            hasher.update(count.to_le_bytes());
        }

        hex::encode(hasher.finalize())
    }
}

impl FromIterator<(Actor, u64)> for VersionVector {
    fn from_iter<I: IntoIterator<Item = (Actor, u64)>>(iter: I) -> Self {
        let mut vv = VersionVector::new();
        for (actor, count) in iter {
            vv.set(actor, count);
        }
        vv
    }
}

impl std::fmt::Display for VersionVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        let mut first = true;
        for (actor, count) in &self.clocks {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{actor}: {count}")?;
            first = false;
        }
        write!(f, "}}")
    }
}
