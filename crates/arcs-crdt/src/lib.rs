//! # Arcs CRDT Crate
//!
//! This crate provides the Conflict-free Replicated Data Types (CRDTs) that
//! back Arcs handles and stores: a causal counter, an observed-remove
//! collection, a singleton, and a per-field entity record. All of them track
//! causality with version vectors so that replicas held by different
//! particles and stores converge without coordination.

use arcs_common::CommonError;
use serde::{Deserialize, Serialize};

pub mod collection;
pub mod count;
pub mod entity;
pub mod singleton;
pub mod version_vector;

pub use collection::{CollectionData, CollectionOperation, CrdtCollection};
pub use count::{CountData, CountOperation, CrdtCount};
pub use entity::{CrdtEntity, EntityData, EntityOperation, RawEntity};
pub use singleton::{CrdtSingleton, SingletonData, SingletonOperation};
pub use version_vector::VersionVector;

/// Unique identifier for a replica producing CRDT operations.
/// This should be stable for the lifetime of the producing store or handle
/// and unique across all replicas of a model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Actor(pub String);

impl Actor {
    /// Create a new Actor from a string.
    pub fn new(id: String) -> Self {
        Actor(id)
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Actor {
    fn from(s: String) -> Self {
        Actor(s)
    }
}

impl From<&str> for Actor {
    fn from(s: &str) -> Self {
        Actor(s.to_string())
    }
}

/// A value stored inside a set-like CRDT together with the version vector
/// that was current when it was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedValue<T> {
    /// The stored value.
    pub value: T,
    /// Version vector of the write that produced this value.
    pub clock: VersionVector,
}

/// One side of a two-sided merge delta.
///
/// Counters can express their delta as a short list of operations; set-like
/// models fall back to shipping the whole merged model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CrdtChange<Data, Op> {
    /// An ordered list of operations that lifts the receiver to the merged
    /// state when applied in sequence.
    Operations(Vec<Op>),
    /// The full merged model; the receiver should adopt it wholesale.
    Model(Data),
}

impl<Data, Op> CrdtChange<Data, Op> {
    /// True when applying this change would be a no-op.
    pub fn is_empty(&self) -> bool {
        match self {
            CrdtChange::Operations(ops) => ops.is_empty(),
            CrdtChange::Model(_) => false,
        }
    }
}

/// The pair of deltas emitted by a merge.
///
/// `model_change` lifts the old local model to the merged state and
/// `other_change` lifts the old remote model to the merged state. After both
/// sides apply their respective deltas the two replicas are equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeEffect<Data, Op> {
    /// Delta for the local replica.
    pub model_change: CrdtChange<Data, Op>,
    /// Delta for the remote replica the merge was computed against.
    pub other_change: CrdtChange<Data, Op>,
}

/// Core capability implemented by every CRDT model in this crate.
///
/// Mutation happens through explicit operations; replication happens through
/// `merge`, which reconciles a remote replica's data and reports two-sided
/// deltas. Models grow monotonically per actor and never retry internally:
/// an out-of-order operation is reported back to the caller as `false` and
/// an irreconcilable merge is an error.
pub trait CrdtModel: Clone {
    /// Serializable replica state.
    type Data: Clone + PartialEq + Serialize + for<'de> Deserialize<'de>;
    /// Operations that can be applied to this model.
    type Operation: Clone + Serialize;
    /// The particle-visible rendering of the model.
    type View;

    /// Merge a remote replica's data into this model.
    ///
    /// Returns the two-sided delta on success. Divergent replicas (same
    /// causal position, different state) cannot be reconciled and produce
    /// `CrdtError::Divergence`.
    fn merge(&mut self, other: Self::Data) -> CrdtResult<MergeEffect<Self::Data, Self::Operation>>;

    /// Apply a single operation.
    ///
    /// Returns `false` when the operation does not connect to the current
    /// version vector (out of order or duplicate); the model is unchanged
    /// and the caller is expected to re-request a sync.
    fn apply_operation(&mut self, op: &Self::Operation) -> bool;

    /// A snapshot of the current replica state.
    fn data(&self) -> Self::Data;

    /// Consume the model, yielding its state.
    fn into_data(self) -> Self::Data;

    /// The particle-visible value of the model.
    fn particle_view(&self) -> Self::View;

    /// Render the current state as JSON for diagnostics.
    fn value(&self) -> serde_json::Value;
}

/// Errors that can occur during CRDT operations.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum CrdtError {
    #[error("Merge cannot reconcile divergent replicas: {0}")]
    Divergence(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Common error: {0}")]
    Common(#[from] CommonError),
}

/// Result type for CRDT operations.
pub type CrdtResult<T> = Result<T, CrdtError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_creation() {
        let actor = Actor::new("replica-1".to_string());
        assert_eq!(actor.as_str(), "replica-1");
        assert_eq!(actor.to_string(), "replica-1");
        assert_eq!(Actor::from("replica-1"), actor);
    }

    #[test]
    fn test_change_emptiness() {
        let change: CrdtChange<CountData, CountOperation> = CrdtChange::Operations(vec![]);
        assert!(change.is_empty());
        let change: CrdtChange<CountData, CountOperation> =
            CrdtChange::Model(CountData::default());
        assert!(!change.is_empty());
    }
}
