//! Observed-remove collection CRDT implementation.
//!
//! Every element carries the version vector of the write that added it.
//! Removals only apply to writes they have causally observed, so an add that
//! was concurrent with a remove survives the merge. This is the model
//! backing collection-typed handles and the reference container of a
//! reference-mode store.

use crate::{
    Actor, CrdtChange, CrdtModel, CrdtResult, MergeEffect, VersionVector, VersionedValue,
};
use arcs_common::Referenceable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Replica state of an observed-remove collection.
///
/// Elements are keyed by their unique id; the top-level version is the
/// pointwise maximum of every write this replica has observed, including
/// writes whose elements have since been removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "T: Clone + Serialize + for<'a> Deserialize<'a>")]
pub struct CollectionData<T> {
    /// Map from element unique id to the element and its write clock.
    pub values: BTreeMap<String, VersionedValue<T>>,
    /// Version vector covering every observed write.
    pub version: VersionVector,
}

impl<T> Default for CollectionData<T> {
    fn default() -> Self {
        Self {
            values: BTreeMap::new(),
            version: VersionVector::new(),
        }
    }
}

impl<T: Referenceable> CollectionData<T> {
    /// Insert a value at the given clock, merging with any prior same-id
    /// element's clock, and fold the clock into the top-level version.
    ///
    /// Callers are responsible for having validated the clock against
    /// whichever version applies (collection-level or entity-level).
    pub(crate) fn insert_with_clock(&mut self, value: T, clock: &VersionVector) {
        let id = value.unique_id();
        let merged_clock = match self.values.get(&id) {
            Some(existing) => existing.clock.merged_with(clock),
            None => clock.clone(),
        };
        self.values.insert(
            id,
            VersionedValue {
                value,
                clock: merged_clock,
            },
        );
        self.version.merge(clock);
    }

    /// Remove the element with the given id if the clock dominates its
    /// write clock. Returns false when the element is missing or has writes
    /// the remover has not observed.
    pub(crate) fn remove_if_observed(&mut self, id: &str, clock: &VersionVector) -> bool {
        match self.values.get(id) {
            Some(existing) if clock.dominates_or_equal(&existing.clock) => {
                self.values.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Merge two replica states into the converged state.
    ///
    /// Elements present on both sides survive with merged clocks. An
    /// element present on one side only survives unless the other side's
    /// version dominates its clock, which means the other side observed the
    /// write and removed the element.
    pub(crate) fn merged(&self, other: &Self) -> Self {
        let mut merged = CollectionData {
            values: BTreeMap::new(),
            version: self.version.merged_with(&other.version),
        };

        for (id, theirs) in &other.values {
            if let Some(ours) = self.values.get(id) {
                merged.values.insert(
                    id.clone(),
                    VersionedValue {
                        value: theirs.value.clone(),
                        clock: ours.clock.merged_with(&theirs.clock),
                    },
                );
            } else if !self.version.dominates_or_equal(&theirs.clock) {
                merged.values.insert(id.clone(), theirs.clone());
            }
        }
        for (id, ours) in &self.values {
            if !other.values.contains_key(id) && !other.version.dominates_or_equal(&ours.clock) {
                merged.values.insert(id.clone(), ours.clone());
            }
        }

        merged
    }
}

/// Operations that can be applied to a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "T: Clone + Serialize + for<'a> Deserialize<'a>")]
pub enum CollectionOperation<T> {
    /// Add a value; the clock is the acting actor's next write.
    Add {
        value: T,
        actor: Actor,
        clock: VersionVector,
    },
    /// Remove a value; the clock is the actor's current view and must
    /// dominate the element's write clock.
    Remove {
        value: T,
        actor: Actor,
        clock: VersionVector,
    },
}

/// An observed-remove collection replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "T: Clone + Serialize + for<'a> Deserialize<'a>")]
pub struct CrdtCollection<T> {
    model: CollectionData<T>,
}

impl<T> Default for CrdtCollection<T> {
    fn default() -> Self {
        Self {
            model: CollectionData::default(),
        }
    }
}

impl<T> CrdtCollection<T>
where
    T: Referenceable + PartialEq + Serialize + for<'a> Deserialize<'a>,
{
    /// Create a new empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a collection from existing replica state.
    pub fn from_data(data: CollectionData<T>) -> Self {
        Self { model: data }
    }

    /// Check if an element with the given unique id is present.
    pub fn contains(&self, id: &str) -> bool {
        self.model.values.contains_key(id)
    }

    /// Number of elements currently present.
    pub fn len(&self) -> usize {
        self.model.values.len()
    }

    /// True when no elements are present.
    pub fn is_empty(&self) -> bool {
        self.model.values.is_empty()
    }

    /// Add a value as the given actor, stamping it with the actor's next
    /// clock relative to this replica.
    pub fn add(&mut self, value: T, actor: &Actor) -> bool {
        let clock = self.model.version.incremented(actor);
        self.apply_operation(&CollectionOperation::Add {
            value,
            actor: actor.clone(),
            clock,
        })
    }

    /// Remove a value as the given actor, using the actor's current view.
    pub fn remove(&mut self, value: T, actor: &Actor) -> bool {
        let clock = self.model.version.clone();
        self.apply_operation(&CollectionOperation::Remove {
            value,
            actor: actor.clone(),
            clock,
        })
    }
}

impl<T> CrdtModel for CrdtCollection<T>
where
    T: Referenceable + PartialEq + Serialize + for<'a> Deserialize<'a>,
{
    type Data = CollectionData<T>;
    type Operation = CollectionOperation<T>;
    type View = Vec<T>;

    /// Merge another replica's state. Set-like models ship the whole merged
    /// model to both sides rather than computing operation lists.
    fn merge(
        &mut self,
        other: CollectionData<T>,
    ) -> CrdtResult<MergeEffect<CollectionData<T>, CollectionOperation<T>>> {
        let merged = self.model.merged(&other);
        self.model = merged.clone();
        Ok(MergeEffect {
            model_change: CrdtChange::Model(merged.clone()),
            other_change: CrdtChange::Model(merged),
        })
    }

    fn apply_operation(&mut self, op: &CollectionOperation<T>) -> bool {
        match op {
            CollectionOperation::Add {
                value,
                actor,
                clock,
            } => {
                // An add must be the immediately next write for its actor.
                let expected = self.model.version.get(actor) + 1;
                if clock.get(actor) != expected {
                    return false;
                }
                self.model.insert_with_clock(value.clone(), clock);
                true
            }
            CollectionOperation::Remove {
                value,
                actor,
                clock,
            } => {
                // Removes do not advance the actor's counter.
                if clock.get(actor) != self.model.version.get(actor) {
                    return false;
                }
                self.model.remove_if_observed(&value.unique_id(), clock)
            }
        }
    }

    fn data(&self) -> CollectionData<T> {
        self.model.clone()
    }

    fn into_data(self) -> CollectionData<T> {
        self.model
    }

    /// Elements in unique-id order.
    fn particle_view(&self) -> Vec<T> {
        self.model.values.values().map(|v| v.value.clone()).collect()
    }

    fn value(&self) -> serde_json::Value {
        serde_json::json!({
            "size": self.len(),
            "ids": self.model.values.keys().collect::<Vec<_>>(),
            "version": self.model.version.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arcs_common::PropertyValue;

    fn me() -> Actor {
        Actor::from("me")
    }

    fn them() -> Actor {
        Actor::from("them")
    }

    fn text(s: &str) -> PropertyValue {
        PropertyValue::Text(s.to_string())
    }

    #[test]
    fn test_add_and_view() {
        let mut set = CrdtCollection::new();
        assert!(set.add(text("a"), &me()));
        assert!(set.add(text("b"), &me()));
        assert_eq!(set.particle_view(), vec![text("a"), text("b")]);
        assert_eq!(set.data().version.get(&me()), 2);
    }

    #[test]
    fn test_add_requires_next_clock() {
        let mut set = CrdtCollection::new();
        let stale = CollectionOperation::Add {
            value: text("a"),
            actor: me(),
            clock: VersionVector::with_actor(me(), 2),
        };
        assert!(!set.apply_operation(&stale));
        assert!(set.is_empty());
    }

    #[test]
    fn test_duplicate_add_rejected() {
        let mut set = CrdtCollection::new();
        let op = CollectionOperation::Add {
            value: text("a"),
            actor: me(),
            clock: VersionVector::with_actor(me(), 1),
        };
        assert!(set.apply_operation(&op));
        assert!(!set.apply_operation(&op));
    }

    #[test]
    fn test_observed_remove() {
        let mut set = CrdtCollection::new();
        set.add(text("a"), &me());
        assert!(set.remove(text("a"), &me()));
        assert!(set.is_empty());
        // The version still covers the removed write.
        assert_eq!(set.data().version.get(&me()), 1);
    }

    #[test]
    fn test_remove_needs_domination() {
        let mut set = CrdtCollection::new();
        set.add(text("a"), &me());

        // A remover that has not observed the add cannot remove it.
        let blind = CollectionOperation::Remove {
            value: text("a"),
            actor: them(),
            clock: VersionVector::new(),
        };
        assert!(!set.apply_operation(&blind));
        assert!(set.contains(&text("a").unique_id()));
    }

    #[test]
    fn test_merge_concurrent_add_and_remove() {
        // Replica a adds then both sync; replica b removes while a
        // concurrently adds another element.
        let mut a = CrdtCollection::new();
        a.add(text("x"), &me());
        let mut b = CrdtCollection::from_data(a.data());

        assert!(b.remove(text("x"), &them()));
        a.add(text("y"), &me());

        let effect = a.merge(b.data()).unwrap();
        match effect.other_change {
            CrdtChange::Model(data) => {
                b = CrdtCollection::from_data(data);
            }
            _ => panic!("collection merges ship models"),
        }

        // The remove of x was causally after its add, so it wins; the
        // concurrent add of y survives.
        assert_eq!(a.particle_view(), vec![text("y")]);
        assert_eq!(a.data(), b.data());
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut a = CrdtCollection::new();
        a.add(text("x"), &me());
        let snapshot = a.data();
        a.merge(snapshot.clone()).unwrap();
        assert_eq!(a.data(), snapshot);
    }

    #[test]
    fn test_merge_unseen_elements_survive() {
        let mut a = CrdtCollection::new();
        a.add(text("x"), &me());

        let mut b = CrdtCollection::new();
        b.add(text("y"), &them());

        a.merge(b.data()).unwrap();
        assert_eq!(a.particle_view(), vec![text("x"), text("y")]);
    }
}
