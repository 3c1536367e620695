//! Singleton CRDT implementation.
//!
//! At rest a singleton holds zero or one causally-maximal value. Divergent
//! concurrent writes are all retained until causality catches up, and the
//! particle-visible value is chosen deterministically from the survivors so
//! every replica reports the same winner.

use crate::{
    Actor, CrdtChange, CrdtModel, CrdtResult, MergeEffect, VersionVector, VersionedValue,
};
use arcs_common::Referenceable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Replica state of a singleton.
///
/// Shaped like a collection so that concurrent writes can coexist; the
/// invariant is that every element's clock is concurrent with every other
/// element's clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "T: Clone + Serialize + for<'a> Deserialize<'a>")]
pub struct SingletonData<T> {
    /// Surviving values keyed by unique id.
    pub values: BTreeMap<String, VersionedValue<T>>,
    /// Version vector covering every observed write.
    pub version: VersionVector,
}

impl<T> Default for SingletonData<T> {
    fn default() -> Self {
        Self {
            values: BTreeMap::new(),
            version: VersionVector::new(),
        }
    }
}

impl<T: Referenceable> SingletonData<T> {
    /// Replace every value the clock has observed with the new value and
    /// fold the clock into the version. Concurrent survivors are kept.
    pub(crate) fn set_with_clock(&mut self, value: T, clock: &VersionVector) {
        self.values
            .retain(|_, existing| !clock.dominates_or_equal(&existing.clock));
        self.values.insert(
            value.unique_id(),
            VersionedValue {
                value,
                clock: clock.clone(),
            },
        );
        self.version.merge(clock);
    }

    /// Drop every value the clock has observed.
    pub(crate) fn clear_with_clock(&mut self, clock: &VersionVector) {
        self.values
            .retain(|_, existing| !clock.dominates_or_equal(&existing.clock));
    }

    /// Merge two replica states; identical in shape to collection merge.
    pub(crate) fn merged(&self, other: &Self) -> Self {
        let mut merged = SingletonData {
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

    /// The deterministic winner among surviving values: the element with
    /// the greatest (clock total-events, unique id) pair.
    pub(crate) fn winner(&self) -> Option<&VersionedValue<T>> {
        self.values
            .iter()
            .max_by_key(|(id, v)| (v.clock.total_events(), id.clone()))
            .map(|(_, v)| v)
    }
}

/// Operations that can be applied to a singleton.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "T: Clone + Serialize + for<'a> Deserialize<'a>")]
pub enum SingletonOperation<T> {
    /// Overwrite the value; the clock is the acting actor's next write.
    Set {
        value: T,
        actor: Actor,
        clock: VersionVector,
    },
    /// Clear the value; the clock is the actor's current view.
    Clear { actor: Actor, clock: VersionVector },
}

/// A singleton replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "T: Clone + Serialize + for<'a> Deserialize<'a>")]
pub struct CrdtSingleton<T> {
    model: SingletonData<T>,
}

impl<T> Default for CrdtSingleton<T> {
    fn default() -> Self {
        Self {
            model: SingletonData::default(),
        }
    }
}

impl<T> CrdtSingleton<T>
where
    T: Referenceable + PartialEq + Serialize + for<'a> Deserialize<'a>,
{
    /// Create a new empty singleton.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a singleton from existing replica state.
    pub fn from_data(data: SingletonData<T>) -> Self {
        Self { model: data }
    }

    /// Set the value as the given actor.
    pub fn set(&mut self, value: T, actor: &Actor) -> bool {
        let clock = self.model.version.incremented(actor);
        self.apply_operation(&SingletonOperation::Set {
            value,
            actor: actor.clone(),
            clock,
        })
    }

    /// Clear the value as the given actor.
    pub fn clear(&mut self, actor: &Actor) -> bool {
        let clock = self.model.version.clone();
        self.apply_operation(&SingletonOperation::Clear {
            actor: actor.clone(),
            clock,
        })
    }
}

impl<T> CrdtModel for CrdtSingleton<T>
where
    T: Referenceable + PartialEq + Serialize + for<'a> Deserialize<'a>,
{
    type Data = SingletonData<T>;
    type Operation = SingletonOperation<T>;
    type View = Option<T>;

    fn merge(
        &mut self,
        other: SingletonData<T>,
    ) -> CrdtResult<MergeEffect<SingletonData<T>, SingletonOperation<T>>> {
        let merged = self.model.merged(&other);
        self.model = merged.clone();
        Ok(MergeEffect {
            model_change: CrdtChange::Model(merged.clone()),
            other_change: CrdtChange::Model(merged),
        })
    }

    fn apply_operation(&mut self, op: &SingletonOperation<T>) -> bool {
        match op {
            SingletonOperation::Set {
                value,
                actor,
                clock,
            } => {
                let expected = self.model.version.get(actor) + 1;
                if clock.get(actor) != expected {
                    return false;
                }
                self.model.set_with_clock(value.clone(), clock);
                true
            }
            SingletonOperation::Clear { actor, clock } => {
                if clock.get(actor) != self.model.version.get(actor) {
                    return false;
                }
                self.model.clear_with_clock(clock);
                true
            }
        }
    }

    fn data(&self) -> SingletonData<T> {
        self.model.clone()
    }

    fn into_data(self) -> SingletonData<T> {
        self.model
    }

    fn particle_view(&self) -> Option<T> {
        self.model.winner().map(|v| v.value.clone())
    }

    fn value(&self) -> serde_json::Value {
        serde_json::json!({
            "candidates": self.model.values.keys().collect::<Vec<_>>(),
            "version": self.model.version.to_string(),
        })
    }
}
