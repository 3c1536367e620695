//! Causal counter CRDT implementation.
//!
//! Each actor owns a non-negative contribution; the particle-visible value
//! is the sum of all contributions. Unlike a plain grow-only counter, every
//! increment names the version interval it covers, so replicas can detect
//! gaps, reject duplicates, and emit exact two-sided deltas on merge.

use crate::{Actor, CrdtChange, CrdtError, CrdtModel, CrdtResult, MergeEffect};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Replica state of a causal counter.
///
/// Invariant: for every actor, `version[actor]` is at least the number of
/// increment operations observed from that actor, and `values[actor]` only
/// ever grows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountData {
    /// Per-actor contributions to the counter.
    pub values: BTreeMap<Actor, u64>,
    /// Per-actor version counts covering those contributions.
    pub version: BTreeMap<Actor, u64>,
}

impl CountData {
    /// Sum of all per-actor contributions.
    pub fn total(&self) -> u64 {
        self.values.values().sum()
    }
}

/// Operations that can be applied to a causal counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountOperation {
    /// Increment the actor's contribution by 1, moving its version from
    /// `from` to `from + 1`.
    Increment { actor: Actor, from: u64 },
    /// Increment the actor's contribution by `value`, moving its version
    /// from `from` to `to`.
    MultiIncrement {
        actor: Actor,
        from: u64,
        to: u64,
        value: u64,
    },
}

impl CountOperation {
    /// The actor this operation belongs to.
    pub fn actor(&self) -> &Actor {
        match self {
            CountOperation::Increment { actor, .. } => actor,
            CountOperation::MultiIncrement { actor, .. } => actor,
        }
    }
}

/// A causal counter replica.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrdtCount {
    model: CountData,
}

impl CrdtCount {
    /// Create a new empty counter.
    pub fn new() -> Self {
        Self {
            model: CountData::default(),
        }
    }

    /// Create a counter from existing replica state.
    pub fn from_data(data: CountData) -> Self {
        Self { model: data }
    }

    /// Increment the local contribution for `actor` by 1.
    ///
    /// Convenience wrapper that builds the operation against the current
    /// version and applies it.
    pub fn increment(&mut self, actor: &Actor) -> CrdtResult<()> {
        let from = self.model.version.get(actor).copied().unwrap_or(0);
        let op = CountOperation::Increment {
            actor: actor.clone(),
            from,
        };
        if self.apply_operation(&op) {
            Ok(())
        } else {
            Err(CrdtError::InvalidOperation(format!(
                "increment for {actor} does not connect to version {from}"
            )))
        }
    }

    /// Increment the local contribution for `actor` by `value`.
    pub fn multi_increment(&mut self, actor: &Actor, value: u64) -> CrdtResult<()> {
        if value == 0 {
            return Err(CrdtError::InvalidOperation(
                "increment value must be greater than 0".to_string(),
            ));
        }
        let from = self.model.version.get(actor).copied().unwrap_or(0);
        let op = CountOperation::MultiIncrement {
            actor: actor.clone(),
            from,
            to: from + 1,
            value,
        };
        if self.apply_operation(&op) {
            Ok(())
        } else {
            Err(CrdtError::InvalidOperation(format!(
                "multi-increment for {actor} does not connect to version {from}"
            )))
        }
    }

    fn apply(&mut self, actor: &Actor, from: u64, to: u64, value: u64) -> bool {
        let current = self.model.version.get(actor).copied().unwrap_or(0);
        if from != current || to <= from || value == 0 {
            return false;
        }
        let contribution = self.model.values.entry(actor.clone()).or_insert(0);
        *contribution += value;
        self.model.version.insert(actor.clone(), to);
        true
    }
}

impl CrdtModel for CrdtCount {
    type Data = CountData;
    type Operation = CountOperation;
    type View = u64;

    /// Merge another replica's state, emitting operation-list deltas.
    ///
    /// For each actor the per-actor (value, version) pairs are compared: a
    /// strictly larger value must carry a strictly larger version or the
    /// replicas have diverged. Actors known to only one side produce a
    /// `MultiIncrement` covering the whole `0..version` interval for the
    /// other side.
    fn merge(&mut self, other: CountData) -> CrdtResult<MergeEffect<CountData, CountOperation>> {
        let mut this_changes = Vec::new();
        let mut other_changes = Vec::new();

        for (actor, &other_value) in &other.values {
            let this_value = self.model.values.get(actor).copied().unwrap_or(0);
            let this_version = self.model.version.get(actor).copied().unwrap_or(0);
            let other_version = other.version.get(actor).copied().unwrap_or(0);

            if this_value > other_value {
                if this_version <= other_version {
                    return Err(CrdtError::Divergence(format!(
                        "{actor} has value {this_value} at version {this_version} here \
                         but value {other_value} at version {other_version} remotely"
                    )));
                }
                other_changes.push(CountOperation::MultiIncrement {
                    actor: actor.clone(),
                    from: other_version,
                    to: this_version,
                    value: this_value - other_value,
                });
            } else if other_value > this_value {
                if other_version <= this_version {
                    return Err(CrdtError::Divergence(format!(
                        "{actor} has value {other_value} at version {other_version} remotely \
                         but value {this_value} at version {this_version} here"
                    )));
                }
                this_changes.push(CountOperation::MultiIncrement {
                    actor: actor.clone(),
                    from: this_version,
                    to: other_version,
                    value: other_value - this_value,
                });
                self.model.values.insert(actor.clone(), other_value);
                self.model.version.insert(actor.clone(), other_version);
            }
            // Equal values carry no delta in either direction.
        }

        let local_only: BTreeSet<_> = self
            .model
            .values
            .keys()
            .filter(|actor| !other.values.contains_key(*actor))
            .cloned()
            .collect();
        for actor in local_only {
            let value = self.model.values[&actor];
            let version = self.model.version.get(&actor).copied().unwrap_or(0);
            other_changes.push(CountOperation::MultiIncrement {
                actor,
                from: 0,
                to: version,
                value,
            });
        }

        Ok(MergeEffect {
            model_change: CrdtChange::Operations(this_changes),
            other_change: CrdtChange::Operations(other_changes),
        })
    }

    fn apply_operation(&mut self, op: &CountOperation) -> bool {
        match op {
            CountOperation::Increment { actor, from } => self.apply(actor, *from, from + 1, 1),
            CountOperation::MultiIncrement {
                actor,
                from,
                to,
                value,
            } => self.apply(actor, *from, *to, *value),
        }
    }

    fn data(&self) -> CountData {
        self.model.clone()
    }

    fn into_data(self) -> CountData {
        self.model
    }

    /// The particle-visible value: the sum of all contributions.
    fn particle_view(&self) -> u64 {
        self.model.total()
    }

    fn value(&self) -> serde_json::Value {
        serde_json::json!({
            "total": self.model.total(),
            "contributions": self.model.values,
        })
    }
}
