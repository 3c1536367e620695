//! Entity CRDT implementation.
//!
//! An entity is a record whose fields are singleton or collection CRDTs
//! over primitive values. Operations target one field at a time and are
//! causally ordered by a single entity-level version vector, so edits to
//! different fields by the same actor stay totally ordered.

use crate::collection::CollectionData;
use crate::singleton::SingletonData;
use crate::{
    Actor, CrdtChange, CrdtModel, CrdtResult, MergeEffect, VersionVector, VersionedValue,
};
use arcs_common::{PropertyValue, Referenceable, ReferenceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The particle-facing rendering of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEntity {
    /// The entity's stable id.
    pub id: ReferenceId,
    /// Singleton fields; `None` means present but unset.
    pub singletons: BTreeMap<String, Option<PropertyValue>>,
    /// Collection fields, values in unique-id order.
    pub collections: BTreeMap<String, Vec<PropertyValue>>,
}

impl RawEntity {
    /// Create an entity with no fields.
    pub fn new(id: ReferenceId) -> Self {
        Self {
            id,
            singletons: BTreeMap::new(),
            collections: BTreeMap::new(),
        }
    }

    /// Builder-style singleton field assignment.
    pub fn with_singleton(mut self, field: &str, value: PropertyValue) -> Self {
        self.singletons.insert(field.to_string(), Some(value));
        self
    }

    /// Builder-style collection field assignment.
    pub fn with_collection(mut self, field: &str, values: Vec<PropertyValue>) -> Self {
        self.collections.insert(field.to_string(), values);
        self
    }
}

impl Referenceable for RawEntity {
    fn unique_id(&self) -> String {
        self.id.0.clone()
    }
}

/// Replica state of an entity CRDT.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityData {
    /// Singleton fields by name.
    pub singletons: BTreeMap<String, SingletonData<PropertyValue>>,
    /// Collection fields by name.
    pub collections: BTreeMap<String, CollectionData<PropertyValue>>,
    /// Entity-level version vector covering writes to every field.
    pub version: VersionVector,
}

impl EntityData {
    /// Build entity state from a particle-facing entity, stamping every
    /// field with the given write clock.
    pub fn from_raw(raw: &RawEntity, clock: &VersionVector) -> Self {
        let mut singletons = BTreeMap::new();
        for (field, value) in &raw.singletons {
            let mut data = SingletonData::default();
            data.version = clock.clone();
            if let Some(value) = value {
                data.values.insert(
                    value.unique_id(),
                    VersionedValue {
                        value: value.clone(),
                        clock: clock.clone(),
                    },
                );
            }
            singletons.insert(field.clone(), data);
        }

        let mut collections = BTreeMap::new();
        for (field, values) in &raw.collections {
            let mut data = CollectionData::default();
            data.version = clock.clone();
            for value in values {
                data.values.insert(
                    value.unique_id(),
                    VersionedValue {
                        value: value.clone(),
                        clock: clock.clone(),
                    },
                );
            }
            collections.insert(field.clone(), data);
        }

        Self {
            singletons,
            collections,
            version: clock.clone(),
        }
    }

    /// Project this state onto a particle-facing entity with the given id.
    pub fn raw_view(&self, id: ReferenceId) -> RawEntity {
        let singletons = self
            .singletons
            .iter()
            .map(|(field, data)| (field.clone(), data.winner().map(|v| v.value.clone())))
            .collect();
        let collections = self
            .collections
            .iter()
            .map(|(field, data)| {
                let values = data.values.values().map(|v| v.value.clone()).collect();
                (field.clone(), values)
            })
            .collect();
        RawEntity {
            id,
            singletons,
            collections,
        }
    }

    /// True when no field has ever been written.
    pub fn is_pristine(&self) -> bool {
        self.version.is_empty()
    }

    fn merged(&self, other: &Self) -> Self {
        let mut merged = EntityData {
            singletons: BTreeMap::new(),
            collections: BTreeMap::new(),
            version: self.version.merged_with(&other.version),
        };

        let empty_singleton = SingletonData::default();
        for field in self.singletons.keys().chain(other.singletons.keys()) {
            if merged.singletons.contains_key(field) {
                continue;
            }
            let ours = self.singletons.get(field).unwrap_or(&empty_singleton);
            let theirs = other.singletons.get(field).unwrap_or(&empty_singleton);
            merged.singletons.insert(field.clone(), ours.merged(theirs));
        }

        let empty_collection = CollectionData::default();
        for field in self.collections.keys().chain(other.collections.keys()) {
            if merged.collections.contains_key(field) {
                continue;
            }
            let ours = self.collections.get(field).unwrap_or(&empty_collection);
            let theirs = other.collections.get(field).unwrap_or(&empty_collection);
            merged
                .collections
                .insert(field.clone(), ours.merged(theirs));
        }

        merged
    }
}

/// Operations that can be applied to an entity. Each targets one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityOperation {
    /// Overwrite a singleton field.
    SetField {
        field: String,
        value: PropertyValue,
        actor: Actor,
        clock: VersionVector,
    },
    /// Clear a singleton field.
    ClearField {
        field: String,
        actor: Actor,
        clock: VersionVector,
    },
    /// Add a value to a collection field.
    AddToField {
        field: String,
        value: PropertyValue,
        actor: Actor,
        clock: VersionVector,
    },
    /// Remove a value from a collection field.
    RemoveFromField {
        field: String,
        value: PropertyValue,
        actor: Actor,
        clock: VersionVector,
    },
}

impl EntityOperation {
    /// The actor that produced this operation.
    pub fn actor(&self) -> &Actor {
        match self {
            EntityOperation::SetField { actor, .. } => actor,
            EntityOperation::ClearField { actor, .. } => actor,
            EntityOperation::AddToField { actor, .. } => actor,
            EntityOperation::RemoveFromField { actor, .. } => actor,
        }
    }

    /// The clock stamped on this operation.
    pub fn clock(&self) -> &VersionVector {
        match self {
            EntityOperation::SetField { clock, .. } => clock,
            EntityOperation::ClearField { clock, .. } => clock,
            EntityOperation::AddToField { clock, .. } => clock,
            EntityOperation::RemoveFromField { clock, .. } => clock,
        }
    }
}

/// An entity replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrdtEntity {
    id: ReferenceId,
    model: EntityData,
}

impl CrdtEntity {
    /// Create a new empty entity replica for the given id.
    pub fn new(id: ReferenceId) -> Self {
        Self {
            id,
            model: EntityData::default(),
        }
    }

    /// Create an entity replica from existing state.
    pub fn from_data(id: ReferenceId, data: EntityData) -> Self {
        Self { id, model: data }
    }

    /// The id of the entity this replica describes.
    pub fn id(&self) -> &ReferenceId {
        &self.id
    }

    /// Set a singleton field as the given actor.
    pub fn set_field(&mut self, field: &str, value: PropertyValue, actor: &Actor) -> bool {
        let clock = self.model.version.incremented(actor);
        self.apply_operation(&EntityOperation::SetField {
            field: field.to_string(),
            value,
            actor: actor.clone(),
            clock,
        })
    }

    /// Add to a collection field as the given actor.
    pub fn add_to_field(&mut self, field: &str, value: PropertyValue, actor: &Actor) -> bool {
        let clock = self.model.version.incremented(actor);
        self.apply_operation(&EntityOperation::AddToField {
            field: field.to_string(),
            value,
            actor: actor.clone(),
            clock,
        })
    }
}

impl CrdtModel for CrdtEntity {
    type Data = EntityData;
    type Operation = EntityOperation;
    type View = RawEntity;

    fn merge(&mut self, other: EntityData) -> CrdtResult<MergeEffect<EntityData, EntityOperation>> {
        let merged = self.model.merged(&other);
        self.model = merged.clone();
        Ok(MergeEffect {
            model_change: CrdtChange::Model(merged.clone()),
            other_change: CrdtChange::Model(merged),
        })
    }

    fn apply_operation(&mut self, op: &EntityOperation) -> bool {
        let actor = op.actor();
        let clock = op.clock();
        let current = self.model.version.get(actor);

        let applied = match op {
            EntityOperation::SetField { field, value, .. } => {
                if clock.get(actor) != current + 1 {
                    return false;
                }
                match self.model.singletons.get_mut(field) {
                    Some(data) => {
                        data.set_with_clock(value.clone(), clock);
                        true
                    }
                    // Fields appear on first write; the schema gate runs
                    // upstream of the CRDT.
                    None => {
                        let mut data = SingletonData::default();
                        data.set_with_clock(value.clone(), clock);
                        self.model.singletons.insert(field.clone(), data);
                        true
                    }
                }
            }
            EntityOperation::ClearField { field, .. } => {
                if clock.get(actor) != current {
                    return false;
                }
                match self.model.singletons.get_mut(field) {
                    Some(data) => {
                        data.clear_with_clock(clock);
                        true
                    }
                    None => false,
                }
            }
            EntityOperation::AddToField { field, value, .. } => {
                if clock.get(actor) != current + 1 {
                    return false;
                }
                let data = self.model.collections.entry(field.clone()).or_default();
                data.insert_with_clock(value.clone(), clock);
                true
            }
            EntityOperation::RemoveFromField { field, value, .. } => {
                if clock.get(actor) != current {
                    return false;
                }
                match self.model.collections.get_mut(field) {
                    Some(data) => data.remove_if_observed(&value.unique_id(), clock),
                    None => false,
                }
            }
        };

        if applied {
            self.model.version.merge(clock);
        }
        applied
    }

    fn data(&self) -> EntityData {
        self.model.clone()
    }

    fn into_data(self) -> EntityData {
        self.model
    }

    fn particle_view(&self) -> RawEntity {
        self.model.raw_view(self.id.clone())
    }

    fn value(&self) -> serde_json::Value {
        let view = self.particle_view();
        serde_json::json!({
            "id": view.id.as_str(),
            "singletons": view
                .singletons
                .iter()
                .map(|(k, v)| (k.clone(), v.as_ref().map(|p| p.to_json())))
                .collect::<BTreeMap<_, _>>(),
            "collections": view
                .collections
                .iter()
                .map(|(k, vs)| (k.clone(), vs.iter().map(|p| p.to_json()).collect::<Vec<_>>()))
                .collect::<BTreeMap<_, _>>(),
            "version": self.model.version.to_string(),
        })
    }
}
