//! The reference container of a reference-mode store.
//!
//! The container replica holds `Reference` values pointing into the backing
//! store. Handles may be collection- or singleton-typed, so the container
//! model is one enum over both CRDT shapes; a store never changes shape
//! after construction.

use crate::keys::StorageKey;
use arcs_common::{Referenceable, ReferenceId};
use arcs_crdt::{
    CollectionData, CollectionOperation, CrdtChange, CrdtCollection, CrdtError, CrdtModel,
    CrdtResult, CrdtSingleton, MergeEffect, SingletonData, SingletonOperation, VersionVector,
};
use serde::{Deserialize, Serialize};

/// A pointer from the container into the backing store.
///
/// The version is the write clock of the entity state the reference was
/// created against; a reader holding the reference can dereference it once
/// its backing replica has caught up to that clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub id: ReferenceId,
    pub storage_key: StorageKey,
    pub version: VersionVector,
}

impl Reference {
    pub fn new(id: ReferenceId, storage_key: StorageKey, version: VersionVector) -> Self {
        Self {
            id,
            storage_key,
            version,
        }
    }
}

impl Referenceable for Reference {
    fn unique_id(&self) -> String {
        self.id.0.clone()
    }
}

/// Replica state of a container, collection- or singleton-shaped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContainerData {
    Collection(CollectionData<Reference>),
    Singleton(SingletonData<Reference>),
}

impl ContainerData {
    /// The references present in this state, in unique-id order.
    pub fn references(&self) -> Vec<&Reference> {
        match self {
            ContainerData::Collection(data) => data.values.values().map(|v| &v.value).collect(),
            ContainerData::Singleton(data) => data.values.values().map(|v| &v.value).collect(),
        }
    }

    /// The container-level version vector.
    pub fn version(&self) -> &VersionVector {
        match self {
            ContainerData::Collection(data) => &data.version,
            ContainerData::Singleton(data) => &data.version,
        }
    }
}

/// Operations on a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContainerOperation {
    Collection(CollectionOperation<Reference>),
    Singleton(SingletonOperation<Reference>),
}

/// The container CRDT: one of the two set-like models over `Reference`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContainerModel {
    Collection(CrdtCollection<Reference>),
    Singleton(CrdtSingleton<Reference>),
}

impl ContainerModel {
    /// A fresh collection-shaped container.
    pub fn new_collection() -> Self {
        ContainerModel::Collection(CrdtCollection::new())
    }

    /// A fresh singleton-shaped container.
    pub fn new_singleton() -> Self {
        ContainerModel::Singleton(CrdtSingleton::new())
    }

    /// An empty data value matching this model's shape.
    pub fn empty_data(&self) -> ContainerData {
        match self {
            ContainerModel::Collection(_) => ContainerData::Collection(CollectionData::default()),
            ContainerModel::Singleton(_) => ContainerData::Singleton(SingletonData::default()),
        }
    }
}

impl CrdtModel for ContainerModel {
    type Data = ContainerData;
    type Operation = ContainerOperation;
    type View = Vec<Reference>;

    fn merge(
        &mut self,
        other: ContainerData,
    ) -> CrdtResult<MergeEffect<ContainerData, ContainerOperation>> {
        match (self, other) {
            (ContainerModel::Collection(model), ContainerData::Collection(data)) => {
                let effect = model.merge(data)?;
                Ok(MergeEffect {
                    model_change: wrap_collection_change(effect.model_change),
                    other_change: wrap_collection_change(effect.other_change),
                })
            }
            (ContainerModel::Singleton(model), ContainerData::Singleton(data)) => {
                let effect = model.merge(data)?;
                Ok(MergeEffect {
                    model_change: wrap_singleton_change(effect.model_change),
                    other_change: wrap_singleton_change(effect.other_change),
                })
            }
            _ => Err(CrdtError::InvalidOperation(
                "container shape mismatch between replicas".to_string(),
            )),
        }
    }

    fn apply_operation(&mut self, op: &ContainerOperation) -> bool {
        match (self, op) {
            (ContainerModel::Collection(model), ContainerOperation::Collection(op)) => {
                model.apply_operation(op)
            }
            (ContainerModel::Singleton(model), ContainerOperation::Singleton(op)) => {
                model.apply_operation(op)
            }
            _ => false,
        }
    }

    fn data(&self) -> ContainerData {
        match self {
            ContainerModel::Collection(model) => ContainerData::Collection(model.data()),
            ContainerModel::Singleton(model) => ContainerData::Singleton(model.data()),
        }
    }

    fn into_data(self) -> ContainerData {
        match self {
            ContainerModel::Collection(model) => ContainerData::Collection(model.into_data()),
            ContainerModel::Singleton(model) => ContainerData::Singleton(model.into_data()),
        }
    }

    fn particle_view(&self) -> Vec<Reference> {
        match self {
            ContainerModel::Collection(model) => model.particle_view(),
            ContainerModel::Singleton(model) => model.particle_view().into_iter().collect(),
        }
    }

    fn value(&self) -> serde_json::Value {
        match self {
            ContainerModel::Collection(model) => model.value(),
            ContainerModel::Singleton(model) => model.value(),
        }
    }
}

fn wrap_collection_change(
    change: CrdtChange<CollectionData<Reference>, CollectionOperation<Reference>>,
) -> CrdtChange<ContainerData, ContainerOperation> {
    match change {
        CrdtChange::Operations(ops) => CrdtChange::Operations(
            ops.into_iter().map(ContainerOperation::Collection).collect(),
        ),
        CrdtChange::Model(data) => CrdtChange::Model(ContainerData::Collection(data)),
    }
}

fn wrap_singleton_change(
    change: CrdtChange<SingletonData<Reference>, SingletonOperation<Reference>>,
) -> CrdtChange<ContainerData, ContainerOperation> {
    match change {
        CrdtChange::Operations(ops) => CrdtChange::Operations(
            ops.into_iter().map(ContainerOperation::Singleton).collect(),
        ),
        CrdtChange::Model(data) => CrdtChange::Model(ContainerData::Singleton(data)),
    }
}
