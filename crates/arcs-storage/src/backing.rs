//! The keyed family of per-entity backing stores.
//!
//! Entity bodies in reference-mode live one-per-id in direct stores under
//! child keys of the backing base key. Stores materialize lazily on first
//! touch, so a reference can arrive (and wait) before its entity has ever
//! been seen.

use crate::direct::{DirectStore, StoreMessage};
use crate::driver::DriverProvider;
use crate::keys::StorageKey;
use crate::{StorageError, StorageResult, StoreOptions};
use arcs_common::ReferenceId;
use arcs_crdt::{CrdtEntity, CrdtModel, EntityData, RawEntity, VersionVector};
use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Lazily-created direct stores for entity bodies, keyed by entity id.
pub struct BackingStoreFamily {
    base_key: StorageKey,
    provider: Arc<dyn DriverProvider<EntityData>>,
    stores: BTreeMap<ReferenceId, DirectStore<CrdtEntity>>,
}

impl BackingStoreFamily {
    /// Create a family rooted at the given base key.
    pub fn new(base_key: StorageKey, provider: Arc<dyn DriverProvider<EntityData>>) -> Self {
        Self {
            base_key,
            provider,
            stores: BTreeMap::new(),
        }
    }

    /// The family's base key; per-entity stores live at child keys.
    pub fn base_key(&self) -> &StorageKey {
        &self.base_key
    }

    /// Ids with materialized stores.
    pub fn ids(&self) -> Vec<ReferenceId> {
        self.stores.keys().cloned().collect()
    }

    /// Get the store for an entity id, creating it on first touch.
    pub async fn get_or_create(
        &mut self,
        id: &ReferenceId,
    ) -> StorageResult<&mut DirectStore<CrdtEntity>> {
        if !self.stores.contains_key(id) {
            let child_key = self.base_key.child_key_with_component(id.as_str());
            debug!("materializing backing store at {child_key}");
            let driver = self.provider.driver(&child_key)?;
            let store = DirectStore::connect(
                driver,
                StoreOptions::backing(child_key),
                CrdtEntity::new(id.clone()),
            )
            .await?;
            self.stores.insert(id.clone(), store);
        }
        match self.stores.get_mut(id) {
            Some(store) => Ok(store),
            None => Err(StorageError::Inoperable(format!(
                "backing store for {id} disappeared during creation"
            ))),
        }
    }

    /// The store for an entity id, if materialized.
    pub fn get(&self, id: &ReferenceId) -> Option<&DirectStore<CrdtEntity>> {
        self.stores.get(id)
    }

    /// Route a proxy message to one entity's store.
    pub async fn on_proxy_message(
        &mut self,
        id: &ReferenceId,
        message: StoreMessage<CrdtEntity>,
    ) -> StorageResult<()> {
        let store = self.get_or_create(id).await?;
        store.on_proxy_message(message).await
    }

    /// The entity-level version vector a replica of `id` has reached, if
    /// its store has been materialized.
    pub fn entity_version(&self, id: &ReferenceId) -> Option<VersionVector> {
        self.stores.get(id).map(|store| store.model().data().version)
    }

    /// The particle-facing view of an entity, if materialized.
    pub fn entity_view(&self, id: &ReferenceId) -> Option<RawEntity> {
        self.stores.get(id).map(|store| store.model().particle_view())
    }

    /// Drain queued driver updates for every store; returns the ids whose
    /// stores handled at least one update.
    pub async fn pump_ids(&mut self) -> StorageResult<Vec<ReferenceId>> {
        let mut updated = Vec::new();
        let ids: Vec<ReferenceId> = self.stores.keys().cloned().collect();
        for id in ids {
            if let Some(store) = self.stores.get_mut(&id) {
                if store.pump().await? {
                    updated.push(id);
                }
            }
        }
        Ok(updated)
    }

    /// True when every materialized store has no pending driver writes.
    pub fn is_idle(&self) -> bool {
        self.stores.values().all(|store| store.is_idle())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::VolatileDriverProvider;
    use crate::messages::ProxyMessage;
    use arcs_common::PropertyValue;
    use arcs_crdt::Actor;

    fn base_key() -> StorageKey {
        StorageKey::parse("volatile://backing").unwrap()
    }

    #[tokio::test]
    async fn test_lazy_materialization() {
        let provider = Arc::new(VolatileDriverProvider::new());
        let mut family = BackingStoreFamily::new(base_key(), provider.clone());
        let id = ReferenceId::from("an-id");

        assert!(family.get(&id).is_none());
        assert_eq!(family.entity_version(&id), None);

        family.get_or_create(&id).await.unwrap();
        assert!(family.get(&id).is_some());
        assert!(provider
            .get(&base_key().child_key_with_component("an-id"))
            .is_some());
    }

    #[tokio::test]
    async fn test_routed_writes_reach_child_driver() {
        let provider = Arc::new(VolatileDriverProvider::new());
        let mut family = BackingStoreFamily::new(base_key(), provider.clone());
        let id = ReferenceId::from("an-id");
        let actor = Actor::from("rm-1");

        let raw = RawEntity::new(id.clone())
            .with_singleton("name", PropertyValue::Text("bob".to_string()));
        let clock = VersionVector::with_actor(actor, 1);
        family
            .on_proxy_message(
                &id,
                ProxyMessage::ModelUpdate {
                    model: EntityData::from_raw(&raw, &clock),
                    id: None,
                    mux_id: Some(id.clone()),
                },
            )
            .await
            .unwrap();

        let driver = provider
            .get(&base_key().child_key_with_component("an-id"))
            .unwrap();
        let (stored, _) = driver.stored().unwrap();
        assert_eq!(stored.version, clock);
        assert_eq!(family.entity_version(&id), Some(clock));
        assert!(family.is_idle());
    }
}
