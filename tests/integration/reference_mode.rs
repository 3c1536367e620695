//! End-to-end reference-mode store scenarios: decomposition into
//! container and backing writes, causal holds, and send-retry.

use arcs_common::{PropertyValue, ReferenceId};
use arcs_crdt::{
    Actor, CollectionOperation, CrdtCollection, CrdtModel, EntityData, RawEntity, VersionVector,
};
use arcs_storage::{
    ContainerData, ContainerModel, DriverProvider, ExistenceCriteria, InMemoryDriver,
    ProxyMessage, RefModeMessage, RefModeOperation, Reference, ReferenceModeStorageKey,
    ReferenceModeStore, StorageKey, VolatileDriverProvider,
};
use std::sync::Arc;
use tokio::sync::mpsc::unbounded_channel;

fn rm_key() -> ReferenceModeStorageKey {
    ReferenceModeStorageKey::new(
        StorageKey::parse("volatile://backing").unwrap(),
        StorageKey::parse("volatile://container").unwrap(),
    )
}

fn person() -> RawEntity {
    RawEntity::new(ReferenceId::from("an-id"))
        .with_singleton("name", PropertyValue::Text("bob".to_string()))
        .with_singleton("age", PropertyValue::Number(42.0))
}

async fn connect(
    container_driver: Arc<InMemoryDriver<ContainerData>>,
    backing_provider: Arc<VolatileDriverProvider<EntityData>>,
) -> ReferenceModeStore {
    ReferenceModeStore::connect(
        rm_key(),
        container_driver,
        backing_provider,
        ContainerModel::new_collection(),
        ExistenceCriteria::MayExist,
        None,
    )
    .await
    .unwrap()
}

fn set_add(entity: RawEntity) -> RefModeMessage {
    ProxyMessage::Operations {
        operations: vec![RefModeOperation::Collection(CollectionOperation::Add {
            value: entity,
            actor: Actor::from("me"),
            clock: VersionVector::with_actor(Actor::from("me"), 1),
        })],
        id: None,
        mux_id: None,
    }
}

#[tokio::test]
async fn set_add_splits_into_reference_and_entity() {
    let _ = env_logger::builder().is_test(true).try_init();
    let container_driver = Arc::new(InMemoryDriver::new());
    let backing_provider = Arc::new(VolatileDriverProvider::new());
    let mut store = connect(container_driver.clone(), backing_provider.clone()).await;

    store.on_proxy_message(set_add(person())).await.unwrap();

    // The container driver received reference data whose sole entry maps
    // "an-id" to a reference at the backing key, stamped with the store's
    // actor at 1.
    let (container_data, _) = container_driver.stored().unwrap();
    let references = container_data.references();
    assert_eq!(references.len(), 1);
    assert_eq!(references[0].id.as_str(), "an-id");
    assert_eq!(references[0].storage_key, rm_key().backing);
    assert_eq!(references[0].version.get(store.crdt_key()), 1);

    // The backing driver for "an-id" received the entity body.
    let backing_driver = backing_provider
        .get(&rm_key().backing.child_key_with_component("an-id"))
        .unwrap();
    let (entity_data, _) = backing_driver.stored().unwrap();
    let view = entity_data.raw_view(ReferenceId::from("an-id"));
    assert_eq!(
        view.singletons["name"],
        Some(PropertyValue::Text("bob".to_string()))
    );
    assert_eq!(view.singletons["age"], Some(PropertyValue::Number(42.0)));

    store.idle().await;
}

#[tokio::test]
async fn reference_arriving_before_entity_is_held() {
    let _ = env_logger::builder().is_test(true).try_init();
    let container_driver = Arc::new(InMemoryDriver::new());
    let backing_provider = Arc::new(VolatileDriverProvider::new());
    let mut store = connect(container_driver.clone(), backing_provider.clone()).await;

    let (tx, mut rx) = unbounded_channel();
    store.on(tx);

    // A remote reference-mode replica wrote the entity at {remote: 1} and
    // its container entry; only the container update has arrived so far.
    let remote = Actor::from("rm-remote");
    let entity_version = VersionVector::with_actor(remote.clone(), 1);
    let mut container = CrdtCollection::<Reference>::new();
    assert!(container.add(
        Reference::new(ReferenceId::from("an-id"), rm_key().backing, entity_version.clone()),
        &remote,
    ));
    container_driver.inject(ContainerData::Collection(container.data()), 1);
    store.pump().await.unwrap();

    // No proxy callback fires: the reference cannot be dereferenced yet.
    assert!(rx.try_recv().is_err());
    assert!(!store.is_idle());

    // The backing model arrives with a covering version vector.
    let backing_driver = backing_provider
        .get(&rm_key().backing.child_key_with_component("an-id"))
        .unwrap();
    backing_driver.inject(EntityData::from_raw(&person(), &entity_version), 1);
    store.pump().await.unwrap();

    // Exactly one ModelUpdate carrying the full entity reaches the proxy.
    match rx.try_recv().unwrap() {
        ProxyMessage::ModelUpdate { model, .. } => {
            let entities = model.entities();
            assert_eq!(entities.len(), 1);
            assert_eq!(
                entities[0].singletons["age"],
                Some(PropertyValue::Number(42.0))
            );
        }
        other => panic!("expected ModelUpdate, got {other:?}"),
    }
    assert!(rx.try_recv().is_err());
    assert!(store.is_idle());
}

#[tokio::test]
async fn refused_container_write_is_retried_after_driver_merge() {
    let _ = env_logger::builder().is_test(true).try_init();
    let container_driver = Arc::new(InMemoryDriver::new());
    let backing_provider = Arc::new(VolatileDriverProvider::new());
    let mut store = connect(container_driver.clone(), backing_provider.clone()).await;

    // The container driver refuses the first write.
    container_driver.fail_next_sends(1);
    store.on_proxy_message(set_add(person())).await.unwrap();
    assert!(!store.is_idle());
    assert!(container_driver.stored().is_none());

    // A remote container state lands; observing it triggers the retry,
    // and the retried write carries the local reference too.
    let remote = Actor::from("rm-remote");
    let other_entity_version = VersionVector::with_actor(remote.clone(), 1);
    let mut container = CrdtCollection::<Reference>::new();
    assert!(container.add(
        Reference::new(
            ReferenceId::from("other-id"),
            rm_key().backing,
            other_entity_version.clone(),
        ),
        &remote,
    ));
    container_driver.inject(ContainerData::Collection(container.data()), 1);
    // Make the remote entity dereferenceable as well.
    let other = RawEntity::new(ReferenceId::from("other-id"))
        .with_singleton("name", PropertyValue::Text("eve".to_string()));
    backing_provider
        .driver(&rm_key().backing.child_key_with_component("other-id"))
        .unwrap();
    backing_provider
        .get(&rm_key().backing.child_key_with_component("other-id"))
        .unwrap()
        .inject(EntityData::from_raw(&other, &other_entity_version), 1);

    store.pump().await.unwrap();

    let (container_data, _) = container_driver.stored().unwrap();
    assert_eq!(container_data.references().len(), 2);
    assert!(store.is_idle());
}

#[tokio::test]
async fn sync_request_materializes_both_halves() {
    let _ = env_logger::builder().is_test(true).try_init();
    let container_driver = Arc::new(InMemoryDriver::new());
    let backing_provider = Arc::new(VolatileDriverProvider::new());
    let mut store = connect(container_driver, backing_provider).await;

    store.on_proxy_message(set_add(person())).await.unwrap();

    let (tx, mut rx) = unbounded_channel();
    let id = store.on(tx);
    store
        .on_proxy_message(ProxyMessage::SyncRequest {
            id: Some(id),
            mux_id: None,
        })
        .await
        .unwrap();

    match rx.try_recv().unwrap() {
        ProxyMessage::ModelUpdate { model, .. } => {
            let entities = model.entities();
            assert_eq!(entities.len(), 1);
            assert_eq!(entities[0].id.as_str(), "an-id");
            assert_eq!(
                entities[0].singletons["name"],
                Some(PropertyValue::Text("bob".to_string()))
            );
        }
        other => panic!("expected ModelUpdate, got {other:?}"),
    }
}
