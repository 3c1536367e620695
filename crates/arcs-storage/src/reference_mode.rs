//! The reference-mode store.
//!
//! A reference-mode store presents a collection (or singleton) of entities
//! to its proxies while physically splitting the data in two: a container
//! replica holding `Reference`s and a backing family holding per-entity
//! CRDT state. The two halves travel through independent drivers, so a
//! reference can arrive before the entity it points at. Pending container
//! updates wait in a hold queue and proxies are only notified once every
//! referenced entity is dereferenceable, preserving causal consistency.

use crate::backing::BackingStoreFamily;
use crate::container::{ContainerData, ContainerModel, ContainerOperation, Reference};
use crate::direct::DirectStore;
use crate::driver::{Driver, DriverProvider};
use crate::keys::ReferenceModeStorageKey;
use crate::messages::{CallbackId, ProxyMessage};
use crate::{ExistenceCriteria, StorageError, StorageResult, StoreOptions};
use arcs_common::ReferenceId;
use arcs_crdt::{
    Actor, CollectionData, CollectionOperation, CrdtModel, EntityData, RawEntity, SingletonData,
    SingletonOperation, VersionVector, VersionedValue,
};
use arcs_schema::Schema;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Notify;

/// Proxy-facing replica state of a reference-mode store: entity-valued,
/// with the same shape as the underlying container.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum RefModeData {
    Collection(CollectionData<RawEntity>),
    Singleton(SingletonData<RawEntity>),
}

impl RefModeData {
    /// The entities present, with their element clocks.
    pub fn entries(&self) -> Vec<(&String, &VersionedValue<RawEntity>)> {
        match self {
            RefModeData::Collection(data) => data.values.iter().collect(),
            RefModeData::Singleton(data) => data.values.iter().collect(),
        }
    }

    /// The entities present, in unique-id order.
    pub fn entities(&self) -> Vec<&RawEntity> {
        self.entries().into_iter().map(|(_, v)| &v.value).collect()
    }
}

/// Proxy-facing operations on a reference-mode store.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum RefModeOperation {
    Collection(CollectionOperation<RawEntity>),
    Singleton(SingletonOperation<RawEntity>),
}

/// The message type exchanged with reference-mode proxies.
pub type RefModeMessage = ProxyMessage<RefModeData, RefModeOperation>;

/// What to do once a hold-queue entry's pending references are satisfied.
#[derive(Debug, Clone)]
enum ReleaseAction {
    /// Emit a materialized `ModelUpdate` to every registered proxy.
    NotifyAllProxies,
    /// Answer a deferred sync request.
    RespondSync { target: Option<CallbackId> },
}

struct HoldEntry {
    /// Entity ids this entry waits for, with the backing version each must
    /// reach before the entry releases.
    pending: BTreeMap<ReferenceId, VersionVector>,
    action: ReleaseAction,
}

/// Per-id waiting queue for container updates that outran their entities.
#[derive(Default)]
struct HoldQueue {
    entries: Vec<HoldEntry>,
}

impl HoldQueue {
    fn enqueue(&mut self, pending: BTreeMap<ReferenceId, VersionVector>, action: ReleaseAction) {
        debug_assert!(!pending.is_empty());
        self.entries.push(HoldEntry { pending, action });
    }

    /// A superseding container update arrived for `id`: any entry already
    /// waiting on it now waits for the newer backing version.
    fn raise_threshold(&mut self, id: &ReferenceId, version: &VersionVector) {
        for entry in &mut self.entries {
            if let Some(threshold) = entry.pending.get_mut(id) {
                threshold.merge(version);
            }
        }
    }

    /// Record that the backing replica of `id` reached `available`;
    /// returns the actions of every entry that became fully satisfied.
    fn process(&mut self, id: &ReferenceId, available: &VersionVector) -> Vec<ReleaseAction> {
        let mut released = Vec::new();
        self.entries.retain_mut(|entry| {
            if let Some(threshold) = entry.pending.get(id) {
                if available.dominates_or_equal(threshold) {
                    entry.pending.remove(id);
                }
            }
            if entry.pending.is_empty() {
                released.push(entry.action.clone());
                false
            } else {
                true
            }
        });
        released
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A store splitting entity collections into references plus bodies.
pub struct ReferenceModeStore {
    storage_key: ReferenceModeStorageKey,
    /// The stable actor this store authors backing writes with.
    crdt_key: Actor,
    schema: Option<Schema>,
    container: DirectStore<ContainerModel>,
    backing: BackingStoreFamily,
    callbacks: BTreeMap<CallbackId, UnboundedSender<RefModeMessage>>,
    next_callback_id: u64,
    hold_queue: HoldQueue,
    idle_notify: Arc<Notify>,
}

impl ReferenceModeStore {
    /// Connect a reference-mode store over a container driver and a
    /// provider for backing drivers.
    pub async fn connect(
        storage_key: ReferenceModeStorageKey,
        container_driver: Arc<dyn Driver<ContainerData>>,
        backing_provider: Arc<dyn DriverProvider<EntityData>>,
        container_model: ContainerModel,
        existence: ExistenceCriteria,
        schema: Option<Schema>,
    ) -> StorageResult<Self> {
        let container = DirectStore::connect(
            container_driver,
            StoreOptions::direct(storage_key.storage.clone()).with_existence(existence),
            container_model,
        )
        .await?;
        let backing = BackingStoreFamily::new(storage_key.backing.clone(), backing_provider);
        let crdt_key = Actor::from(format!("rm-{:016x}", fastrand::u64(..)).as_str());
        debug!("reference-mode store at {storage_key} using actor {crdt_key}");
        let mut store = Self {
            storage_key,
            crdt_key,
            schema,
            container,
            backing,
            callbacks: BTreeMap::new(),
            next_callback_id: 0,
            hold_queue: HoldQueue::default(),
            idle_notify: Arc::new(Notify::new()),
        };
        // Seeded container state may already hold references.
        if !store.container.model().particle_view().is_empty() {
            store.settle_container_references().await?;
        }
        Ok(store)
    }

    /// The composite key this store serves.
    pub fn storage_key(&self) -> &ReferenceModeStorageKey {
        &self.storage_key
    }

    /// The actor this store authors backing writes with.
    pub fn crdt_key(&self) -> &Actor {
        &self.crdt_key
    }

    /// Register a proxy callback channel; returns its id.
    pub fn on(&mut self, sender: UnboundedSender<RefModeMessage>) -> CallbackId {
        self.next_callback_id += 1;
        let id = CallbackId(self.next_callback_id);
        self.callbacks.insert(id, sender);
        id
    }

    /// Remove a proxy callback.
    pub fn off(&mut self, id: CallbackId) {
        self.callbacks.remove(&id);
    }

    /// Process one message from a proxy.
    pub async fn on_proxy_message(&mut self, message: RefModeMessage) -> StorageResult<()> {
        match message {
            ProxyMessage::SyncRequest { id, .. } => self.handle_sync_request(id).await,
            ProxyMessage::ModelUpdate { model, id, .. } => {
                self.handle_model_update(model, id).await
            }
            ProxyMessage::Operations { operations, id, .. } => {
                self.handle_operations(operations, id).await
            }
        }
    }

    /// Drain queued driver updates on both halves, releasing hold-queue
    /// entries as backing state arrives. Returns true if anything was
    /// handled.
    pub async fn pump(&mut self) -> StorageResult<bool> {
        let container_updated = self.container.pump().await?;
        if container_updated {
            self.settle_container_references().await?;
        }
        let updated_ids = self.backing.pump_ids().await?;
        for id in &updated_ids {
            self.process_backing_arrival(id).await?;
        }
        if self.is_idle() {
            self.idle_notify.notify_waiters();
        }
        Ok(container_updated || !updated_ids.is_empty())
    }

    /// Adopt another store's model, as a `ModelUpdate` with no originator.
    pub async fn clone_from(&mut self, other: &ReferenceModeStore) -> StorageResult<()> {
        match other.try_materialize() {
            Ok(model) => {
                self.on_proxy_message(ProxyMessage::ModelUpdate {
                    model,
                    id: None,
                    mux_id: None,
                })
                .await
            }
            Err(_) => Err(StorageError::InvalidMessage(
                "source store holds references that cannot yet be dereferenced".to_string(),
            )),
        }
    }

    /// True when no pending driver writes remain anywhere and no container
    /// update is waiting for backing state.
    pub fn is_idle(&self) -> bool {
        self.container.is_idle() && self.backing.is_idle() && self.hold_queue.is_empty()
    }

    /// Resolve once `is_idle` holds.
    pub async fn idle(&self) {
        while !self.is_idle() {
            self.idle_notify.notified().await;
        }
    }

    /// The proxy-visible model, if every reference is dereferenceable;
    /// otherwise the set of entity ids still awaited with their version
    /// thresholds.
    pub fn try_materialize(
        &self,
    ) -> Result<RefModeData, BTreeMap<ReferenceId, VersionVector>> {
        let mut missing = BTreeMap::new();
        let data = match self.container.model().data() {
            ContainerData::Collection(data) => {
                let mut values = BTreeMap::new();
                for (uid, versioned) in &data.values {
                    match self.dereference(&versioned.value, &mut missing) {
                        Some(raw) => {
                            values.insert(
                                uid.clone(),
                                VersionedValue {
                                    value: raw,
                                    clock: versioned.clock.clone(),
                                },
                            );
                        }
                        None => continue,
                    }
                }
                RefModeData::Collection(CollectionData {
                    values,
                    version: data.version,
                })
            }
            ContainerData::Singleton(data) => {
                let mut values = BTreeMap::new();
                for (uid, versioned) in &data.values {
                    match self.dereference(&versioned.value, &mut missing) {
                        Some(raw) => {
                            values.insert(
                                uid.clone(),
                                VersionedValue {
                                    value: raw,
                                    clock: versioned.clock.clone(),
                                },
                            );
                        }
                        None => continue,
                    }
                }
                RefModeData::Singleton(SingletonData {
                    values,
                    version: data.version,
                })
            }
        };
        if missing.is_empty() {
            Ok(data)
        } else {
            Err(missing)
        }
    }

    fn dereference(
        &self,
        reference: &Reference,
        missing: &mut BTreeMap<ReferenceId, VersionVector>,
    ) -> Option<RawEntity> {
        let covered = self
            .backing
            .entity_version(&reference.id)
            .map(|available| available.dominates_or_equal(&reference.version))
            .unwrap_or_else(|| reference.version.is_empty());
        if covered {
            self.backing
                .entity_view(&reference.id)
                .or_else(|| Some(RawEntity::new(reference.id.clone())))
        } else {
            missing.insert(reference.id.clone(), reference.version.clone());
            None
        }
    }

    async fn handle_sync_request(&mut self, id: Option<CallbackId>) -> StorageResult<()> {
        match self.try_materialize() {
            Ok(model) => {
                self.emit_model_update(model, Targets::One(id));
                Ok(())
            }
            Err(missing) => {
                // Materialize the awaited backing stores so their drivers
                // are registered, then re-check before parking the reply.
                for entity_id in missing.keys() {
                    self.backing.get_or_create(entity_id).await?;
                }
                match self.try_materialize() {
                    Ok(model) => {
                        self.emit_model_update(model, Targets::One(id));
                    }
                    Err(missing) => {
                        debug!(
                            "parking sync response at {} awaiting {} entities",
                            self.storage_key,
                            missing.len()
                        );
                        self.hold_queue
                            .enqueue(missing, ReleaseAction::RespondSync { target: id });
                    }
                }
                Ok(())
            }
        }
    }

    async fn handle_model_update(
        &mut self,
        model: RefModeData,
        originator: Option<CallbackId>,
    ) -> StorageResult<()> {
        self.validate_entities(model.entities())?;

        // Upsert every entity body, then mirror the incoming shape into
        // the container with references carrying the backing write clocks.
        let container_data = match &model {
            RefModeData::Collection(data) => {
                let mut values = BTreeMap::new();
                for (uid, versioned) in &data.values {
                    let backing_version = self.upsert_backing(&versioned.value).await?;
                    values.insert(
                        uid.clone(),
                        VersionedValue {
                            value: self.reference_for(&versioned.value.id, backing_version),
                            clock: versioned.clock.clone(),
                        },
                    );
                }
                ContainerData::Collection(CollectionData {
                    values,
                    version: data.version.clone(),
                })
            }
            RefModeData::Singleton(data) => {
                let mut values = BTreeMap::new();
                for (uid, versioned) in &data.values {
                    let backing_version = self.upsert_backing(&versioned.value).await?;
                    values.insert(
                        uid.clone(),
                        VersionedValue {
                            value: self.reference_for(&versioned.value.id, backing_version),
                            clock: versioned.clock.clone(),
                        },
                    );
                }
                ContainerData::Singleton(SingletonData {
                    values,
                    version: data.version.clone(),
                })
            }
        };

        self.container
            .on_proxy_message(ProxyMessage::ModelUpdate {
                model: container_data,
                id: None,
                mux_id: None,
            })
            .await?;

        self.fan_out(
            |target| ProxyMessage::ModelUpdate {
                model: model.clone(),
                id: Some(target),
                mux_id: None,
            },
            originator,
        );
        if self.is_idle() {
            self.idle_notify.notify_waiters();
        }
        Ok(())
    }

    async fn handle_operations(
        &mut self,
        operations: Vec<RefModeOperation>,
        originator: Option<CallbackId>,
    ) -> StorageResult<()> {
        let written: Vec<&RawEntity> = operations
            .iter()
            .filter_map(|op| match op {
                RefModeOperation::Collection(CollectionOperation::Add { value, .. }) => {
                    Some(value)
                }
                RefModeOperation::Singleton(SingletonOperation::Set { value, .. }) => Some(value),
                _ => None,
            })
            .collect();
        self.validate_entities(written)?;

        let mut container_ops = Vec::with_capacity(operations.len());
        for op in &operations {
            container_ops.push(self.translate_operation(op).await?);
        }

        if !self
            .container
            .apply_operations(container_ops, None)
            .await?
        {
            warn!(
                "reference-mode store {} received an out-of-order operation; requesting sync",
                self.storage_key
            );
            self.send_sync_request(originator);
            return Ok(());
        }

        self.fan_out(
            |target| ProxyMessage::Operations {
                operations: operations.clone(),
                id: Some(target),
                mux_id: None,
            },
            originator,
        );
        if self.is_idle() {
            self.idle_notify.notify_waiters();
        }
        Ok(())
    }

    /// Translate one proxy operation into its container form, upserting
    /// entity bodies as a side effect.
    async fn translate_operation(
        &mut self,
        op: &RefModeOperation,
    ) -> StorageResult<ContainerOperation> {
        Ok(match op {
            RefModeOperation::Collection(CollectionOperation::Add {
                value,
                actor,
                clock,
            }) => {
                let backing_version = self.upsert_backing(value).await?;
                ContainerOperation::Collection(CollectionOperation::Add {
                    value: self.reference_for(&value.id, backing_version),
                    actor: actor.clone(),
                    clock: clock.clone(),
                })
            }
            RefModeOperation::Collection(CollectionOperation::Remove {
                value,
                actor,
                clock,
            }) => ContainerOperation::Collection(CollectionOperation::Remove {
                value: self.reference_for(&value.id, VersionVector::new()),
                actor: actor.clone(),
                clock: clock.clone(),
            }),
            RefModeOperation::Singleton(SingletonOperation::Set {
                value,
                actor,
                clock,
            }) => {
                let backing_version = self.upsert_backing(value).await?;
                ContainerOperation::Singleton(SingletonOperation::Set {
                    value: self.reference_for(&value.id, backing_version),
                    actor: actor.clone(),
                    clock: clock.clone(),
                })
            }
            RefModeOperation::Singleton(SingletonOperation::Clear { actor, clock }) => {
                ContainerOperation::Singleton(SingletonOperation::Clear {
                    actor: actor.clone(),
                    clock: clock.clone(),
                })
            }
        })
    }

    /// Write an entity body into its backing store, authored by this
    /// store's actor. Returns the backing write clock, which references to
    /// this entity must carry.
    async fn upsert_backing(&mut self, entity: &RawEntity) -> StorageResult<VersionVector> {
        let store = self.backing.get_or_create(&entity.id).await?;
        let write_version = store
            .model()
            .data()
            .version
            .incremented(&self.crdt_key);
        let data = EntityData::from_raw(entity, &write_version);
        store
            .on_proxy_message(ProxyMessage::ModelUpdate {
                model: data,
                id: None,
                mux_id: Some(entity.id.clone()),
            })
            .await?;
        Ok(write_version)
    }

    fn reference_for(&self, id: &ReferenceId, version: VersionVector) -> Reference {
        Reference::new(id.clone(), self.storage_key.backing.clone(), version)
    }

    /// After container state changed underneath us, either notify proxies
    /// or park the update until the backing catches up.
    async fn settle_container_references(&mut self) -> StorageResult<()> {
        let references: Vec<Reference> = self.container.model().particle_view();
        // Materialize every referenced backing store so drivers are
        // registered and already-arrived state is seen.
        for reference in &references {
            self.backing.get_or_create(&reference.id).await?;
        }
        match self.try_materialize() {
            Ok(model) => {
                self.emit_model_update(model, Targets::All);
            }
            Err(missing) => {
                debug!(
                    "holding container update at {} awaiting {} entities",
                    self.storage_key,
                    missing.len()
                );
                for (id, version) in &missing {
                    self.hold_queue.raise_threshold(id, version);
                }
                self.hold_queue
                    .enqueue(missing, ReleaseAction::NotifyAllProxies);
            }
        }
        Ok(())
    }

    /// Backing state for `id` advanced: release satisfied hold entries,
    /// or forward the change if nothing was waiting on it.
    async fn process_backing_arrival(&mut self, id: &ReferenceId) -> StorageResult<()> {
        let available = self.backing.entity_version(id).unwrap_or_default();
        let actions = self.hold_queue.process(id, &available);
        let released = !actions.is_empty();
        for action in actions {
            match self.try_materialize() {
                Ok(model) => match action {
                    ReleaseAction::NotifyAllProxies => {
                        self.emit_model_update(model, Targets::All)
                    }
                    ReleaseAction::RespondSync { target } => {
                        self.emit_model_update(model, Targets::One(target))
                    }
                },
                // A later container update re-opened a gap; keep waiting.
                Err(missing) => self.hold_queue.enqueue(missing, action),
            }
        }

        if !released {
            let referenced = self
                .container
                .model()
                .particle_view()
                .iter()
                .any(|r| &r.id == id);
            if referenced {
                if let Ok(model) = self.try_materialize() {
                    self.emit_model_update(model, Targets::All);
                }
            }
        }
        if self.is_idle() {
            self.idle_notify.notify_waiters();
        }
        Ok(())
    }

    fn validate_entities<'a, I>(&self, entities: I) -> StorageResult<()>
    where
        I: IntoIterator<Item = &'a RawEntity>,
    {
        if let Some(schema) = &self.schema {
            // Validate everything before committing anything.
            for entity in entities {
                schema.validate_entity(entity)?;
            }
        }
        Ok(())
    }

    fn emit_model_update(&mut self, model: RefModeData, targets: Targets) {
        match targets {
            Targets::All => self.fan_out(
                |target| ProxyMessage::ModelUpdate {
                    model: model.clone(),
                    id: Some(target),
                    mux_id: None,
                },
                None,
            ),
            Targets::One(Some(target)) => {
                if let Some(sender) = self.callbacks.get(&target) {
                    let message = ProxyMessage::ModelUpdate {
                        model,
                        id: Some(target),
                        mux_id: None,
                    };
                    if sender.send(message).is_err() {
                        self.callbacks.remove(&target);
                    }
                }
            }
            Targets::One(None) => self.fan_out(
                |target| ProxyMessage::ModelUpdate {
                    model: model.clone(),
                    id: Some(target),
                    mux_id: None,
                },
                None,
            ),
        }
    }

    fn send_sync_request(&mut self, target: Option<CallbackId>) {
        if let Some(target) = target {
            if let Some(sender) = self.callbacks.get(&target) {
                let message = ProxyMessage::SyncRequest {
                    id: Some(target),
                    mux_id: None,
                };
                if sender.send(message).is_err() {
                    self.callbacks.remove(&target);
                }
            }
        }
    }

    fn fan_out<F>(&mut self, build: F, exclude: Option<CallbackId>)
    where
        F: Fn(CallbackId) -> RefModeMessage,
    {
        let targets: Vec<CallbackId> = self
            .callbacks
            .keys()
            .copied()
            .filter(|id| Some(*id) != exclude)
            .collect();
        for target in targets {
            if let Some(sender) = self.callbacks.get(&target) {
                if sender.send(build(target)).is_err() {
                    self.callbacks.remove(&target);
                }
            }
        }
    }
}

enum Targets {
    All,
    One(Option<CallbackId>),
}

impl std::fmt::Debug for ReferenceModeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceModeStore")
            .field("storage_key", &self.storage_key.to_string())
            .field("crdt_key", &self.crdt_key)
            .field("holding", &!self.hold_queue.is_empty())
            .finish()
    }
}
