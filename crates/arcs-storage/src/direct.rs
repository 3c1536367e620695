//! Direct stores: one CRDT model, one driver, many proxies.
//!
//! A direct store is the unit every other store composes. It merges
//! incoming models, applies operation batches, fans resulting changes out
//! to registered proxies, and pushes state to its driver with send-retry:
//! a transiently refused write is retained and retried after the next
//! successful merge with the driver, so writes are never silently dropped.

use crate::driver::{Driver, DriverUpdate};
use crate::keys::StorageKey;
use crate::messages::{CallbackId, ProxyMessage};
use crate::{ExistenceCriteria, StorageError, StorageResult, StoreOptions};
use arcs_crdt::{CrdtChange, CrdtModel};
use log::{debug, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;

/// The proxy-facing message type of a store over model `M`.
pub type StoreMessage<M> =
    ProxyMessage<<M as CrdtModel>::Data, <M as CrdtModel>::Operation>;

/// A store owning a single CRDT model and a driver for one storage key.
pub struct DirectStore<M: CrdtModel>
where
    M::Data: Send + Sync + 'static,
    M::Operation: Send + 'static,
{
    storage_key: StorageKey,
    model: M,
    driver: Arc<dyn Driver<M::Data>>,
    driver_rx: UnboundedReceiver<DriverUpdate<M::Data>>,
    callbacks: BTreeMap<CallbackId, UnboundedSender<StoreMessage<M>>>,
    next_callback_id: u64,
    /// Driver generation this store has observed or produced.
    version: u64,
    /// Data refused by the driver, retained for retry.
    pending_driver_data: Option<M::Data>,
    idle_notify: Arc<Notify>,
}

impl<M: CrdtModel> DirectStore<M>
where
    M::Data: Send + Sync + 'static,
    M::Operation: Send + 'static,
{
    /// Connect a store: activate the driver, register for updates, seed
    /// the model from any existing state, and enforce existence criteria.
    pub async fn connect(
        driver: Arc<dyn Driver<M::Data>>,
        options: StoreOptions,
        model: M,
    ) -> StorageResult<Self> {
        let StoreOptions {
            storage_key,
            existence,
            version_token,
            ..
        } = options;
        driver.activate().await.map_err(|e| {
            StorageError::Inoperable(format!("activation failed for {storage_key}: {e}"))
        })?;

        let (tx, rx) = unbounded_channel();
        driver.register_receiver(version_token.or_else(|| driver.token()), tx);

        let existing = driver.read().await?;
        match (existence, &existing) {
            (ExistenceCriteria::MustExist, None) => {
                return Err(StorageError::NotFound(storage_key.to_string()))
            }
            (ExistenceCriteria::ShouldCreate, Some(_)) => {
                return Err(StorageError::AlreadyExists(storage_key.to_string()))
            }
            _ => {}
        }

        let mut store = Self {
            storage_key,
            model,
            driver,
            driver_rx: rx,
            callbacks: BTreeMap::new(),
            next_callback_id: 0,
            version: 0,
            pending_driver_data: None,
            idle_notify: Arc::new(Notify::new()),
        };
        if let Some(update) = existing {
            store.on_driver_update(update.data, update.version).await?;
        }
        Ok(store)
    }

    /// The key this store serves.
    pub fn storage_key(&self) -> &StorageKey {
        &self.storage_key
    }

    /// The store's model.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// The driver generation this store is at.
    pub fn version_token(&self) -> u64 {
        self.version
    }

    /// Register a proxy callback channel; returns its id.
    pub fn on(&mut self, sender: UnboundedSender<StoreMessage<M>>) -> CallbackId {
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
    pub async fn on_proxy_message(&mut self, message: StoreMessage<M>) -> StorageResult<()> {
        match message {
            ProxyMessage::SyncRequest { id, .. } => {
                let model = self.model.data();
                self.send_to(id, |target| ProxyMessage::ModelUpdate {
                    model: model.clone(),
                    id: Some(target),
                    mux_id: None,
                });
                Ok(())
            }
            ProxyMessage::ModelUpdate { model, id, .. } => {
                let effect = self.model.merge(model)?;
                let model_changed = !effect.model_change.is_empty();
                if model_changed {
                    self.fan_out_change(effect.model_change, id);
                }
                if !effect.other_change.is_empty() {
                    // Lift the (possibly stale) sender to the merged state.
                    if let Some(originator) = id {
                        self.send_change_to(originator, effect.other_change);
                    }
                }
                if model_changed {
                    self.flush_to_driver().await?;
                }
                Ok(())
            }
            ProxyMessage::Operations { operations, id, .. } => {
                if !self.apply_operations(operations, id).await? {
                    warn!(
                        "store {} received an out-of-order operation; requesting sync",
                        self.storage_key
                    );
                    self.send_to(id, |target| ProxyMessage::SyncRequest {
                        id: Some(target),
                        mux_id: None,
                    });
                }
                Ok(())
            }
        }
    }

    /// Apply a batch of operations, fanning them out and flushing to the
    /// driver on success. Returns false (leaving later operations
    /// unapplied) when an operation does not connect to the current
    /// version; the caller decides how to resynchronize the originator.
    pub async fn apply_operations(
        &mut self,
        operations: Vec<M::Operation>,
        exclude: Option<CallbackId>,
    ) -> StorageResult<bool> {
        for op in &operations {
            if !self.model.apply_operation(op) {
                return Ok(false);
            }
        }
        if !operations.is_empty() {
            self.fan_out_change(CrdtChange::Operations(operations), exclude);
            self.flush_to_driver().await?;
        }
        Ok(true)
    }

    /// Process an update arriving from the driver.
    pub async fn on_driver_update(
        &mut self,
        data: M::Data,
        version: u64,
    ) -> StorageResult<()> {
        let effect = self.model.merge(data)?;
        self.version = self.version.max(version);
        if !effect.model_change.is_empty() {
            self.fan_out_change(effect.model_change, None);
        }
        if self.pending_driver_data.take().is_some() {
            // A successful exchange with the driver happened; the merged
            // model supersedes the refused write, so retry with it.
            debug!("store {} retrying pending driver write", self.storage_key);
            self.flush_to_driver().await?;
        } else {
            self.idle_notify.notify_waiters();
        }
        Ok(())
    }

    /// Drain any queued driver updates. Returns true if any were handled.
    pub async fn pump(&mut self) -> StorageResult<bool> {
        let mut handled = false;
        while let Ok(update) = self.driver_rx.try_recv() {
            self.on_driver_update(update.data, update.version).await?;
            handled = true;
        }
        Ok(handled)
    }

    /// Merge another store's model into this one.
    pub async fn clone_from(&mut self, other: &DirectStore<M>) -> StorageResult<()> {
        self.on_proxy_message(ProxyMessage::ModelUpdate {
            model: other.model.data(),
            id: None,
            mux_id: None,
        })
        .await
    }

    /// True when no refused driver write is awaiting retry.
    pub fn is_idle(&self) -> bool {
        self.pending_driver_data.is_none()
    }

    /// Resolve once no pending driver writes remain.
    pub async fn idle(&self) {
        while !self.is_idle() {
            self.idle_notify.notified().await;
        }
    }

    async fn flush_to_driver(&mut self) -> StorageResult<()> {
        let data = self.model.data();
        let next = self.version + 1;
        if self.driver.send(data.clone(), next).await? {
            self.version = next;
            self.pending_driver_data = None;
            self.idle_notify.notify_waiters();
        } else {
            warn!(
                "driver refused write at version {next} for {}; retaining for retry",
                self.storage_key
            );
            self.pending_driver_data = Some(data);
        }
        Ok(())
    }

    /// Send a change to every proxy except the originator.
    fn fan_out_change(
        &mut self,
        change: CrdtChange<M::Data, M::Operation>,
        exclude: Option<CallbackId>,
    ) {
        let targets: Vec<CallbackId> = self
            .callbacks
            .keys()
            .copied()
            .filter(|id| Some(*id) != exclude)
            .collect();
        for target in targets {
            self.send_change_to(target, change.clone());
        }
    }

    fn send_change_to(&mut self, target: CallbackId, change: CrdtChange<M::Data, M::Operation>) {
        let message = match change {
            CrdtChange::Operations(operations) => ProxyMessage::Operations {
                operations,
                id: Some(target),
                mux_id: None,
            },
            CrdtChange::Model(model) => ProxyMessage::ModelUpdate {
                model,
                id: Some(target),
                mux_id: None,
            },
        };
        if let Some(sender) = self.callbacks.get(&target) {
            if sender.send(message).is_err() {
                self.callbacks.remove(&target);
            }
        }
    }

    /// Send a message to one callback, or to all when `id` is `None`.
    fn send_to<F>(&mut self, id: Option<CallbackId>, build: F)
    where
        F: Fn(CallbackId) -> StoreMessage<M>,
    {
        let targets: Vec<CallbackId> = match id {
            Some(id) => vec![id],
            None => self.callbacks.keys().copied().collect(),
        };
        for target in targets {
            if let Some(sender) = self.callbacks.get(&target) {
                if sender.send(build(target)).is_err() {
                    self.callbacks.remove(&target);
                }
            }
        }
    }
}
