//! The driver contract between stores and persistence transports.
//!
//! Drivers are the lowest layer the core knows about: per-key channels that
//! accept versioned writes and push remote updates through registered
//! receivers. A driver may refuse a write transiently (returning
//! `Ok(false)`); the store retains the data and retries after its next
//! successful exchange with the driver. Drivers are not required to be
//! ordered across keys.

use crate::keys::StorageKey;
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, warn};
use std::sync::Arc;
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;

/// A versioned payload delivered by a driver.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverUpdate<Data> {
    pub data: Data,
    pub version: u64,
}

/// Per-key persistence transport.
#[async_trait]
pub trait Driver<Data>: Send + Sync
where
    Data: Clone + Send + 'static,
{
    /// Bring the driver up. Failure marks the owning store inoperable.
    async fn activate(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Install a receiver for updates arriving from below. The optional
    /// token resumes an earlier session where the transport supports it.
    fn register_receiver(&self, token: Option<String>, receiver: UnboundedSender<DriverUpdate<Data>>);

    /// Attempt a write at the given version. `Ok(false)` is a transient
    /// refusal the caller may retry; `Err` is fatal.
    async fn send(&self, data: Data, version: u64) -> StorageResult<bool>;

    /// Read the driver's current state, if any exists.
    async fn read(&self) -> StorageResult<Option<DriverUpdate<Data>>>;

    /// The current version token, used to resume receivers.
    fn token(&self) -> Option<String>;
}

struct InMemoryState<Data> {
    stored: Option<(Data, u64)>,
    receivers: Vec<UnboundedSender<DriverUpdate<Data>>>,
    pending_send_failures: u32,
    fail_activation: bool,
}

/// An in-process driver holding one versioned slot.
///
/// Used for single-process runtimes and tests. Writes must carry the next
/// generation number; stale writes are refused transiently so the sending
/// store merges and retries, which is exactly the contract real transports
/// exhibit under contention.
pub struct InMemoryDriver<Data> {
    state: Mutex<InMemoryState<Data>>,
}

impl<Data: Clone + Send + 'static> InMemoryDriver<Data> {
    /// Create an empty driver.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InMemoryState {
                stored: None,
                receivers: Vec::new(),
                pending_send_failures: 0,
                fail_activation: false,
            }),
        }
    }

    /// Create a driver whose activation fails, for testing the
    /// inoperable-store path.
    pub fn failing_activation() -> Self {
        let driver = Self::new();
        driver.state.lock().unwrap().fail_activation = true;
        driver
    }

    /// Make the next `n` sends fail transiently.
    pub fn fail_next_sends(&self, n: u32) {
        self.state.lock().unwrap().pending_send_failures = n;
    }

    /// The currently stored payload and version.
    pub fn stored(&self) -> Option<(Data, u64)> {
        self.state.lock().unwrap().stored.clone()
    }

    /// Simulate an update arriving from a remote replica: store it and
    /// notify every registered receiver.
    pub fn inject(&self, data: Data, version: u64) {
        let mut state = self.state.lock().unwrap();
        state.stored = Some((data.clone(), version));
        state.receivers.retain(|receiver| {
            receiver
                .send(DriverUpdate {
                    data: data.clone(),
                    version,
                })
                .is_ok()
        });
    }
}

impl<Data: Clone + Send + 'static> Default for InMemoryDriver<Data> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<Data> Driver<Data> for InMemoryDriver<Data>
where
    Data: Clone + Send + Sync + 'static,
{
    async fn activate(&self) -> StorageResult<()> {
        if self.state.lock().unwrap().fail_activation {
            return Err(StorageError::DriverUnavailable(
                "in-memory driver configured to fail activation".to_string(),
            ));
        }
        Ok(())
    }

    fn register_receiver(&self, _token: Option<String>, receiver: UnboundedSender<DriverUpdate<Data>>) {
        self.state.lock().unwrap().receivers.push(receiver);
    }

    async fn send(&self, data: Data, version: u64) -> StorageResult<bool> {
        let mut state = self.state.lock().unwrap();
        if state.pending_send_failures > 0 {
            state.pending_send_failures -= 1;
            warn!("in-memory driver refusing send at version {version}");
            return Ok(false);
        }
        let current = state.stored.as_ref().map(|(_, v)| *v).unwrap_or(0);
        if version != current + 1 {
            debug!("in-memory driver refusing out-of-sequence send {version} (at {current})");
            return Ok(false);
        }
        state.stored = Some((data, version));
        Ok(true)
    }

    async fn read(&self) -> StorageResult<Option<DriverUpdate<Data>>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .stored
            .as_ref()
            .map(|(data, version)| DriverUpdate {
                data: data.clone(),
                version: *version,
            }))
    }

    fn token(&self) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .stored
            .as_ref()
            .map(|(_, v)| v.to_string())
    }
}

/// Constructs drivers for the storage keys it supports.
pub trait DriverProvider<Data>: Send + Sync
where
    Data: Clone + Send + 'static,
{
    /// Whether this provider can serve the given key.
    fn will_support(&self, key: &StorageKey) -> bool;

    /// Get or create the driver for a key.
    fn driver(&self, key: &StorageKey) -> StorageResult<Arc<dyn Driver<Data>>>;
}

/// A provider of in-memory drivers for `volatile://` keys, one driver per
/// distinct key. Tests reach the concrete drivers through `get` to inject
/// remote updates and inspect stored state.
pub struct VolatileDriverProvider<Data> {
    drivers: DashMap<StorageKey, Arc<InMemoryDriver<Data>>>,
}

impl<Data: Clone + Send + Sync + 'static> VolatileDriverProvider<Data> {
    pub fn new() -> Self {
        Self {
            drivers: DashMap::new(),
        }
    }

    /// The concrete driver for a key, if one has been created.
    pub fn get(&self, key: &StorageKey) -> Option<Arc<InMemoryDriver<Data>>> {
        self.drivers.get(key).map(|entry| entry.clone())
    }
}

impl<Data: Clone + Send + Sync + 'static> Default for VolatileDriverProvider<Data> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Data> DriverProvider<Data> for VolatileDriverProvider<Data>
where
    Data: Clone + Send + Sync + 'static,
{
    fn will_support(&self, key: &StorageKey) -> bool {
        key.protocol() == "volatile"
    }

    fn driver(&self, key: &StorageKey) -> StorageResult<Arc<dyn Driver<Data>>> {
        if !self.will_support(key) {
            return Err(StorageError::DriverUnavailable(format!(
                "no driver for protocol '{}'",
                key.protocol()
            )));
        }
        let driver = self
            .drivers
            .entry(key.clone())
            .or_insert_with(|| Arc::new(InMemoryDriver::new()))
            .clone();
        Ok(driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    #[tokio::test]
    async fn test_send_and_read() {
        let driver = InMemoryDriver::<u32>::new();
        assert!(driver.send(7, 1).await.unwrap());
        assert_eq!(driver.stored(), Some((7, 1)));
        assert_eq!(driver.token(), Some("1".to_string()));

        let update = driver.read().await.unwrap().unwrap();
        assert_eq!(update.data, 7);
        assert_eq!(update.version, 1);
    }

    #[tokio::test]
    async fn test_out_of_sequence_send_refused() {
        let driver = InMemoryDriver::<u32>::new();
        assert!(!driver.send(7, 2).await.unwrap());
        assert!(driver.send(7, 1).await.unwrap());
        assert!(!driver.send(8, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_transient_failures() {
        let driver = InMemoryDriver::<u32>::new();
        driver.fail_next_sends(1);
        assert!(!driver.send(7, 1).await.unwrap());
        assert!(driver.send(7, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_inject_notifies_receivers() {
        let driver = InMemoryDriver::<u32>::new();
        let (tx, mut rx) = unbounded_channel();
        driver.register_receiver(None, tx);
        driver.inject(9, 4);
        let update = rx.recv().await.unwrap();
        assert_eq!((update.data, update.version), (9, 4));
    }

    #[tokio::test]
    async fn test_failing_activation() {
        let driver = InMemoryDriver::<u32>::failing_activation();
        assert!(matches!(
            driver.activate().await,
            Err(StorageError::DriverUnavailable(_))
        ));
    }

    #[test]
    fn test_volatile_provider_caches_per_key() {
        let provider = VolatileDriverProvider::<u32>::new();
        let key = StorageKey::parse("volatile://a").unwrap();
        provider.driver(&key).unwrap();
        provider.driver(&key).unwrap();
        assert!(provider.get(&key).is_some());
        assert!(provider
            .driver(&StorageKey::parse("db://a").unwrap())
            .is_err());
    }
}
