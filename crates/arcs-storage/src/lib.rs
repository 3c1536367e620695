//! # Arcs Storage Crate
//!
//! The storage stack between particle-facing proxies and persistence
//! drivers. A `DirectStore` owns one CRDT model and one driver; a backing
//! store family multiplexes per-entity stores under child keys; a
//! `ReferenceModeStore` layers a reference container over a backing family
//! so collections of entities can be stored as references plus bodies
//! without losing causal consistency.

use arcs_common::CommonError;
use arcs_crdt::CrdtError;
use arcs_schema::SchemaError;
use serde::{Deserialize, Serialize};

pub mod backing;
pub mod container;
pub mod direct;
pub mod driver;
pub mod keys;
pub mod messages;
pub mod reference_mode;

pub use backing::BackingStoreFamily;
pub use container::{ContainerData, ContainerModel, ContainerOperation, Reference};
pub use direct::DirectStore;
pub use driver::{Driver, DriverProvider, DriverUpdate, InMemoryDriver, VolatileDriverProvider};
pub use keys::{ReferenceModeStorageKey, StorageKey};
pub use messages::{CallbackId, ProxyMessage};
pub use reference_mode::{RefModeData, RefModeMessage, RefModeOperation, ReferenceModeStore};

/// What a store expects to find at its key when connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExistenceCriteria {
    MayExist,
    MustExist,
    ShouldCreate,
}

/// The construction mode of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageMode {
    Direct,
    Backing,
    ReferenceMode,
}

/// Options supplied when constructing a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreOptions {
    pub storage_key: StorageKey,
    pub existence: ExistenceCriteria,
    pub mode: StorageMode,
    pub version_token: Option<String>,
}

impl StoreOptions {
    /// Options for a direct store that may or may not already exist.
    pub fn direct(storage_key: StorageKey) -> Self {
        Self {
            storage_key,
            existence: ExistenceCriteria::MayExist,
            mode: StorageMode::Direct,
            version_token: None,
        }
    }

    /// Options for one member of a backing-store family.
    pub fn backing(storage_key: StorageKey) -> Self {
        Self {
            storage_key,
            existence: ExistenceCriteria::MayExist,
            mode: StorageMode::Backing,
            version_token: None,
        }
    }

    /// Override the existence criteria.
    pub fn with_existence(mut self, existence: ExistenceCriteria) -> Self {
        self.existence = existence;
        self
    }
}

/// Access mode requested for a handle over a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandleMode {
    Read,
    Write,
    ReadWrite,
}

impl HandleMode {
    /// Whether this mode (what the store/type permits) covers a requested
    /// mode. Handle creation fails when the request exceeds the grant.
    pub fn permits(&self, requested: HandleMode) -> bool {
        match self {
            HandleMode::ReadWrite => true,
            HandleMode::Read => requested == HandleMode::Read,
            HandleMode::Write => requested == HandleMode::Write,
        }
    }
}

/// Check a requested handle mode against what the store permits.
pub fn check_handle_mode(permitted: HandleMode, requested: HandleMode) -> StorageResult<()> {
    if permitted.permits(requested) {
        Ok(())
    } else {
        Err(StorageError::InvalidMessage(format!(
            "requested handle mode {requested:?} exceeds permitted {permitted:?}"
        )))
    }
}

/// Errors produced by the storage stack.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Driver unavailable: {0}")]
    DriverUnavailable(String),

    #[error("Store is inoperable: {0}")]
    Inoperable(String),

    #[error("No data exists at {0}")]
    NotFound(String),

    #[error("Data already exists at {0}")]
    AlreadyExists(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("CRDT error: {0}")]
    Crdt(#[from] CrdtError),

    #[error("Schema violation: {0}")]
    Schema(#[from] SchemaError),

    #[error("Common error: {0}")]
    Common(#[from] CommonError),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_mode_permits() {
        assert!(HandleMode::ReadWrite.permits(HandleMode::Read));
        assert!(HandleMode::ReadWrite.permits(HandleMode::ReadWrite));
        assert!(HandleMode::Read.permits(HandleMode::Read));
        assert!(!HandleMode::Read.permits(HandleMode::ReadWrite));
        assert!(!HandleMode::Write.permits(HandleMode::Read));
        assert!(check_handle_mode(HandleMode::Read, HandleMode::Write).is_err());
    }
}
