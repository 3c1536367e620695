//! Hierarchical storage keys.
//!
//! A storage key is an opaque hierarchical identifier: a protocol plus a
//! component path. Stores derive per-entity child keys from a base key, and
//! reference-mode stores compose a backing key with a container key.

use crate::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};

/// An opaque hierarchical storage key, rendered as
/// `protocol://component0/component1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorageKey {
    protocol: String,
    components: Vec<String>,
}

impl StorageKey {
    /// Create a root key for the given protocol.
    pub fn new(protocol: &str) -> Self {
        Self {
            protocol: protocol.to_string(),
            components: Vec::new(),
        }
    }

    /// Create a key with an explicit component path.
    pub fn with_components(protocol: &str, components: Vec<String>) -> Self {
        Self {
            protocol: protocol.to_string(),
            components,
        }
    }

    /// The key's protocol.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// The key's component path.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Derive a child key by appending a component.
    pub fn child_key_with_component(&self, component: &str) -> StorageKey {
        let mut components = self.components.clone();
        components.push(component.to_string());
        StorageKey {
            protocol: self.protocol.clone(),
            components,
        }
    }

    /// Parse a key from its `protocol://a/b` rendering.
    pub fn parse(s: &str) -> StorageResult<StorageKey> {
        let (protocol, rest) = s
            .split_once("://")
            .ok_or_else(|| StorageError::InvalidKey(format!("missing protocol in '{s}'")))?;
        if protocol.is_empty() {
            return Err(StorageError::InvalidKey(format!("empty protocol in '{s}'")));
        }
        let components = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split('/').map(str::to_string).collect()
        };
        Ok(StorageKey {
            protocol: protocol.to_string(),
            components,
        })
    }
}

impl std::fmt::Display for StorageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.protocol, self.components.join("/"))
    }
}

/// The composite key of a reference-mode store: where entity bodies live
/// (`backing`) and where the reference container lives (`storage`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceModeStorageKey {
    pub backing: StorageKey,
    pub storage: StorageKey,
}

impl ReferenceModeStorageKey {
    pub fn new(backing: StorageKey, storage: StorageKey) -> Self {
        Self { backing, storage }
    }
}

impl std::fmt::Display for ReferenceModeStorageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "reference-mode://{{{}}}{{{}}}", self.backing, self.storage)
    }
}
