//! # Arcs Common Crate
//! This crate provides common data structures, types, utilities, and error
//! definitions shared across the Arcs core crates. It aims to reduce code
//! duplication, ensure consistency, and simplify dependencies.

use serde::{Deserialize, Serialize};

pub const ARCS_CORE_VERSION: &str = "0.2.0";

/// Opaque identifier of an entity, stable across stores and replicas.
///
/// Reference ids are minted by the surrounding runtime; the core treats them
/// as uninterpreted strings and only ever compares them for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReferenceId(pub String);

impl ReferenceId {
    /// Create a new ReferenceId from a string.
    pub fn new(id: String) -> Self {
        ReferenceId(id)
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ReferenceId {
    fn from(s: String) -> Self {
        ReferenceId(s)
    }
}

impl From<&str> for ReferenceId {
    fn from(s: &str) -> Self {
        ReferenceId(s.to_string())
    }
}

/// A primitive field value as seen by particles.
///
/// These are the only value shapes the core stores inside entity fields.
/// Schema field types (`Text`, `Number`, `Boolean`) correspond one-to-one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum PropertyValue {
    Text(String),
    Number(f64),
    Boolean(bool),
}

impl PropertyValue {
    /// Name of the primitive type, matching schema field type names.
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::Text(_) => "Text",
            PropertyValue::Number(_) => "Number",
            PropertyValue::Boolean(_) => "Boolean",
        }
    }

    /// Render as a JSON value for diagnostics and particle-facing views.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            PropertyValue::Text(s) => serde_json::Value::String(s.clone()),
            PropertyValue::Number(n) => serde_json::json!(n),
            PropertyValue::Boolean(b) => serde_json::Value::Bool(*b),
        }
    }
}

impl std::fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyValue::Text(s) => write!(f, "{s}"),
            PropertyValue::Number(n) => write!(f, "{n}"),
            PropertyValue::Boolean(b) => write!(f, "{b}"),
        }
    }
}

/// Values that can live inside observed-remove CRDT sets.
///
/// Every stored element must expose a stable unique id so that concurrent
/// adds of the same logical value collapse to one element and removes can
/// name exactly what they observed.
pub trait Referenceable: Clone {
    /// Stable unique id for this value.
    fn unique_id(&self) -> String;
}

impl Referenceable for PropertyValue {
    /// Primitives are identified by their canonical rendering, so two adds
    /// of the same text or number are the same element.
    fn unique_id(&self) -> String {
        match self {
            PropertyValue::Text(s) => format!("txt:{s}"),
            PropertyValue::Number(n) => format!("num:{n}"),
            PropertyValue::Boolean(b) => format!("bool:{b}"),
        }
    }
}

/// Errors shared across Arcs core crates.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum CommonError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal invariant violated: {0}")]
    InternalError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!ARCS_CORE_VERSION.is_empty());
    }

    #[test]
    fn test_reference_id_creation() {
        let id = ReferenceId::new("an-id".to_string());
        assert_eq!(id.as_str(), "an-id");
        assert_eq!(id.to_string(), "an-id");
        assert_eq!(ReferenceId::from("an-id"), id);
    }

    #[test]
    fn test_property_value_type_names() {
        assert_eq!(PropertyValue::Text("bob".to_string()).type_name(), "Text");
        assert_eq!(PropertyValue::Number(42.0).type_name(), "Number");
        assert_eq!(PropertyValue::Boolean(true).type_name(), "Boolean");
    }

    #[test]
    fn test_property_value_unique_ids() {
        assert_eq!(
            PropertyValue::Text("bob".to_string()).unique_id(),
            "txt:bob"
        );
        assert_eq!(PropertyValue::Number(42.0).unique_id(), "num:42");
        assert_eq!(PropertyValue::Boolean(false).unique_id(), "bool:false");
        // Identical values collapse to identical ids.
        assert_eq!(
            PropertyValue::Number(7.0).unique_id(),
            PropertyValue::Number(7.0).unique_id()
        );
    }

    #[test]
    fn test_property_value_json() {
        assert_eq!(
            PropertyValue::Text("x".to_string()).to_json(),
            serde_json::json!("x")
        );
        assert_eq!(PropertyValue::Number(1.5).to_json(), serde_json::json!(1.5));
    }
}
