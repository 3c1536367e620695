//! # Arcs Schema Crate
//!
//! Schemas describe the shape of entities flowing through handles: named
//! singleton and collection fields over primitive types, optionally
//! restricted by a refinement predicate. This crate provides the schema
//! types, the typed refinement expression algebra with normalization, and
//! the numeric range derivation used to reason about refinements
//! symbolically.

use arcs_common::CommonError;

pub mod expression;
pub mod range;
pub mod schema;

pub use expression::{BinaryOp, EvalType, Expression, Predicate, UnaryOp};
pub use range::{Boundary, BoundaryKind, Range, Segment};
pub use schema::{FieldType, Schema};

/// Errors produced by schema construction, refinement type checking,
/// evaluation, and range derivation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchemaError {
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Missing field value: {0}")]
    MissingField(String),

    #[error("Refinement evaluation error: {0}")]
    EvaluationError(String),

    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Invalid segment: {0}")]
    InvalidSegment(String),

    #[error("Unsupported refinement for range derivation: {0}")]
    UnsupportedRefinement(String),

    #[error("Common error: {0}")]
    Common(#[from] CommonError),
}

/// Result type for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;
