//! Entity schemas.
//!
//! A schema names an entity shape: which singleton and collection fields
//! exist, their primitive types, and an optional refinement predicate
//! restricting admissible field values. Schemas hash deterministically so
//! that structurally equal schemas are interchangeable across stores.

use crate::expression::{EvalType, Expression, Predicate};
use crate::{SchemaError, SchemaResult};
use arcs_common::PropertyValue;
use arcs_crdt::RawEntity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Primitive type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Text,
    Number,
    Boolean,
}

impl FieldType {
    /// Whether a value inhabits this field type.
    pub fn admits(&self, value: &PropertyValue) -> bool {
        matches!(
            (self, value),
            (FieldType::Text, PropertyValue::Text(_))
                | (FieldType::Number, PropertyValue::Number(_))
                | (FieldType::Boolean, PropertyValue::Boolean(_))
        )
    }

    /// The corresponding expression type.
    pub fn eval_type(&self) -> EvalType {
        match self {
            FieldType::Text => EvalType::Text,
            FieldType::Number => EvalType::Number,
            FieldType::Boolean => EvalType::Boolean,
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::Text => write!(f, "Text"),
            FieldType::Number => write!(f, "Number"),
            FieldType::Boolean => write!(f, "Boolean"),
        }
    }
}

/// An entity schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Names this schema answers to, most specific first.
    pub names: Vec<String>,
    /// Singleton fields by name.
    pub singletons: BTreeMap<String, FieldType>,
    /// Collection fields by name.
    pub collections: BTreeMap<String, FieldType>,
    /// Optional refinement over the entity's singleton fields.
    pub refinement: Option<Predicate>,
    /// Per-field refinements, each over its own field only.
    pub field_refinements: BTreeMap<String, Predicate>,
}

impl Schema {
    /// Create a schema with the given names and no fields.
    pub fn new(names: Vec<String>) -> Self {
        Self {
            names,
            singletons: BTreeMap::new(),
            collections: BTreeMap::new(),
            refinement: None,
            field_refinements: BTreeMap::new(),
        }
    }

    /// Builder-style singleton field declaration.
    pub fn with_singleton(mut self, name: &str, field_type: FieldType) -> Self {
        self.singletons.insert(name.to_string(), field_type);
        self
    }

    /// Builder-style collection field declaration.
    pub fn with_collection(mut self, name: &str, field_type: FieldType) -> Self {
        self.collections.insert(name.to_string(), field_type);
        self
    }

    /// Attach a refinement predicate. Every field the predicate references
    /// must be a declared field of matching type.
    pub fn with_refinement(mut self, refinement: Predicate) -> SchemaResult<Self> {
        for name in refinement.expression().field_names() {
            self.field_type(&name)
                .ok_or_else(|| SchemaError::UnknownField(name.clone()))?;
        }
        self.refinement = Some(refinement.normalized());
        Ok(self)
    }

    /// Attach a refinement to a single field. The predicate may reference
    /// only that field, and the field must be declared.
    pub fn with_field_refinement(
        mut self,
        field: &str,
        refinement: Predicate,
    ) -> SchemaResult<Self> {
        self.field_type(field)
            .ok_or_else(|| SchemaError::UnknownField(field.to_string()))?;
        for name in refinement.expression().field_names() {
            if name != field {
                return Err(SchemaError::UnknownField(format!(
                    "field refinement on '{field}' cannot reference '{name}'"
                )));
            }
        }
        self.field_refinements
            .insert(field.to_string(), refinement.normalized());
        Ok(self)
    }

    /// Look up the declared type of a field, singleton or collection.
    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.singletons
            .get(name)
            .or_else(|| self.collections.get(name))
            .copied()
    }

    /// Build a typed field reference for refinement expressions, using
    /// this schema as the type environment.
    pub fn field_ref(&self, name: &str) -> SchemaResult<Expression> {
        let field_type = self
            .field_type(name)
            .ok_or_else(|| SchemaError::UnknownField(name.to_string()))?;
        Ok(Expression::field(name, field_type.eval_type()))
    }

    /// Canonical textual rendering: sorted names, sorted fields, and the
    /// normalized refinement. Structural equality of schemas is equality
    /// of this string.
    pub fn canonical_string(&self) -> String {
        let mut names = self.names.clone();
        names.sort();
        let mut out = format!("schema {}\n", names.join(" "));
        for (field, field_type) in &self.singletons {
            out.push_str(&format!("  {field}: {field_type}\n"));
        }
        for (field, field_type) in &self.collections {
            out.push_str(&format!("  {field}: [{field_type}]\n"));
        }
        for (field, refinement) in &self.field_refinements {
            out.push_str(&format!("  {field} where {refinement}\n"));
        }
        if let Some(refinement) = &self.refinement {
            out.push_str(&format!("  where {refinement}\n"));
        }
        out
    }

    /// Deterministic hex sha256 over the canonical textual form.
    pub fn hash(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Validate an entity against this schema: every present field must be
    /// declared with a matching type, and the refinement (if any) must
    /// accept the entity's singleton values. Rejection means the write
    /// must not commit.
    pub fn validate_entity(&self, entity: &RawEntity) -> SchemaResult<()> {
        for (field, value) in &entity.singletons {
            let field_type = self
                .singletons
                .get(field)
                .ok_or_else(|| SchemaError::UnknownField(field.clone()))?;
            if let Some(value) = value {
                if !field_type.admits(value) {
                    return Err(SchemaError::TypeMismatch {
                        expected: field_type.to_string(),
                        found: value.type_name().to_string(),
                    });
                }
            }
        }
        for (field, values) in &entity.collections {
            let field_type = self
                .collections
                .get(field)
                .ok_or_else(|| SchemaError::UnknownField(field.clone()))?;
            for value in values {
                if !field_type.admits(value) {
                    return Err(SchemaError::TypeMismatch {
                        expected: field_type.to_string(),
                        found: value.type_name().to_string(),
                    });
                }
            }
        }

        let record: BTreeMap<String, PropertyValue> = entity
            .singletons
            .iter()
            .filter_map(|(k, v)| v.clone().map(|v| (k.clone(), v)))
            .collect();

        for (field, refinement) in &self.field_refinements {
            if !record.contains_key(field) {
                continue;
            }
            if !refinement.validate(&record)? {
                return Err(SchemaError::SchemaViolation(format!(
                    "entity {} fails field refinement on '{field}'",
                    entity.id
                )));
            }
        }

        if let Some(refinement) = &self.refinement {
            if !refinement.validate(&record)? {
                return Err(SchemaError::SchemaViolation(format!(
                    "entity {} fails refinement {refinement}",
                    entity.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::BinaryOp;
    use arcs_common::ReferenceId;

    fn person_schema() -> Schema {
        let schema = Schema::new(vec!["Person".to_string()])
            .with_singleton("name", FieldType::Text)
            .with_singleton("age", FieldType::Number);
        let age = schema.field_ref("age").unwrap();
        let refinement = Predicate::new(
            Expression::binary(age, BinaryOp::GreaterThanOrEqual, Expression::number(18.0))
                .unwrap(),
        )
        .unwrap();
        schema.with_refinement(refinement).unwrap()
    }

    fn person(age: f64) -> RawEntity {
        RawEntity::new(ReferenceId::from("an-id"))
            .with_singleton("name", PropertyValue::Text("bob".to_string()))
            .with_singleton("age", PropertyValue::Number(age))
    }

    #[test]
    fn test_field_lookup() {
        let schema = person_schema();
        assert_eq!(schema.field_type("age"), Some(FieldType::Number));
        assert_eq!(schema.field_type("missing"), None);
        assert!(schema.field_ref("missing").is_err());
    }

    #[test]
    fn test_refinement_must_reference_declared_fields() {
        let schema = Schema::new(vec!["Thing".to_string()]);
        let stray = Predicate::new(
            Expression::binary(
                Expression::field("volume", EvalType::Number),
                BinaryOp::GreaterThan,
                Expression::number(0.0),
            )
            .unwrap(),
        )
        .unwrap();
        assert!(matches!(
            schema.with_refinement(stray),
            Err(SchemaError::UnknownField(_))
        ));
    }

    #[test]
    fn test_validate_entity() {
        let schema = person_schema();
        assert!(schema.validate_entity(&person(42.0)).is_ok());
        assert!(matches!(
            schema.validate_entity(&person(12.0)),
            Err(SchemaError::SchemaViolation(_))
        ));
    }

    #[test]
    fn test_field_refinement() {
        let schema = Schema::new(vec!["Person".to_string()])
            .with_singleton("name", FieldType::Text)
            .with_singleton("age", FieldType::Number);
        let age = schema.field_ref("age").unwrap();
        let non_negative = Predicate::new(
            Expression::binary(age, BinaryOp::GreaterThanOrEqual, Expression::number(0.0))
                .unwrap(),
        )
        .unwrap();
        let schema = schema.with_field_refinement("age", non_negative).unwrap();

        assert!(schema.validate_entity(&person(5.0)).is_ok());
        assert!(matches!(
            schema.validate_entity(&person(-1.0)),
            Err(SchemaError::SchemaViolation(_))
        ));

        // A field refinement may only reference its own field.
        let name_ref = schema.field_ref("name").unwrap();
        let crossed = Predicate::new(
            Expression::binary(name_ref, BinaryOp::Equals, Expression::text("bob")).unwrap(),
        )
        .unwrap();
        assert!(schema.with_field_refinement("age", crossed).is_err());
    }

    #[test]
    fn test_validate_rejects_wrong_type() {
        let schema = person_schema();
        let entity = RawEntity::new(ReferenceId::from("an-id"))
            .with_singleton("name", PropertyValue::Number(3.0))
            .with_singleton("age", PropertyValue::Number(42.0));
        assert!(matches!(
            schema.validate_entity(&entity),
            Err(SchemaError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_undeclared_field() {
        let schema = person_schema();
        let entity = person(42.0).with_singleton("shoe", PropertyValue::Number(9.0));
        assert!(matches!(
            schema.validate_entity(&entity),
            Err(SchemaError::UnknownField(_))
        ));
    }

    #[test]
    fn test_hash_is_stable_and_order_independent() {
        let a = Schema::new(vec!["Person".to_string()])
            .with_singleton("name", FieldType::Text)
            .with_singleton("age", FieldType::Number);
        let b = Schema::new(vec!["Person".to_string()])
            .with_singleton("age", FieldType::Number)
            .with_singleton("name", FieldType::Text);
        assert_eq!(a.hash(), b.hash());

        let c = a.clone().with_collection("tags", FieldType::Text);
        assert_ne!(a.hash(), c.hash());
    }
}
