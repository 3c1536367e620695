//! Typed refinement expression trees.
//!
//! A refinement is a boolean expression over one implicit record's fields.
//! Nodes are type-checked at construction: there is no implicit coercion,
//! so an expression that builds successfully always evaluates to its
//! statically derived type (or reports a data problem, never a shape one).

use crate::{SchemaError, SchemaResult};
use arcs_common::PropertyValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Statically derived type of an expression node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvalType {
    Number,
    Boolean,
    Text,
}

impl std::fmt::Display for EvalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalType::Number => write!(f, "Number"),
            EvalType::Boolean => write!(f, "Boolean"),
            EvalType::Text => write!(f, "Text"),
        }
    }
}

impl EvalType {
    /// The type of a primitive value.
    pub fn of(value: &PropertyValue) -> EvalType {
        match value {
            PropertyValue::Text(_) => EvalType::Text,
            PropertyValue::Number(_) => EvalType::Number,
            PropertyValue::Boolean(_) => EvalType::Boolean,
        }
    }
}

/// Binary operators over expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    And,
    Or,
    LessThan,
    GreaterThan,
    LessThanOrEqual,
    GreaterThanOrEqual,
    Equals,
    NotEquals,
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl BinaryOp {
    /// True for operators whose operand order can be flipped around a
    /// comparison (used to canonicalize the field onto the left).
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::LessThan
                | BinaryOp::GreaterThan
                | BinaryOp::LessThanOrEqual
                | BinaryOp::GreaterThanOrEqual
                | BinaryOp::Equals
                | BinaryOp::NotEquals
        )
    }

    /// The operator with its operands exchanged: `a < b` iff `b > a`.
    pub fn flipped(&self) -> BinaryOp {
        match self {
            BinaryOp::LessThan => BinaryOp::GreaterThan,
            BinaryOp::GreaterThan => BinaryOp::LessThan,
            BinaryOp::LessThanOrEqual => BinaryOp::GreaterThanOrEqual,
            BinaryOp::GreaterThanOrEqual => BinaryOp::LessThanOrEqual,
            other => *other,
        }
    }

    /// Check operand types and return the result type.
    fn check(&self, left: EvalType, right: EvalType) -> SchemaResult<EvalType> {
        let mismatch = |expected: &str, found: EvalType| {
            Err(SchemaError::TypeMismatch {
                expected: expected.to_string(),
                found: found.to_string(),
            })
        };
        match self {
            BinaryOp::And | BinaryOp::Or => {
                if left != EvalType::Boolean {
                    return mismatch("Boolean", left);
                }
                if right != EvalType::Boolean {
                    return mismatch("Boolean", right);
                }
                Ok(EvalType::Boolean)
            }
            BinaryOp::LessThan
            | BinaryOp::GreaterThan
            | BinaryOp::LessThanOrEqual
            | BinaryOp::GreaterThanOrEqual => {
                if left != EvalType::Number {
                    return mismatch("Number", left);
                }
                if right != EvalType::Number {
                    return mismatch("Number", right);
                }
                Ok(EvalType::Boolean)
            }
            BinaryOp::Equals | BinaryOp::NotEquals => {
                if left != right {
                    return mismatch(&left.to_string(), right);
                }
                Ok(EvalType::Boolean)
            }
            BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide => {
                if left != EvalType::Number {
                    return mismatch("Number", left);
                }
                if right != EvalType::Number {
                    return mismatch("Number", right);
                }
                Ok(EvalType::Number)
            }
        }
    }
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::LessThan => "<",
            BinaryOp::GreaterThan => ">",
            BinaryOp::LessThanOrEqual => "<=",
            BinaryOp::GreaterThanOrEqual => ">=",
            BinaryOp::Equals => "==",
            BinaryOp::NotEquals => "!=",
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
        };
        write!(f, "{symbol}")
    }
}

/// Unary operators over expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Negate,
}

impl UnaryOp {
    fn check(&self, operand: EvalType) -> SchemaResult<EvalType> {
        match self {
            UnaryOp::Not if operand == EvalType::Boolean => Ok(EvalType::Boolean),
            UnaryOp::Negate if operand == EvalType::Number => Ok(EvalType::Number),
            UnaryOp::Not => Err(SchemaError::TypeMismatch {
                expected: "Boolean".to_string(),
                found: operand.to_string(),
            }),
            UnaryOp::Negate => Err(SchemaError::TypeMismatch {
                expected: "Number".to_string(),
                found: operand.to_string(),
            }),
        }
    }
}

/// A refinement expression tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    NumberLiteral(f64),
    BooleanLiteral(bool),
    TextLiteral(String),
    /// Reference to a field of the implicit record; the type comes from the
    /// schema acting as the type environment at construction time.
    Field { name: String, field_type: EvalType },
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
}

impl Expression {
    pub fn number(n: f64) -> Expression {
        Expression::NumberLiteral(n)
    }

    pub fn boolean(b: bool) -> Expression {
        Expression::BooleanLiteral(b)
    }

    pub fn text(s: &str) -> Expression {
        Expression::TextLiteral(s.to_string())
    }

    pub fn field(name: &str, field_type: EvalType) -> Expression {
        Expression::Field {
            name: name.to_string(),
            field_type,
        }
    }

    /// Build a type-checked binary node.
    pub fn binary(left: Expression, op: BinaryOp, right: Expression) -> SchemaResult<Expression> {
        op.check(left.eval_type(), right.eval_type())?;
        Ok(Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// Build a type-checked unary node.
    pub fn unary(op: UnaryOp, operand: Expression) -> SchemaResult<Expression> {
        op.check(operand.eval_type())?;
        Ok(Expression::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    /// The statically derived result type of this node.
    pub fn eval_type(&self) -> EvalType {
        match self {
            Expression::NumberLiteral(_) => EvalType::Number,
            Expression::BooleanLiteral(_) => EvalType::Boolean,
            Expression::TextLiteral(_) => EvalType::Text,
            Expression::Field { field_type, .. } => *field_type,
            Expression::Binary { op, left, right } => op
                .check(left.eval_type(), right.eval_type())
                .unwrap_or(EvalType::Boolean),
            Expression::Unary { op, operand } => {
                op.check(operand.eval_type()).unwrap_or(EvalType::Boolean)
            }
        }
    }

    /// Names of every field referenced by this expression.
    pub fn field_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_field_names(&mut names);
        names.sort();
        names.dedup();
        names
    }

    fn collect_field_names(&self, out: &mut Vec<String>) {
        match self {
            Expression::Field { name, .. } => out.push(name.clone()),
            Expression::Binary { left, right, .. } => {
                left.collect_field_names(out);
                right.collect_field_names(out);
            }
            Expression::Unary { operand, .. } => operand.collect_field_names(out),
            _ => {}
        }
    }

    /// Evaluate the expression by substituting field values from the
    /// record.
    pub fn evaluate(
        &self,
        record: &BTreeMap<String, PropertyValue>,
    ) -> SchemaResult<PropertyValue> {
        match self {
            Expression::NumberLiteral(n) => Ok(PropertyValue::Number(*n)),
            Expression::BooleanLiteral(b) => Ok(PropertyValue::Boolean(*b)),
            Expression::TextLiteral(s) => Ok(PropertyValue::Text(s.clone())),
            Expression::Field { name, field_type } => {
                let value = record
                    .get(name)
                    .ok_or_else(|| SchemaError::MissingField(name.clone()))?;
                if EvalType::of(value) != *field_type {
                    return Err(SchemaError::TypeMismatch {
                        expected: field_type.to_string(),
                        found: EvalType::of(value).to_string(),
                    });
                }
                Ok(value.clone())
            }
            Expression::Binary { op, left, right } => {
                let l = left.evaluate(record)?;
                let r = right.evaluate(record)?;
                Self::apply_binary(*op, l, r)
            }
            Expression::Unary { op, operand } => {
                let v = operand.evaluate(record)?;
                match (op, v) {
                    (UnaryOp::Not, PropertyValue::Boolean(b)) => Ok(PropertyValue::Boolean(!b)),
                    (UnaryOp::Negate, PropertyValue::Number(n)) => Ok(PropertyValue::Number(-n)),
                    (_, v) => Err(SchemaError::EvaluationError(format!(
                        "operand {v} does not match unary operator"
                    ))),
                }
            }
        }
    }

    fn apply_binary(
        op: BinaryOp,
        left: PropertyValue,
        right: PropertyValue,
    ) -> SchemaResult<PropertyValue> {
        use PropertyValue::{Boolean, Number};
        match (op, &left, &right) {
            (BinaryOp::And, Boolean(l), Boolean(r)) => Ok(Boolean(*l && *r)),
            (BinaryOp::Or, Boolean(l), Boolean(r)) => Ok(Boolean(*l || *r)),
            (BinaryOp::LessThan, Number(l), Number(r)) => Ok(Boolean(l < r)),
            (BinaryOp::GreaterThan, Number(l), Number(r)) => Ok(Boolean(l > r)),
            (BinaryOp::LessThanOrEqual, Number(l), Number(r)) => Ok(Boolean(l <= r)),
            (BinaryOp::GreaterThanOrEqual, Number(l), Number(r)) => Ok(Boolean(l >= r)),
            (BinaryOp::Equals, l, r) => {
                if EvalType::of(l) != EvalType::of(r) {
                    return Err(SchemaError::TypeMismatch {
                        expected: EvalType::of(l).to_string(),
                        found: EvalType::of(r).to_string(),
                    });
                }
                Ok(Boolean(l == r))
            }
            (BinaryOp::NotEquals, l, r) => {
                if EvalType::of(l) != EvalType::of(r) {
                    return Err(SchemaError::TypeMismatch {
                        expected: EvalType::of(l).to_string(),
                        found: EvalType::of(r).to_string(),
                    });
                }
                Ok(Boolean(l != r))
            }
            (BinaryOp::Add, Number(l), Number(r)) => Ok(Number(l + r)),
            (BinaryOp::Subtract, Number(l), Number(r)) => Ok(Number(l - r)),
            (BinaryOp::Multiply, Number(l), Number(r)) => Ok(Number(l * r)),
            (BinaryOp::Divide, Number(l), Number(r)) => {
                if *r == 0.0 {
                    return Err(SchemaError::EvaluationError(
                        "division by zero".to_string(),
                    ));
                }
                Ok(Number(l / r))
            }
            (op, l, r) => Err(SchemaError::EvaluationError(format!(
                "operands {l} and {r} do not match operator {op}"
            ))),
        }
    }

    fn is_literal(&self) -> bool {
        matches!(
            self,
            Expression::NumberLiteral(_)
                | Expression::BooleanLiteral(_)
                | Expression::TextLiteral(_)
        )
    }

    fn literal_of(value: PropertyValue) -> Expression {
        match value {
            PropertyValue::Number(n) => Expression::NumberLiteral(n),
            PropertyValue::Boolean(b) => Expression::BooleanLiteral(b),
            PropertyValue::Text(s) => Expression::TextLiteral(s),
        }
    }

    /// Rewrite this expression into its normal form.
    ///
    /// The rewrite is idempotent and consists of bottom-up constant
    /// folding, canonicalizing comparisons so a lone field reference lands
    /// on the left, and the boolean identity laws (including double
    /// negation elimination).
    pub fn normalized(&self) -> Expression {
        match self {
            Expression::Binary { op, left, right } => {
                let left = left.normalized();
                let right = right.normalized();

                // Canonicalize `10 < age` into `age > 10`.
                let (op, left, right) = if op.is_comparison()
                    && matches!(right, Expression::Field { .. })
                    && !matches!(left, Expression::Field { .. })
                {
                    (op.flipped(), right, left)
                } else {
                    (*op, left, right)
                };

                // Identity laws.
                match (op, &left, &right) {
                    (BinaryOp::And, Expression::BooleanLiteral(true), _) => return right,
                    (BinaryOp::And, _, Expression::BooleanLiteral(true)) => return left,
                    (BinaryOp::And, Expression::BooleanLiteral(false), _)
                    | (BinaryOp::And, _, Expression::BooleanLiteral(false)) => {
                        return Expression::BooleanLiteral(false)
                    }
                    (BinaryOp::Or, Expression::BooleanLiteral(false), _) => return right,
                    (BinaryOp::Or, _, Expression::BooleanLiteral(false)) => return left,
                    (BinaryOp::Or, Expression::BooleanLiteral(true), _)
                    | (BinaryOp::Or, _, Expression::BooleanLiteral(true)) => {
                        return Expression::BooleanLiteral(true)
                    }
                    _ => {}
                }

                let node = Expression::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                };
                node.folded()
            }
            Expression::Unary { op, operand } => {
                let operand = operand.normalized();
                if *op == UnaryOp::Not {
                    if let Expression::Unary {
                        op: UnaryOp::Not,
                        operand: inner,
                    } = &operand
                    {
                        return (**inner).clone();
                    }
                }
                let node = Expression::Unary {
                    op: *op,
                    operand: Box::new(operand),
                };
                node.folded()
            }
            other => other.clone(),
        }
    }

    /// Fold a node whose operands are all literals into a literal.
    /// Evaluation failures (e.g. division by zero) leave the node intact.
    fn folded(self) -> Expression {
        let foldable = match &self {
            Expression::Binary { left, right, .. } => left.is_literal() && right.is_literal(),
            Expression::Unary { operand, .. } => operand.is_literal(),
            _ => false,
        };
        if !foldable {
            return self;
        }
        match self.evaluate(&BTreeMap::new()) {
            Ok(value) => Expression::literal_of(value),
            Err(_) => self,
        }
    }
}

impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expression::NumberLiteral(n) => write!(f, "{n}"),
            Expression::BooleanLiteral(b) => write!(f, "{b}"),
            Expression::TextLiteral(s) => write!(f, "'{s}'"),
            Expression::Field { name, .. } => write!(f, "{name}"),
            Expression::Binary { op, left, right } => write!(f, "({left} {op} {right})"),
            Expression::Unary {
                op: UnaryOp::Not,
                operand,
            } => write!(f, "(not {operand})"),
            Expression::Unary {
                op: UnaryOp::Negate,
                operand,
            } => write!(f, "(- {operand})"),
        }
    }
}

/// A refinement predicate: a Boolean-typed expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    expression: Expression,
}

impl Predicate {
    /// Wrap an expression; it must be Boolean-typed.
    pub fn new(expression: Expression) -> SchemaResult<Predicate> {
        if expression.eval_type() != EvalType::Boolean {
            return Err(SchemaError::TypeMismatch {
                expected: "Boolean".to_string(),
                found: expression.eval_type().to_string(),
            });
        }
        Ok(Predicate { expression })
    }

    /// The wrapped expression.
    pub fn expression(&self) -> &Expression {
        &self.expression
    }

    /// The predicate in normal form.
    pub fn normalized(&self) -> Predicate {
        Predicate {
            expression: self.expression.normalized(),
        }
    }

    /// Evaluate the predicate over a record of field values.
    ///
    /// A non-Boolean result is an error, not a false.
    pub fn validate(&self, record: &BTreeMap<String, PropertyValue>) -> SchemaResult<bool> {
        match self.expression.evaluate(record)? {
            PropertyValue::Boolean(b) => Ok(b),
            other => Err(SchemaError::EvaluationError(format!(
                "refinement evaluated to non-Boolean value {other}"
            ))),
        }
    }
}

impl std::fmt::Display for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.expression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn age() -> Expression {
        Expression::field("age", EvalType::Number)
    }

    fn record(age_value: f64) -> BTreeMap<String, PropertyValue> {
        let mut record = BTreeMap::new();
        record.insert("age".to_string(), PropertyValue::Number(age_value));
        record
    }

    #[test]
    fn test_construction_type_checks() {
        // Number < Number is fine.
        assert!(Expression::binary(age(), BinaryOp::LessThan, Expression::number(10.0)).is_ok());
        // Boolean < Number is rejected.
        assert!(matches!(
            Expression::binary(
                Expression::boolean(true),
                BinaryOp::LessThan,
                Expression::number(10.0)
            ),
            Err(SchemaError::TypeMismatch { .. })
        ));
        // Equality requires same-type operands.
        assert!(Expression::binary(
            Expression::text("a"),
            BinaryOp::Equals,
            Expression::number(1.0)
        )
        .is_err());
        // Logical ops require Booleans.
        assert!(Expression::binary(
            Expression::number(1.0),
            BinaryOp::And,
            Expression::boolean(true)
        )
        .is_err());
        assert!(Expression::unary(UnaryOp::Not, Expression::number(1.0)).is_err());
    }

    #[test]
    fn test_evaluation() {
        let expr = Expression::binary(age(), BinaryOp::GreaterThanOrEqual, Expression::number(18.0))
            .unwrap();
        assert_eq!(
            expr.evaluate(&record(21.0)).unwrap(),
            PropertyValue::Boolean(true)
        );
        assert_eq!(
            expr.evaluate(&record(12.0)).unwrap(),
            PropertyValue::Boolean(false)
        );
    }

    #[test]
    fn test_missing_field_is_an_error() {
        let expr = Expression::binary(age(), BinaryOp::GreaterThan, Expression::number(0.0))
            .unwrap();
        assert!(matches!(
            expr.evaluate(&BTreeMap::new()),
            Err(SchemaError::MissingField(_))
        ));
    }

    #[test]
    fn test_division_by_zero() {
        let expr = Expression::binary(
            Expression::number(1.0),
            BinaryOp::Divide,
            Expression::number(0.0),
        )
        .unwrap();
        assert!(expr.evaluate(&BTreeMap::new()).is_err());
        // And folding leaves the node alone rather than producing garbage.
        assert_eq!(expr.normalized(), expr);
    }

    #[test]
    fn test_constant_folding() {
        let expr = Expression::binary(
            Expression::number(2.0),
            BinaryOp::Add,
            Expression::number(3.0),
        )
        .unwrap();
        assert_eq!(expr.normalized(), Expression::NumberLiteral(5.0));

        let nested = Expression::binary(
            age(),
            BinaryOp::LessThan,
            Expression::binary(
                Expression::number(60.0),
                BinaryOp::Add,
                Expression::number(5.0),
            )
            .unwrap(),
        )
        .unwrap();
        assert_eq!(
            nested.normalized(),
            Expression::binary(age(), BinaryOp::LessThan, Expression::number(65.0)).unwrap()
        );
    }

    #[test]
    fn test_comparison_canonicalization() {
        // 18 <= age becomes age >= 18.
        let expr = Expression::binary(Expression::number(18.0), BinaryOp::LessThanOrEqual, age())
            .unwrap();
        assert_eq!(
            expr.normalized(),
            Expression::binary(age(), BinaryOp::GreaterThanOrEqual, Expression::number(18.0))
                .unwrap()
        );
    }

    #[test]
    fn test_identity_laws() {
        let p = Expression::binary(age(), BinaryOp::GreaterThan, Expression::number(0.0)).unwrap();

        let and_true =
            Expression::binary(p.clone(), BinaryOp::And, Expression::boolean(true)).unwrap();
        assert_eq!(and_true.normalized(), p);

        let and_false =
            Expression::binary(p.clone(), BinaryOp::And, Expression::boolean(false)).unwrap();
        assert_eq!(and_false.normalized(), Expression::BooleanLiteral(false));

        let or_false =
            Expression::binary(p.clone(), BinaryOp::Or, Expression::boolean(false)).unwrap();
        assert_eq!(or_false.normalized(), p);

        let or_true =
            Expression::binary(p.clone(), BinaryOp::Or, Expression::boolean(true)).unwrap();
        assert_eq!(or_true.normalized(), Expression::BooleanLiteral(true));

        let double_not = Expression::unary(
            UnaryOp::Not,
            Expression::unary(UnaryOp::Not, p.clone()).unwrap(),
        )
        .unwrap();
        assert_eq!(double_not.normalized(), p);
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let expr = Expression::binary(
            Expression::unary(
                UnaryOp::Not,
                Expression::binary(Expression::number(18.0), BinaryOp::GreaterThan, age()).unwrap(),
            )
            .unwrap(),
            BinaryOp::And,
            Expression::boolean(true),
        )
        .unwrap();
        let once = expr.normalized();
        let twice = once.normalized();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_predicate_requires_boolean() {
        assert!(Predicate::new(Expression::number(1.0)).is_err());
        let p = Predicate::new(
            Expression::binary(age(), BinaryOp::GreaterThan, Expression::number(17.0)).unwrap(),
        )
        .unwrap();
        assert!(p.validate(&record(18.0)).unwrap());
        assert!(!p.validate(&record(17.0)).unwrap());
    }
}
