//! Refinement algebra scenarios: range derivation, complement, and the
//! normalization/range equivalence law.

use arcs_schema::{
    BinaryOp, Boundary, Expression, EvalType, FieldType, Predicate, Range, Schema, Segment,
    UnaryOp,
};

fn age() -> Expression {
    Expression::field("age", EvalType::Number)
}

fn cmp(op: BinaryOp, n: f64) -> Expression {
    Expression::binary(age(), op, Expression::number(n)).unwrap()
}

#[test]
fn working_age_band_and_complement() {
    // (age >= 18) and (age < 65)
    let expr = Expression::binary(
        cmp(BinaryOp::GreaterThanOrEqual, 18.0),
        BinaryOp::And,
        cmp(BinaryOp::LessThan, 65.0),
    )
    .unwrap();

    let range = Range::from_expression(&expr).unwrap();
    assert_eq!(
        range.segments(),
        &[Segment::new(Boundary::closed(18.0), Boundary::open(65.0)).unwrap()]
    );

    // Complement: (-inf, 18) u [65, +inf).
    let complement = range.complement();
    assert_eq!(
        complement.segments(),
        &[
            Segment::new(Boundary::open(f64::NEG_INFINITY), Boundary::open(18.0)).unwrap(),
            Segment::new(Boundary::closed(65.0), Boundary::open(f64::INFINITY)).unwrap(),
        ]
    );

    // The two partition the line.
    assert!(range.intersect(&complement).is_empty());
    assert_eq!(range.union(&complement), Range::full());
}

#[test]
fn range_derivation_commutes_with_normalization() {
    // Written backwards and wrapped in a double negation.
    let ugly = Expression::unary(
        UnaryOp::Not,
        Expression::unary(
            UnaryOp::Not,
            Expression::binary(Expression::number(18.0), BinaryOp::LessThanOrEqual, age())
                .unwrap(),
        )
        .unwrap(),
    )
    .unwrap();

    let direct = Range::from_expression(&ugly).unwrap();
    let via_normal = Range::from_expression(&ugly.normalized()).unwrap();
    assert_eq!(direct, via_normal);
    assert_eq!(
        direct.segments(),
        &[Segment::new(Boundary::closed(18.0), Boundary::open(f64::INFINITY)).unwrap()]
    );
}

#[test]
fn subset_checks_between_refinements() {
    let adult = Range::from_expression(&cmp(BinaryOp::GreaterThanOrEqual, 18.0)).unwrap();
    let working_age = Range::from_expression(
        &Expression::binary(
            cmp(BinaryOp::GreaterThanOrEqual, 18.0),
            BinaryOp::And,
            cmp(BinaryOp::LessThan, 65.0),
        )
        .unwrap(),
    )
    .unwrap();

    assert!(working_age.is_subset_of(&adult));
    assert!(!adult.is_subset_of(&working_age));
    assert_eq!(adult.difference(&working_age), working_age.complement().intersect(&adult));
}

#[test]
fn schema_refinement_gates_entities() {
    use arcs_common::{PropertyValue, ReferenceId};
    use arcs_crdt::RawEntity;

    let schema = Schema::new(vec!["Person".to_string()])
        .with_singleton("name", FieldType::Text)
        .with_singleton("age", FieldType::Number);
    let refinement = Predicate::new(
        Expression::binary(
            schema.field_ref("age").unwrap(),
            BinaryOp::GreaterThanOrEqual,
            Expression::number(18.0),
        )
        .unwrap(),
    )
    .unwrap();
    let schema = schema.with_refinement(refinement).unwrap();

    let adult = RawEntity::new(ReferenceId::from("a"))
        .with_singleton("name", PropertyValue::Text("bob".to_string()))
        .with_singleton("age", PropertyValue::Number(42.0));
    assert!(schema.validate_entity(&adult).is_ok());

    let minor = RawEntity::new(ReferenceId::from("b"))
        .with_singleton("name", PropertyValue::Text("eve".to_string()))
        .with_singleton("age", PropertyValue::Number(12.0));
    assert!(schema.validate_entity(&minor).is_err());
}

#[test]
fn equality_ranges_are_points_and_punctures() {
    let five = Range::from_expression(&cmp(BinaryOp::Equals, 5.0)).unwrap();
    assert_eq!(five.segments(), &[Segment::point(5.0).unwrap()]);

    let not_five = Range::from_expression(&cmp(BinaryOp::NotEquals, 5.0)).unwrap();
    assert_eq!(not_five, five.complement());
    assert!(five.intersect(&not_five).is_empty());
    assert_eq!(five.union(&not_five), Range::full());
}
