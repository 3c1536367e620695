//! Numeric range derivation for refinement predicates.
//!
//! A normalized univariate predicate over a Number field denotes a set of
//! admissible values. That set is represented as a `Range`: a strictly
//! ordered list of disjoint segments with open or closed endpoints. The
//! algebra over ranges (union, intersection, complement, difference) lets
//! callers compare refinements symbolically, e.g. to decide whether one
//! refinement subsumes another.

use crate::expression::{BinaryOp, Expression, UnaryOp};
use crate::{SchemaError, SchemaResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Whether a boundary includes its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundaryKind {
    Open,
    Closed,
}

/// One endpoint of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Boundary {
    pub value: f64,
    pub kind: BoundaryKind,
}

impl Boundary {
    pub fn open(value: f64) -> Boundary {
        Boundary {
            value,
            kind: BoundaryKind::Open,
        }
    }

    pub fn closed(value: f64) -> Boundary {
        Boundary {
            value,
            kind: BoundaryKind::Closed,
        }
    }

    fn flipped(&self) -> Boundary {
        Boundary {
            value: self.value,
            kind: match self.kind {
                BoundaryKind::Open => BoundaryKind::Closed,
                BoundaryKind::Closed => BoundaryKind::Open,
            },
        }
    }

    /// Order boundaries acting as segment starts: at equal values a closed
    /// start begins earlier (is more inclusive) than an open one.
    fn cmp_as_start(&self, other: &Boundary) -> Ordering {
        self.value.total_cmp(&other.value).then_with(|| {
            let rank = |kind| match kind {
                BoundaryKind::Closed => 0,
                BoundaryKind::Open => 1,
            };
            rank(self.kind).cmp(&rank(other.kind))
        })
    }

    /// Order boundaries acting as segment ends: at equal values a closed
    /// end extends further than an open one.
    fn cmp_as_end(&self, other: &Boundary) -> Ordering {
        self.value.total_cmp(&other.value).then_with(|| {
            let rank = |kind| match kind {
                BoundaryKind::Open => 0,
                BoundaryKind::Closed => 1,
            };
            rank(self.kind).cmp(&rank(other.kind))
        })
    }
}

/// A contiguous run of admissible values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub from: Boundary,
    pub to: Boundary,
}

impl Segment {
    /// Construct a segment, rejecting inverted or zero-width-open shapes.
    pub fn new(from: Boundary, to: Boundary) -> SchemaResult<Segment> {
        if from.value.is_nan() || to.value.is_nan() {
            return Err(SchemaError::InvalidSegment(
                "segment endpoints cannot be NaN".to_string(),
            ));
        }
        if from.value.is_infinite() && from.kind == BoundaryKind::Closed
            || to.value.is_infinite() && to.kind == BoundaryKind::Closed
        {
            return Err(SchemaError::InvalidSegment(
                "infinite endpoints must be open".to_string(),
            ));
        }
        match from.value.total_cmp(&to.value) {
            Ordering::Greater => Err(SchemaError::InvalidSegment(format!(
                "segment start {} is after its end {}",
                from.value, to.value
            ))),
            Ordering::Equal
                if from.kind != BoundaryKind::Closed || to.kind != BoundaryKind::Closed =>
            {
                Err(SchemaError::InvalidSegment(format!(
                    "zero-width segment at {} must be closed on both sides",
                    from.value
                )))
            }
            _ => Ok(Segment { from, to }),
        }
    }

    /// The single-point segment `[value, value]`.
    pub fn point(value: f64) -> SchemaResult<Segment> {
        Segment::new(Boundary::closed(value), Boundary::closed(value))
    }

    /// The full line `(-inf, +inf)`.
    fn full() -> Segment {
        Segment {
            from: Boundary::open(f64::NEG_INFINITY),
            to: Boundary::open(f64::INFINITY),
        }
    }

    /// True when this segment and the next (with `other.from` not earlier
    /// than `self.from`) overlap or touch without a gap.
    fn touches(&self, other: &Segment) -> bool {
        match other.from.value.total_cmp(&self.to.value) {
            Ordering::Less => true,
            Ordering::Equal => {
                self.to.kind == BoundaryKind::Closed || other.from.kind == BoundaryKind::Closed
            }
            Ordering::Greater => false,
        }
    }

    fn intersect(&self, other: &Segment) -> Option<Segment> {
        // Later start and earlier end; ties adopt the less inclusive kind.
        let from = if self.from.cmp_as_start(&other.from) == Ordering::Less {
            other.from
        } else {
            self.from
        };
        let to = if self.to.cmp_as_end(&other.to) == Ordering::Greater {
            other.to
        } else {
            self.to
        };
        match from.value.total_cmp(&to.value) {
            Ordering::Less => Some(Segment { from, to }),
            Ordering::Equal
                if from.kind == BoundaryKind::Closed && to.kind == BoundaryKind::Closed =>
            {
                Some(Segment { from, to })
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let open = match self.from.kind {
            BoundaryKind::Open => "(",
            BoundaryKind::Closed => "[",
        };
        let close = match self.to.kind {
            BoundaryKind::Open => ")",
            BoundaryKind::Closed => "]",
        };
        write!(f, "{}{}, {}{}", open, self.from.value, self.to.value, close)
    }
}

/// A set of admissible numbers: strictly ordered, disjoint segments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Range {
    segments: Vec<Segment>,
}

impl Range {
    /// The empty set.
    pub fn empty() -> Range {
        Range {
            segments: Vec::new(),
        }
    }

    /// The full line `(-inf, +inf)`.
    pub fn full() -> Range {
        Range {
            segments: vec![Segment::full()],
        }
    }

    /// A range consisting of a single segment.
    pub fn from_segment(segment: Segment) -> Range {
        Range {
            segments: vec![segment],
        }
    }

    /// The ordered segments of this range.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// True when no value is admissible.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Normalize an arbitrary segment list: sort and fuse overlapping or
    /// touching segments, adopting the more inclusive boundary at
    /// coincident endpoints.
    fn normalized(mut segments: Vec<Segment>) -> Range {
        segments.sort_by(|a, b| {
            a.from
                .cmp_as_start(&b.from)
                .then_with(|| a.to.cmp_as_end(&b.to))
        });
        let mut result: Vec<Segment> = Vec::new();
        for segment in segments {
            match result.last_mut() {
                Some(last) if last.touches(&segment) => {
                    if last.to.cmp_as_end(&segment.to) == Ordering::Less {
                        last.to = segment.to;
                    }
                }
                _ => result.push(segment),
            }
        }
        Range { segments: result }
    }

    /// The union of two ranges.
    pub fn union(&self, other: &Range) -> Range {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().copied());
        Range::normalized(segments)
    }

    /// The intersection of two ranges.
    pub fn intersect(&self, other: &Range) -> Range {
        let mut segments = Vec::new();
        for a in &self.segments {
            for b in &other.segments {
                if let Some(seg) = a.intersect(b) {
                    segments.push(seg);
                }
            }
        }
        Range::normalized(segments)
    }

    /// The complement of this range with respect to `(-inf, +inf)`.
    pub fn complement(&self) -> Range {
        if self.segments.is_empty() {
            return Range::full();
        }
        let mut segments = Vec::new();
        let mut cursor = Boundary::open(f64::NEG_INFINITY);
        for segment in &self.segments {
            if segment.from.value != f64::NEG_INFINITY {
                segments.push(Segment {
                    from: cursor,
                    to: segment.from.flipped(),
                });
            }
            cursor = segment.to.flipped();
        }
        if let Some(last) = self.segments.last() {
            if last.to.value != f64::INFINITY {
                segments.push(Segment {
                    from: cursor,
                    to: Boundary::open(f64::INFINITY),
                });
            }
        }
        Range { segments }
    }

    /// Values admissible here but not in `other`.
    pub fn difference(&self, other: &Range) -> Range {
        self.intersect(&other.complement())
    }

    /// True when every value admissible here is admissible in `other`.
    pub fn is_subset_of(&self, other: &Range) -> bool {
        self.intersect(other) == *self
    }

    /// Derive the admissible range of a normalized univariate predicate
    /// over a Number field.
    pub fn from_expression(expression: &Expression) -> SchemaResult<Range> {
        let fields = expression.field_names();
        if fields.len() > 1 {
            return Err(SchemaError::UnsupportedRefinement(format!(
                "range derivation needs a univariate predicate, found fields {fields:?}"
            )));
        }
        Self::from_normalized(&expression.normalized())
    }

    fn from_normalized(expression: &Expression) -> SchemaResult<Range> {
        match expression {
            Expression::BooleanLiteral(true) => Ok(Range::full()),
            Expression::BooleanLiteral(false) => Ok(Range::empty()),
            Expression::Unary {
                op: UnaryOp::Not,
                operand,
            } => Ok(Self::from_normalized(operand)?.complement()),
            Expression::Binary { op, left, right } => match op {
                BinaryOp::And => Ok(Self::from_normalized(left)?
                    .intersect(&Self::from_normalized(right)?)),
                BinaryOp::Or => {
                    Ok(Self::from_normalized(left)?.union(&Self::from_normalized(right)?))
                }
                _ => Self::from_comparison(*op, left, right),
            },
            other => Err(SchemaError::UnsupportedRefinement(format!(
                "cannot derive a range from {other}"
            ))),
        }
    }

    fn from_comparison(op: BinaryOp, left: &Expression, right: &Expression) -> SchemaResult<Range> {
        // Normalization put the field on the left and folded the rest.
        let value = match (left, right) {
            (Expression::Field { .. }, Expression::NumberLiteral(n)) => *n,
            _ => {
                return Err(SchemaError::UnsupportedRefinement(format!(
                    "cannot derive a range from ({left} {op} {right})"
                )))
            }
        };
        let segment = match op {
            BinaryOp::LessThan => {
                Segment::new(Boundary::open(f64::NEG_INFINITY), Boundary::open(value))?
            }
            BinaryOp::LessThanOrEqual => {
                Segment::new(Boundary::open(f64::NEG_INFINITY), Boundary::closed(value))?
            }
            BinaryOp::GreaterThan => {
                Segment::new(Boundary::open(value), Boundary::open(f64::INFINITY))?
            }
            BinaryOp::GreaterThanOrEqual => {
                Segment::new(Boundary::closed(value), Boundary::open(f64::INFINITY))?
            }
            BinaryOp::Equals => Segment::point(value)?,
            BinaryOp::NotEquals => {
                return Ok(Range::from_segment(Segment::point(value)?).complement())
            }
            other => {
                return Err(SchemaError::UnsupportedRefinement(format!(
                    "operator {other} does not denote a range"
                )))
            }
        };
        Ok(Range::from_segment(segment))
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "{{}}");
        }
        let rendered: Vec<String> = self.segments.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", rendered.join(" u "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::EvalType;

    fn age() -> Expression {
        Expression::field("age", EvalType::Number)
    }

    fn cmp(op: BinaryOp, n: f64) -> Expression {
        Expression::binary(age(), op, Expression::number(n)).unwrap()
    }

    #[test]
    fn test_segment_construction_rules() {
        assert!(Segment::new(Boundary::closed(1.0), Boundary::closed(2.0)).is_ok());
        assert!(Segment::point(5.0).is_ok());
        // Inverted.
        assert!(Segment::new(Boundary::closed(2.0), Boundary::closed(1.0)).is_err());
        // Zero-width open-open.
        assert!(Segment::new(Boundary::open(1.0), Boundary::open(1.0)).is_err());
        // Zero-width half-open.
        assert!(Segment::new(Boundary::closed(1.0), Boundary::open(1.0)).is_err());
        // Closed infinity.
        assert!(Segment::new(Boundary::closed(f64::NEG_INFINITY), Boundary::open(0.0)).is_err());
    }

    #[test]
    fn test_union_adopts_more_inclusive_boundary() {
        let a = Range::from_segment(Segment::new(Boundary::closed(0.0), Boundary::open(5.0)).unwrap());
        let b = Range::from_segment(Segment::new(Boundary::closed(5.0), Boundary::closed(9.0)).unwrap());
        let union = a.union(&b);
        assert_eq!(
            union.segments(),
            &[Segment::new(Boundary::closed(0.0), Boundary::closed(9.0)).unwrap()]
        );
    }

    #[test]
    fn test_union_keeps_true_gaps() {
        let a = Range::from_segment(Segment::new(Boundary::closed(0.0), Boundary::open(5.0)).unwrap());
        let b = Range::from_segment(Segment::new(Boundary::open(5.0), Boundary::closed(9.0)).unwrap());
        let union = a.union(&b);
        assert_eq!(union.segments().len(), 2);
    }

    #[test]
    fn test_intersect_adopts_less_inclusive_boundary() {
        let a = Range::from_segment(Segment::new(Boundary::closed(0.0), Boundary::closed(5.0)).unwrap());
        let b = Range::from_segment(Segment::new(Boundary::open(0.0), Boundary::open(10.0)).unwrap());
        let intersection = a.intersect(&b);
        assert_eq!(
            intersection.segments(),
            &[Segment::new(Boundary::open(0.0), Boundary::closed(5.0)).unwrap()]
        );
    }

    #[test]
    fn test_disjoint_intersection_is_empty() {
        let a = Range::from_segment(Segment::new(Boundary::closed(0.0), Boundary::open(1.0)).unwrap());
        let b = Range::from_segment(Segment::new(Boundary::closed(1.0), Boundary::closed(2.0)).unwrap());
        assert!(a.intersect(&b).is_empty());
    }

    #[test]
    fn test_complement_round_trip() {
        let range = Range::from_segment(
            Segment::new(Boundary::closed(18.0), Boundary::open(65.0)).unwrap(),
        );
        let complement = range.complement();
        assert_eq!(
            complement.segments(),
            &[
                Segment::new(Boundary::open(f64::NEG_INFINITY), Boundary::open(18.0)).unwrap(),
                Segment::new(Boundary::closed(65.0), Boundary::open(f64::INFINITY)).unwrap(),
            ]
        );
        assert_eq!(complement.complement(), range);
        assert_eq!(Range::full().complement(), Range::empty());
        assert_eq!(Range::empty().complement(), Range::full());
    }

    #[test]
    fn test_subset_and_difference() {
        let wide = Range::from_segment(
            Segment::new(Boundary::closed(0.0), Boundary::closed(100.0)).unwrap(),
        );
        let narrow = Range::from_segment(
            Segment::new(Boundary::closed(10.0), Boundary::closed(20.0)).unwrap(),
        );
        assert!(narrow.is_subset_of(&wide));
        assert!(!wide.is_subset_of(&narrow));

        let rest = wide.difference(&narrow);
        assert_eq!(
            rest.segments(),
            &[
                Segment::new(Boundary::closed(0.0), Boundary::open(10.0)).unwrap(),
                Segment::new(Boundary::open(20.0), Boundary::closed(100.0)).unwrap(),
            ]
        );
    }

    #[test]
    fn test_age_band_from_expression() {
        // (age >= 18) and (age < 65) denotes [18, 65).
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
    }

    #[test]
    fn test_equality_and_inequality_ranges() {
        let eq = Range::from_expression(&cmp(BinaryOp::Equals, 5.0)).unwrap();
        assert_eq!(eq.segments(), &[Segment::point(5.0).unwrap()]);

        let neq = Range::from_expression(&cmp(BinaryOp::NotEquals, 5.0)).unwrap();
        assert_eq!(neq, eq.complement());
        assert_eq!(neq.segments().len(), 2);
    }

    #[test]
    fn test_range_from_unnormalized_expression_matches_normalized() {
        // 18 <= age, written the wrong way round.
        let raw =
            Expression::binary(Expression::number(18.0), BinaryOp::LessThanOrEqual, age()).unwrap();
        let from_raw = Range::from_expression(&raw).unwrap();
        let from_normalized = Range::from_expression(&raw.normalized()).unwrap();
        assert_eq!(from_raw, from_normalized);
    }

    #[test]
    fn test_multivariate_rejected() {
        let other = Expression::field("height", EvalType::Number);
        let expr = Expression::binary(
            cmp(BinaryOp::GreaterThan, 0.0),
            BinaryOp::And,
            Expression::binary(other, BinaryOp::GreaterThan, Expression::number(0.0)).unwrap(),
        )
        .unwrap();
        assert!(matches!(
            Range::from_expression(&expr),
            Err(SchemaError::UnsupportedRefinement(_))
        ));
    }
}
