//! Convergence scenarios for the causal counter across replicas.

use arcs_crdt::{Actor, CountOperation, CrdtChange, CrdtCount, CrdtError, CrdtModel};

fn me() -> Actor {
    Actor::from("me")
}

fn them() -> Actor {
    Actor::from("them")
}

#[test]
fn reciprocal_merge_converges_with_single_op_deltas() {
    // Two actors write independently: 7 from "me", 4 from "them".
    let mut a = CrdtCount::new();
    assert!(a.apply_operation(&CountOperation::MultiIncrement {
        actor: me(),
        from: 0,
        to: 1,
        value: 7,
    }));
    let mut b = CrdtCount::new();
    assert!(b.apply_operation(&CountOperation::MultiIncrement {
        actor: them(),
        from: 0,
        to: 1,
        value: 4,
    }));

    let effect = a.merge(b.data()).unwrap();

    // Each emitted operation list has length 1.
    let this_ops = match &effect.model_change {
        CrdtChange::Operations(ops) => ops.clone(),
        other => panic!("expected operations, got {other:?}"),
    };
    let other_ops = match &effect.other_change {
        CrdtChange::Operations(ops) => ops.clone(),
        other => panic!("expected operations, got {other:?}"),
    };
    assert_eq!(this_ops.len(), 1);
    assert_eq!(other_ops.len(), 1);

    // Applying the emitted delta to the old other replica completes the
    // exchange; both particle views equal 11 and the models are equal.
    for op in &other_ops {
        assert!(b.apply_operation(op));
    }
    assert_eq!(a.particle_view(), 11);
    assert_eq!(b.particle_view(), 11);
    assert_eq!(a.data(), b.data());
}

#[test]
fn same_actor_divergence_is_fatal() {
    // Both replicas claim "me" moved 0 -> 1 but with different values.
    let mut a = CrdtCount::new();
    assert!(a.apply_operation(&CountOperation::MultiIncrement {
        actor: me(),
        from: 0,
        to: 1,
        value: 7,
    }));
    let mut b = CrdtCount::new();
    assert!(b.apply_operation(&CountOperation::MultiIncrement {
        actor: me(),
        from: 0,
        to: 1,
        value: 4,
    }));

    assert!(matches!(a.merge(b.data()), Err(CrdtError::Divergence(_))));
}

#[test]
fn op_then_emitted_inverse_leaves_values_stable() {
    // After applying a delta and merging back, values are unchanged while
    // versions only ever grow.
    let mut a = CrdtCount::new();
    a.multi_increment(&me(), 3).unwrap();
    let mut b = CrdtCount::new();

    let effect = a.merge(b.data()).unwrap();
    if let CrdtChange::Operations(ops) = &effect.other_change {
        for op in ops {
            assert!(b.apply_operation(op));
        }
    }
    assert_eq!(a.data(), b.data());

    // A second reciprocal merge is a no-op on both sides.
    let effect = a.merge(b.data()).unwrap();
    assert!(effect.model_change.is_empty());
    assert!(effect.other_change.is_empty());
    assert_eq!(b.particle_view(), 3);
}

#[test]
fn boundary_operations_are_rejected() {
    let mut count = CrdtCount::new();

    // Zero-value multi-increment.
    assert!(!count.apply_operation(&CountOperation::MultiIncrement {
        actor: me(),
        from: 0,
        to: 1,
        value: 0,
    }));
    // to <= from.
    assert!(!count.apply_operation(&CountOperation::MultiIncrement {
        actor: me(),
        from: 1,
        to: 1,
        value: 2,
    }));
    // Duplicate operation.
    let op = CountOperation::Increment { actor: me(), from: 0 };
    assert!(count.apply_operation(&op));
    assert!(!count.apply_operation(&op));

    assert_eq!(count.particle_view(), 1);
}
