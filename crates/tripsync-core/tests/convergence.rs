//! Convergence checks for the transform pipeline
//!
//! Two replicas that receive the same operations in different orders must
//! end with identical text once everything has passed through the
//! transform pipeline.

use proptest::prelude::*;
use tripsync_core::transform::transform;
use tripsync_core::Operation;

const BASE: &str = "abcdefghijklmnopqrst";

/// Apply a set of mutually concurrent operations in the given order,
/// transforming each against everything applied before it
fn apply_all(base: &str, ops: &[Operation]) -> String {
    let mut text = base.to_string();
    let mut applied: Vec<Operation> = Vec::new();
    for op in ops {
        let t = transform(op.clone(), &applied);
        t.apply(&mut text).expect("transformed op must stay in bounds");
        applied.push(t);
    }
    text
}

/// A random insert or delete by `author`, valid against `BASE`
///
/// Insert content repeats the author's letter so different interleavings
/// produce visibly different text.
fn arb_op(author: char) -> impl Strategy<Value = Operation> {
    let base_len = BASE.chars().count();
    prop_oneof![
        (0..=base_len, 1..6usize).prop_map(move |(position, n)| {
            Operation::insert(position, author.to_string().repeat(n), author.to_string(), 1)
        }),
        (0..base_len)
            .prop_flat_map(move |position| (Just(position), 1..=base_len - position))
            .prop_map(move |(position, length)| {
                Operation::delete(position, length, author.to_string(), 1)
            }),
    ]
}

proptest! {
    #[test]
    fn concurrent_pair_converges(op_a in arb_op('a'), op_b in arb_op('b')) {
        let ab = apply_all(BASE, &[op_a.clone(), op_b.clone()]);
        let ba = apply_all(BASE, &[op_b, op_a]);
        prop_assert_eq!(ab, ba);
    }

    #[test]
    fn delete_pair_never_double_deletes(
        op_a in arb_op('a').prop_filter("deletes only", |op| !matches!(op.kind, tripsync_core::OpKind::Insert { .. })),
        op_b in arb_op('b').prop_filter("deletes only", |op| !matches!(op.kind, tripsync_core::OpKind::Insert { .. })),
    ) {
        // Overlapping concurrent deletes remove the union of both ranges,
        // never more
        let merged = apply_all(BASE, &[op_a.clone(), op_b.clone()]);
        let union = {
            let mut gone = vec![false; BASE.len()];
            for op in [&op_a, &op_b] {
                for i in op.position..op.end() {
                    gone[i] = true;
                }
            }
            gone.iter().filter(|g| **g).count()
        };
        prop_assert_eq!(merged.len(), BASE.len() - union);
    }
}

fn permutations(ops: &[Operation]) -> Vec<Vec<Operation>> {
    if ops.len() <= 1 {
        return vec![ops.to_vec()];
    }
    let mut out = Vec::new();
    for (i, op) in ops.iter().enumerate() {
        let mut rest = ops.to_vec();
        rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, op.clone());
            out.push(tail);
        }
    }
    out
}

#[test]
fn same_position_inserts_converge_for_every_permutation() {
    // Five authors insert at the same spot; the author-id tie-break must
    // produce one canonical interleaving no matter the arrival order
    let ops: Vec<Operation> = ["a", "b", "c", "d", "e"]
        .iter()
        .map(|author| Operation::insert(5, author.to_uppercase(), *author, 1))
        .collect();

    let reference = apply_all(BASE, &ops);
    assert!(reference.contains("ABCDE"));

    for permutation in permutations(&ops) {
        assert_eq!(apply_all(BASE, &permutation), reference);
    }
}

#[test]
fn disjoint_edits_converge_for_every_permutation() {
    // Edits on well-separated ranges from four authors
    let ops = vec![
        Operation::insert(0, "AA", "a", 1),
        Operation::delete(6, 2, "b", 1),
        Operation::insert(12, "CC", "c", 1),
        Operation::delete(16, 3, "d", 1),
    ];

    let reference = apply_all(BASE, &ops);
    for permutation in permutations(&ops) {
        assert_eq!(apply_all(BASE, &permutation), reference);
    }
}
