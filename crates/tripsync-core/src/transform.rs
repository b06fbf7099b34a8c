//! Operational transform rules
//!
//! Rewrites one operation against operations that happened concurrently so
//! that applying the set in any order converges on the same text. The rules
//! here are a protocol contract shared with every client: any deviation
//! breaks cross-client convergence.

use crate::operation::{OpKind, Operation};

/// Transform `op` against every concurrent predecessor, oldest first
///
/// Each pairwise result feeds into the next transform (standard OT
/// composition). `concurrent` must be in log order.
pub fn transform(op: Operation, concurrent: &[Operation]) -> Operation {
    concurrent
        .iter()
        .fold(op, |acc, earlier| transform_pair(acc, earlier))
}

/// Rewrite `op` as if `against` had been applied before it
pub fn transform_pair(op: Operation, against: &Operation) -> Operation {
    // Retains never move text, in either role
    if op.is_noop() || against.is_noop() {
        return op;
    }

    match (&op.kind, &against.kind) {
        (OpKind::Insert { .. }, OpKind::Insert { content }) => {
            let shift = content.chars().count();
            match op.position.cmp(&against.position) {
                std::cmp::Ordering::Less => op,
                std::cmp::Ordering::Greater => shifted(op, shift as isize),
                // Equal positions: the lexicographically smaller author id
                // is ordered first, independent of arrival order
                std::cmp::Ordering::Equal => {
                    if against.author < op.author {
                        shifted(op, shift as isize)
                    } else {
                        op
                    }
                }
            }
        }

        (OpKind::Insert { .. }, OpKind::Delete { length }) => {
            if op.position <= against.position {
                op
            } else if op.position >= against.end() {
                shifted(op, -(*length as isize))
            } else {
                // The insertion context was concurrently deleted
                op.into_noop()
            }
        }

        (OpKind::Delete { .. }, OpKind::Insert { content }) => {
            let ins_len = content.chars().count();
            if against.position <= op.position {
                shifted(op, ins_len as isize)
            } else if against.position >= op.end() {
                op
            } else {
                // Insert landed inside the range being deleted; the delete
                // absorbs it so both replicas drop the same text
                grow(op, ins_len)
            }
        }

        (OpKind::Delete { length: len1 }, OpKind::Delete { .. }) => {
            let len2 = against.len();
            if op.position >= against.end() {
                shifted(op, -(len2 as isize))
            } else if op.end() <= against.position {
                op
            } else {
                // Overlapping deletes: drop the part already deleted
                let overlap =
                    op.end().min(against.end()) - op.position.max(against.position);
                let remaining = len1.saturating_sub(overlap);
                if remaining == 0 {
                    // Fully contained: the other operation already removed it
                    op.into_noop()
                } else {
                    let position = op.position.min(against.position);
                    resized(op, position, remaining)
                }
            }
        }

        // Retain cases are handled by the early return
        _ => op,
    }
}

fn shifted(mut op: Operation, by: isize) -> Operation {
    op.position = (op.position as isize + by).max(0) as usize;
    op
}

fn grow(mut op: Operation, by: usize) -> Operation {
    if let OpKind::Delete { length } = &mut op.kind {
        *length = length.saturating_add(by);
    }
    op
}

fn resized(mut op: Operation, position: usize, length: usize) -> Operation {
    op.position = position;
    if let OpKind::Delete { length: l } = &mut op.kind {
        *l = length;
    }
    op
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OpKind;

    fn apply_all(base: &str, ops: &[Operation]) -> String {
        let mut text = base.to_string();
        let mut applied: Vec<Operation> = Vec::new();
        for op in ops {
            let t = transform(op.clone(), &applied);
            t.apply(&mut text).unwrap();
            applied.push(t);
        }
        text
    }

    #[test]
    fn test_insert_before_insert_shifts() {
        let a = Operation::insert(2, "xy", "a", 1);
        let b = Operation::insert(5, "z", "b", 1);
        let b2 = transform_pair(b, &a);
        assert_eq!(b2.position, 7);
    }

    #[test]
    fn test_insert_tie_break_is_order_independent() {
        let base = "0123";
        let a = Operation::insert(2, "AA", "a", 1);
        let b = Operation::insert(2, "BB", "b", 1);

        let ab = apply_all(base, &[a.clone(), b.clone()]);
        let ba = apply_all(base, &[b, a]);

        assert_eq!(ab, ba);
        // Smaller author id is ordered first
        assert_eq!(ab, "01AABB23");
    }

    #[test]
    fn test_insert_after_delete_shifts_left() {
        let del = Operation::delete(0, 3, "a", 1);
        let ins = Operation::insert(5, "x", "b", 1);
        let ins2 = transform_pair(ins, &del);
        assert_eq!(ins2.position, 2);
    }

    #[test]
    fn test_insert_inside_deleted_range_is_dropped() {
        let del = Operation::delete(2, 6, "a", 1);
        let ins = Operation::insert(4, "x", "b", 1);
        let ins2 = transform_pair(ins, &del);
        assert!(ins2.is_noop());

        // And the dual: the delete absorbs the insert
        let del2 = transform_pair(
            Operation::delete(2, 6, "a", 1),
            &Operation::insert(4, "x", "b", 1),
        );
        assert_eq!(del2.len(), 7);
        assert_eq!(del2.position, 2);

        // Both orders converge
        let base = "0123456789";
        let a = Operation::delete(2, 6, "a", 1);
        let b = Operation::insert(4, "x", "b", 1);
        assert_eq!(
            apply_all(base, &[a.clone(), b.clone()]),
            apply_all(base, &[b, a])
        );
    }

    #[test]
    fn test_contained_delete_becomes_noop() {
        // delete(5,10) swallows a concurrent delete(8,4)
        let outer = Operation::delete(5, 10, "a", 1);
        let inner = Operation::delete(8, 4, "b", 1);

        let inner2 = transform_pair(inner.clone(), &outer);
        assert!(inner2.is_noop());
        assert_eq!(inner2.len(), 0);

        let base = "abcdefghijklmnopqrst"; // 20 chars
        let both = apply_all(base, &[outer.clone(), inner.clone()]);
        assert_eq!(both.chars().count(), base.chars().count() - 10);
        assert_eq!(both, apply_all(base, &[inner, outer]));
    }

    #[test]
    fn test_containing_delete_shrinks() {
        let outer = Operation::delete(2, 5, "a", 1);
        let inner = Operation::delete(3, 2, "b", 1);

        let outer2 = transform_pair(outer, &inner);
        assert_eq!(outer2.position, 2);
        assert_eq!(outer2.len(), 3);
    }

    #[test]
    fn test_partial_overlap_merges() {
        let base = "0123456789";
        let a = Operation::delete(2, 4, "a", 1); // [2,6)
        let b = Operation::delete(4, 4, "b", 1); // [4,8)

        let a2 = transform_pair(a.clone(), &b);
        assert_eq!(a2.position, 2);
        assert_eq!(a2.len(), 2);

        let ab = apply_all(base, &[a.clone(), b.clone()]);
        let ba = apply_all(base, &[b, a]);
        assert_eq!(ab, ba);
        assert_eq!(ab, "0189");
    }

    #[test]
    fn test_adjacent_deletes_do_not_overlap() {
        let left = Operation::delete(0, 3, "a", 1);
        let right = Operation::delete(3, 2, "b", 1);

        let right2 = transform_pair(right, &left);
        assert_eq!(right2.position, 0);
        assert_eq!(right2.len(), 2);

        let left2 = transform_pair(Operation::delete(0, 3, "a", 1), &Operation::delete(3, 2, "b", 1));
        assert_eq!(left2.position, 0);
        assert_eq!(left2.len(), 3);
    }

    #[test]
    fn test_retain_passes_through() {
        let retain = Operation::retain(0, 5, "a", 1);
        let ins = Operation::insert(2, "x", "b", 1);
        assert_eq!(transform_pair(ins.clone(), &retain), ins);
    }

    #[test]
    fn test_itinerary_scenario_converges() {
        // Author A inserts "Paris" at 0 while author B concurrently
        // deletes 3 characters at 0 on the same base text.
        let base = "XXXitinerary";
        let a = Operation::insert(0, "Paris", "a", 1);
        let b = Operation::delete(0, 3, "b", 1);

        let ab = apply_all(base, &[a.clone(), b.clone()]);
        let ba = apply_all(base, &[b, a]);

        assert_eq!(ab, ba);
        assert_eq!(ab, "Parisitinerary");
    }

    #[test]
    fn test_transform_composes_oldest_first() {
        // Two earlier inserts push a later insert right by their total width
        let e1 = Operation::insert(0, "ab", "a", 1);
        let e2 = Operation::insert(0, "cd", "b", 1);
        let op = Operation::insert(1, "x", "c", 1);

        let t = transform(op, &[e1, e2]);
        assert_eq!(t.position, 5);
    }

    #[test]
    fn test_transformed_op_keeps_attribution() {
        let del = Operation::delete(0, 10, "a", 7);
        let t = transform_pair(del, &Operation::delete(0, 10, "b", 1));
        assert!(t.is_noop());
        assert_eq!(t.author, "a");
        assert_eq!(t.seq, 7);
        assert!(matches!(t.kind, OpKind::Retain { length: 0 }));
    }
}
