//! Implications recovering the precision lost by a convex join.
//!
//! Joining `x ∈ [0, 5]` with `x ∈ [10, 15]` yields `x ∈ [0, 15]`, losing the
//! gap. The builder records what the convex hull forgot as implications
//! between the lost bound of one variable and the surviving range of the
//! next, e.g. `5 < x → 10 ≤ x`. Variables are paired in a circular, shifted
//! order, so a single variable is paired with itself.

use im::OrdMap;

use crate::expr::Test;
use crate::interval::{Bound, Interval};
use crate::linear::Linear;
use crate::pmap::MultiMap;
use crate::types::NumVar;

/// Builds the implications for the variables whose values differ between
/// `this` and `other` in a join; values are `(in this, in other)`.
pub fn generate_implications(differing: &OrdMap<NumVar, (Interval, Interval)>) -> MultiMap<Test, Test> {
    let mut implications = MultiMap::new();
    // (variable, outside its range in this, inside its range in other)
    let mut bounds: Vec<(NumVar, Test, Test)> = Vec::new();
    for (var, (in_this, in_other)) in differing.iter() {
        if in_this.contains(in_other) || in_other.contains(in_this) {
            continue;
        }
        let (Some(outside_this), Some(inside_other)) = (
            outside_lost_bound(*var, in_this, in_other),
            inside_lost_bound(*var, in_other, in_this),
        ) else {
            continue;
        };
        bounds.push((*var, outside_this, inside_other));
    }
    let n = bounds.len();
    for i in 0..n {
        let premise = &bounds[i].1;
        let consequence = &bounds[(i + 1) % n].2;
        // `x < 4 → x < 5` carries no information
        if !consequence.is_syntactically_entailed_by(premise) {
            implications.add(premise.clone(), consequence.clone());
        }
    }
    implications
}

/// The region outside `value` that the join with `other` swallows: `var < l`
/// if the lower bound `l` is lost, else `u < var` if the upper bound `u` is.
fn outside_lost_bound(var: NumVar, value: &Interval, other: &Interval) -> Option<Test> {
    if let Bound::Finite(low) = value.low() {
        if other.low() < value.low() {
            // var - l + 1 ≤ 0
            return Some(Test::leq(Linear::var(var).add_constant(-low + 1)));
        }
    }
    if let Bound::Finite(high) = value.high() {
        if value.high() < other.high() {
            // u - var + 1 ≤ 0
            return Some(Test::leq(Linear::term(-1, var).add_constant(high + 1)));
        }
    }
    None
}

fn inside_lost_bound(var: NumVar, value: &Interval, other: &Interval) -> Option<Test> {
    outside_lost_bound(var, value, other).map(|t| t.not())
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn differing(pairs: &[(NumVar, Interval, Interval)]) -> OrdMap<NumVar, (Interval, Interval)> {
        pairs.iter().map(|(v, a, b)| (*v, (a.clone(), b.clone()))).collect()
    }

    #[test]
    fn test_single_variable_gap() {
        let x = NumVar::new(1);
        let imps = generate_implications(&differing(&[(x, Interval::of(0, 5), Interval::of(10, 15))]));
        // 5 < x → 10 ≤ x
        let premise = Test::leq(Linear::term(-1, x).add_constant(6));
        let consequence = Test::leq(Linear::term(-1, x).add_constant(10));
        assert_eq!(imps.len(), 1);
        assert!(imps.contains(&premise, &consequence));
    }

    #[test]
    fn test_two_variables_are_cross_linked() {
        let (x, y) = (NumVar::new(1), NumVar::new(2));
        let imps = generate_implications(&differing(&[
            (x, Interval::of(0, 5), Interval::of(10, 15)),
            (y, Interval::of(-5, -1), Interval::of(2, 3)),
        ]));
        // 5 < x → 2 ≤ y
        assert!(imps.contains(
            &Test::leq(Linear::term(-1, x).add_constant(6)),
            &Test::leq(Linear::term(-1, y).add_constant(2)),
        ));
        // -1 < y → 10 ≤ x
        assert!(imps.contains(
            &Test::leq(Linear::term(-1, y)),
            &Test::leq(Linear::term(-1, x).add_constant(10)),
        ));
        assert_eq!(imps.len(), 2);
    }

    #[test]
    fn test_nested_values_produce_nothing() {
        let x = NumVar::new(1);
        let imps = generate_implications(&differing(&[(x, Interval::of(0, 5), Interval::of(-10, 15))]));
        assert!(imps.is_empty());
    }

    #[test]
    fn test_overlapping_values_are_skipped_when_trivial() {
        let x = NumVar::new(1);
        // 5 < x → 3 ≤ x is entailed syntactically
        let imps = generate_implications(&differing(&[(x, Interval::of(0, 5), Interval::of(3, 10))]));
        assert!(imps.is_empty());
    }
}
