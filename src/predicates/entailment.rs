//! Which tracked implications fire, and which survive a merge.
//!
//! For an implication `p → q` and a fact `t`: if `t ⊢ p` then `q` holds, and
//! if `t ⊢ ¬q` then `¬p` holds. Entailment is either syntactic (literal
//! comparison of tests) or semantic (a state in which the negation of a test
//! is unreachable entails the test).

use im::OrdSet;

use crate::domain::NumericDomain;
use crate::error::{reachable, Result};
use crate::expr::Test;
use crate::pmap::MultiMap;
use crate::types::VarSet;

use super::state::PredicatesState;

/// Tests fired by `test` through literal comparison.
pub fn syntactically_entailed(test: &Test, state: &PredicatesState) -> OrdSet<Test> {
    let vars = test.vars();
    let mut result = OrdSet::new();
    for premise in state.premises_mentioning(&vars).iter() {
        if premise.is_syntactically_entailed_by(test) {
            result = result.union(state.consequences(premise));
        }
    }
    for consequence in state.consequences_mentioning(&vars).iter() {
        if consequence.not().is_syntactically_entailed_by(test) {
            result.extend(state.premises(consequence).iter().map(Test::not));
        }
    }
    result
}

/// Tests fired by what `child` knows, looking only at implications that
/// mention one of `modified` (all of them if `modified` is empty).
pub fn semantically_entailed<C: NumericDomain>(
    child: &C,
    modified: &VarSet,
    state: &PredicatesState,
) -> Result<OrdSet<Test>> {
    let mut result = OrdSet::new();
    for premise in state.premises_mentioning(modified).iter() {
        if holds_in(premise, child)? {
            result = result.union(state.consequences(premise));
        }
    }
    for consequence in state.consequences_mentioning(modified).iter() {
        if refuted_in(consequence, child)? {
            result.extend(state.premises(consequence).iter().map(Test::not));
        }
    }
    Ok(result)
}

/// Whether `child ⊨ test`.
pub fn holds_in<C: NumericDomain>(test: &Test, child: &C) -> Result<bool> {
    refuted_in(&test.not(), child)
}

/// Whether `child ⊨ ¬test`, i.e. applying `test` is unreachable.
pub fn refuted_in<C: NumericDomain>(test: &Test, child: &C) -> Result<bool> {
    Ok(reachable(child.eval_test(test))?.is_none())
}

/// Whether `[[p]] child ⊨ q` for a single implication.
pub fn implication_holds_in<C: NumericDomain>(premise: &Test, consequence: &Test, child: &C) -> Result<bool> {
    match reachable(child.eval_test(premise))? {
        Some(restricted) => holds_in(consequence, &restricted),
        None => Ok(true),
    }
}

/// Whether every implication of `of` holds in `domain`, whose implications
/// are `in_state`.
///
/// Implications tracked by both hold trivially; the others are checked
/// semantically.
pub fn is_entailed<C: NumericDomain>(of: &PredicatesState, in_state: &PredicatesState, domain: &C) -> Result<bool> {
    for (p, q) in of.implications() {
        if in_state.implies(p, q) {
            continue;
        }
        if !implication_holds_in(p, q, domain)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// The implications of `of` that hold in `domain`, whose implications are
/// `in_state`.
pub fn entailed<C: NumericDomain>(of: &PredicatesState, in_state: &PredicatesState, domain: &C) -> Result<PredicatesState> {
    let mut kept = MultiMap::new();
    let mut all = true;
    for (p, q) in of.implications() {
        if in_state.implies(p, q) || implication_holds_in(p, q, domain)? {
            kept.add(p.clone(), q.clone());
        } else {
            all = false;
        }
    }
    if all {
        return Ok(of.clone());
    }
    let mut builder = PredicatesState::default().builder();
    builder.add_implications(&kept);
    Ok(builder.build())
}
