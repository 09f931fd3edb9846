//! The predicates functor: implication tracking.
//!
//! [`Predicates`] keeps a set of implications `p → q` between tests that hold
//! in every state it describes. Implications come from the child's
//! [`SynthChannel`] (typically the bounds a convex join loses) and fire when
//! a test is evaluated: a test that entails a premise adds the consequence,
//! and a test that refutes a consequence adds the negated premise. Fired
//! tests are fed back into the child until no new test fires.
//!
//! The functor only ever adds precision: dropping an implication is always
//! sound.
//!
//! ```text
//! x ∈ [0, 5] ⊔ x ∈ [10, 15]   =   x ∈ [0, 15]  with  6 ≤ x → 10 ≤ x
//! then x == 6                 →   10 ≤ x fires, unreachable
//! ```

mod entailment;
mod state;

use std::fmt;

use im::OrdSet;
use log::{debug, trace};
use num_bigint::BigInt;
use num_traits::One;

use crate::debug::DomainTree;
use crate::domain::NumericDomain;
use crate::error::Result;
use crate::expr::{Assign, Rhs, Test};
use crate::interval::Interval;
use crate::linear::{Linear, Substitution};
use crate::synth::SynthChannel;
use crate::types::{FoldMap, NumVar, ProgramPoint, VarSet, VarType};

pub use entailment::{holds_in, implication_holds_in, refuted_in};
pub use state::{PredicatesBuilder, PredicatesState};

/// Tunables of the [`Predicates`] functor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredicatesConfig {
    /// Maximum number of fired tests fed back into the child per test.
    pub max_fix_depth: usize,
}

impl Default for PredicatesConfig {
    fn default() -> Self {
        PredicatesConfig { max_fix_depth: 16 }
    }
}

/// Implication-tracking functor over a child domain `C`.
#[derive(Debug, Clone)]
pub struct Predicates<C> {
    state: PredicatesState,
    child: C,
    equations: OrdSet<Linear>,
    config: PredicatesConfig,
}

impl<C: NumericDomain> Predicates<C> {
    pub fn new(child: C) -> Self {
        Self::with_config(child, PredicatesConfig::default())
    }

    pub fn with_config(child: C, config: PredicatesConfig) -> Self {
        Predicates {
            state: PredicatesState::default(),
            child,
            equations: OrdSet::new(),
            config,
        }
    }

    pub fn state(&self) -> &PredicatesState {
        &self.state
    }

    pub fn child(&self) -> &C {
        &self.child
    }

    pub fn config(&self) -> &PredicatesConfig {
        &self.config
    }

    fn build(&self, state: PredicatesState, child: C) -> Self {
        Predicates {
            state,
            child,
            equations: OrdSet::new(),
            config: self.config,
        }
    }

    /// Drops what is known about `var`, first trying to rewrite the
    /// implications mentioning it through an equality of the child.
    fn forget(&self, builder: &mut PredicatesBuilder, var: NumVar) {
        if !builder.state().contains(var) {
            return;
        }
        let sigma = self
            .child
            .query_equalities(var)
            .iter()
            .find_map(|eq| eq.gen_substitution(var));
        if let Some(sigma) = sigma {
            trace!("{}: eliminating {} by {}", Self::NAME, var, sigma);
            builder.substitute(&sigma);
        }
        builder.remove_mentioning(var);
    }

    /// Tests fired by `test` given the child state it produced.
    fn fired(&self, test: &Test, child: &C) -> Result<OrdSet<Test>> {
        let channel = child.synth_channel();
        let modified = test.vars().union(&channel.variables());
        let mut fired = entailment::syntactically_entailed(test, &self.state);
        fired = fired.union(entailment::semantically_entailed(child, &modified, &self.state)?);
        for eq in channel.equality_tests() {
            fired = fired.union(entailment::syntactically_entailed(&eq, &self.state));
        }
        Ok(fired)
    }

    /// Applies `test` to the child and feeds every fired test back in until
    /// nothing new fires or the depth bound is hit.
    fn fix_apply(&self, test: &Test) -> Result<(C, SynthChannel)> {
        let mut child = self.child.eval_test(test)?;
        let mut channel = child.synth_channel();
        let mut visited = OrdSet::unit(test.clone());
        let mut pending: Vec<Test> = self.fired(test, &child)?.into_iter().collect();
        let mut rounds = 0;
        while let Some(next) = pending.pop() {
            if visited.contains(&next) || next.is_tautology() {
                continue;
            }
            if rounds == self.config.max_fix_depth {
                debug!("{}: fixpoint depth {} reached", Self::NAME, rounds);
                break;
            }
            rounds += 1;
            trace!("{}: {} fires {}", Self::NAME, test, next);
            child = child.eval_test(&next)?;
            channel = channel.union(&child.synth_channel());
            pending.extend(self.fired(&next, &child)?.into_iter().filter(|t| !visited.contains(t)));
            visited.insert(next);
        }
        Ok((child, channel))
    }

    fn combine(&self, other: &Self, child: C) -> Result<Self> {
        // checked against the full operands so that their own implications
        // take part in the entailment
        let kept = entailment::entailed(&self.state, &other.state, other)?;
        let imported = entailment::entailed(&other.state, &self.state, self)?;
        let mut builder = kept.builder();
        builder.union(&imported);
        builder.add_implications(child.synth_channel().implications());
        Ok(self.build(builder.build(), child))
    }
}

impl<C: NumericDomain> NumericDomain for Predicates<C> {
    const NAME: &'static str = "Predicates";

    fn empty() -> Self {
        Predicates::new(C::empty())
    }

    fn eval_assign(&self, assign: &Assign) -> Result<Self> {
        let lhs = assign.lhs;
        let mut builder = self.state.builder();
        match &assign.rhs {
            Rhs::Lin { expr, divisor } if divisor.is_one() && expr.contains(lhs) => {
                match Substitution::inverting(expr, divisor, lhs) {
                    Some(sigma) => builder.substitute(&sigma),
                    None => builder.remove_mentioning(lhs),
                }
            }
            _ => self.forget(&mut builder, lhs),
        }
        let child = self.child.eval_assign(assign)?;
        builder.add_implications(child.synth_channel().implications());
        let state = builder.build();
        trace!("{}: after {}: {}", Self::NAME, assign, state);
        Ok(self.build(state, child))
    }

    fn eval_test(&self, test: &Test) -> Result<Self> {
        if test.is_tautology_report_unreachable()? {
            return Ok(self.clone());
        }
        let (child, channel) = self.fix_apply(test)?;
        let mut builder = self.state.builder();
        builder.add_implications(channel.implications());
        let mut result = self.build(builder.build(), child);
        result.equations = channel.equations().clone();
        Ok(result)
    }

    fn join(&self, other: &Self) -> Result<Self> {
        let result = self.combine(other, self.child.join(&other.child)?)?;
        debug!("{}: join keeps {}", Self::NAME, result.state);
        Ok(result)
    }

    fn widen(&self, other: &Self) -> Result<Self> {
        let result = self.combine(other, self.child.widen(&other.child)?)?;
        debug!("{}: widening keeps {}", Self::NAME, result.state);
        Ok(result)
    }

    /// Every implication of `other` must hold here.
    fn subset_or_equal(&self, other: &Self) -> Result<bool> {
        Ok(self.child.subset_or_equal(&other.child)?
            && entailment::is_entailed(&other.state, &self.state, self)?)
    }

    fn project(&self, vars: &VarSet) -> Result<Self> {
        let mut builder = self.state.builder();
        for var in vars.iter() {
            self.forget(&mut builder, var);
        }
        Ok(self.build(builder.build(), self.child.project(vars)?))
    }

    fn substitute(&self, from: NumVar, to: NumVar) -> Result<Self> {
        let child = self.child.substitute(from, to)?;
        let mut builder = self.state.builder();
        builder.rename(from, to);
        Ok(self.build(builder.build(), child))
    }

    fn introduce(&self, var: NumVar, ty: VarType, value: Option<BigInt>) -> Result<Self> {
        Ok(self.build(self.state.clone(), self.child.introduce(var, ty, value)?))
    }

    fn expand(&self, pairs: &FoldMap) -> Result<Self> {
        let child = self.child.expand(pairs)?;
        let mut copy = self.state.builder();
        for pair in pairs.iter() {
            copy.rename(pair.permanent, pair.ephemeral);
        }
        let mut builder = self.state.builder();
        builder.union(&copy.build());
        Ok(self.build(builder.build(), child))
    }

    fn fold(&self, pairs: &FoldMap) -> Result<Self> {
        let child = self.child.fold(pairs)?;
        let mut folded = self.state.builder();
        for pair in pairs.iter() {
            folded.rename(pair.ephemeral, pair.permanent);
        }
        let mut builder = self.state.builder();
        builder.intersect(&folded.build());
        for var in pairs.ephemerals().iter() {
            builder.remove_mentioning(var);
        }
        Ok(self.build(builder.build(), child))
    }

    fn copy_and_paste(&self, vars: &VarSet, from: &Self) -> Result<Self> {
        let child = self.child.copy_and_paste(vars, &from.child)?;
        let mut builder = self.state.builder();
        for var in vars.iter() {
            builder.remove_mentioning(var);
        }
        let mut pasted = from.state.builder();
        pasted.retain_only(vars);
        builder.union(&pasted.build());
        Ok(self.build(builder.build(), child))
    }

    fn query_range(&self, expr: &Linear) -> Interval {
        self.child.query_range(expr)
    }

    fn query_equalities(&self, var: NumVar) -> OrdSet<Linear> {
        self.child.query_equalities(var)
    }

    fn synth_channel(&self) -> SynthChannel {
        let mut channel = self.child.synth_channel();
        for eq in self.equations.iter() {
            channel.add_equation(eq.clone());
        }
        channel
    }

    fn with_location(&self, point: ProgramPoint) -> Self {
        let mut result = self.clone();
        result.child = self.child.with_location(point);
        result
    }

    fn support(&self) -> VarSet {
        self.child.support()
    }

    fn dump(&self) -> DomainTree {
        DomainTree::new(Self::NAME)
            .entries(self.state.implications().map(|(p, q)| format!("{} → {}", p, q)))
            .child(self.child.dump())
    }
}

impl<C: fmt::Display> fmt::Display for Predicates<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}", self.state, self.child)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::domain::tests::check_lattice_laws;
    use crate::error::DomainError;
    use crate::intervals::Intervals;

    type P = Predicates<Intervals>;

    fn x() -> NumVar {
        NumVar::new(1)
    }

    fn y() -> NumVar {
        NumVar::new(2)
    }

    /// `c ≤ x`
    fn at_least(c: i64) -> Test {
        Test::leq(Linear::term(-1, x()).add_constant(c))
    }

    /// `x ≤ c`
    fn at_most(c: i64) -> Test {
        Test::leq(Linear::var(x()).add_constant(-c))
    }

    fn ranged(low: i64, high: i64) -> P {
        P::empty()
            .introduce(x(), VarType::Zeno, None)
            .unwrap()
            .eval_assign(&Assign::new(x(), Rhs::range(Interval::of(low, high))))
            .unwrap()
    }

    fn gap() -> P {
        ranged(0, 5).join(&ranged(10, 15)).unwrap()
    }

    #[test]
    fn test_join_imports_lost_bound() {
        let j = gap();
        assert_eq!(j.query_range(&Linear::var(x())), Interval::of(0, 15));
        assert!(j.state().implies(&at_least(6), &at_least(10)));
    }

    #[test]
    fn test_value_in_gap_is_unreachable() {
        let err = gap().eval_test(&Test::eq(Linear::var(x()).add_constant(-6))).unwrap_err();
        assert_eq!(err, DomainError::Unreachable);
    }

    #[test]
    fn test_value_in_gap_is_unreachable_after_widening() {
        let w = ranged(0, 5).widen(&ranged(10, 15)).unwrap();
        assert!(w.state().implies(&at_least(6), &at_least(10)));
        assert!(w.eval_test(&Test::eq(Linear::var(x()).add_constant(-6))).unwrap_err().is_unreachable());
        assert_eq!(
            w.eval_test(&Test::eq(Linear::var(x()).add_constant(-12))).unwrap().query_range(&Linear::var(x())),
            Interval::constant(12)
        );
    }

    #[test]
    fn test_contrapositive_fires() {
        let r = gap().eval_test(&at_most(7)).unwrap();
        assert_eq!(r.query_range(&Linear::var(x())), Interval::of(0, 5));
        let r = gap().eval_test(&at_least(3)).unwrap();
        assert_eq!(r.query_range(&Linear::var(x())), Interval::of(3, 15));
    }

    #[test]
    fn test_implication_dropped_when_not_entailed() {
        let wide = ranged(0, 15);
        let j = gap().join(&wide).unwrap();
        assert!(j.state().is_empty());
        assert!(gap().subset_or_equal(&wide).unwrap());
        assert!(!wide.subset_or_equal(&gap()).unwrap());
    }

    #[test]
    fn test_increment_shifts_implications() {
        let shifted = gap().eval_assign(&Assign::increment(x(), 1)).unwrap();
        assert!(shifted.state().implies(&at_least(7), &at_least(11)));
        assert!(shifted.eval_test(&Test::eq(Linear::var(x()).add_constant(-7))).unwrap_err().is_unreachable());
    }

    #[test]
    fn test_overwrite_and_project_forget() {
        let assigned = gap().eval_assign(&Assign::constant(x(), 3)).unwrap();
        assert!(assigned.state().is_empty());
        let with_y = gap().introduce(y(), VarType::Zeno, None).unwrap();
        let projected = with_y.project(&VarSet::singleton(x())).unwrap();
        assert!(projected.state().is_empty());
        assert_eq!(projected.support(), VarSet::singleton(y()));
    }

    #[test]
    fn test_substitute_renames() {
        let renamed = gap().substitute(x(), y()).unwrap();
        let p = Test::leq(Linear::term(-1, y()).add_constant(6));
        let q = Test::leq(Linear::term(-1, y()).add_constant(10));
        assert!(renamed.state().implies(&p, &q));
        assert!(!renamed.state().contains(x()));
    }

    #[test]
    fn test_expand_and_fold() {
        let mut pairs = FoldMap::new();
        pairs.push(x(), y());
        let expanded = gap().expand(&pairs).unwrap();
        assert_eq!(expanded.state().len(), 2);
        assert!(expanded
            .eval_test(&Test::eq(Linear::var(y()).add_constant(-6)))
            .unwrap_err()
            .is_unreachable());
        let folded = expanded.fold(&pairs).unwrap();
        assert_eq!(folded.state().len(), 1);
        assert!(!folded.state().contains(y()));
    }

    #[test]
    fn test_copy_and_paste_imports_implications() {
        let plain = ranged(0, 15);
        let pasted = plain.copy_and_paste(&VarSet::singleton(x()), &gap()).unwrap();
        assert!(pasted.state().implies(&at_least(6), &at_least(10)));
    }

    #[test]
    fn test_fix_depth_bounds_feedback() {
        let shallow = Predicates::with_config(Intervals::empty(), PredicatesConfig { max_fix_depth: 0 })
            .introduce(x(), VarType::Zeno, None)
            .unwrap();
        let a = shallow.eval_assign(&Assign::new(x(), Rhs::range(Interval::of(0, 5)))).unwrap();
        let b = shallow.eval_assign(&Assign::new(x(), Rhs::range(Interval::of(10, 15)))).unwrap();
        let j = a.join(&b).unwrap();
        let r = j.eval_test(&Test::eq(Linear::var(x()).add_constant(-6))).unwrap();
        assert_eq!(r.query_range(&Linear::var(x())), Interval::constant(6));
    }

    #[test]
    fn test_lattice_laws() {
        check_lattice_laws(&[ranged(0, 5), ranged(10, 15), ranged(3, 12), gap()]);
    }

    #[test]
    fn test_dump_lists_implications() {
        let tree = gap().dump();
        assert_eq!(tree.label, "Predicates");
        assert_eq!(tree.entries.len(), 1);
        assert_eq!(tree.children.len(), 1);
    }
}
