//! The thresholds-widening functor.
//!
//! [`Thresholds`] remembers every test that was *redundant* where it was
//! evaluated, i.e. that did not shrink the child state. Such a test is an
//! invariant of that state and a good guess for a loop bound. When a
//! widening throws a bound away, the single closest threshold not yet used
//! at the widening point is applied to the widened state and marked as used
//! there, so every threshold narrows at most once per point.
//!
//! ```text
//! i := 0; while (i < 100) { i := i + 1 }
//! ```
//!
//! collects `i ≤ 99` in the loop body, shifts it to `i ≤ 100` across the
//! increment, and the first widening at the loop head yields `i ∈ [0, 100]`
//! instead of `[0, +∞]`.

mod state;

use std::fmt;

use im::OrdSet;
use log::{debug, trace};
use num_bigint::BigInt;

use crate::debug::DomainTree;
use crate::domain::NumericDomain;
use crate::error::{reachable, DomainError, Result};
use crate::expr::{Assign, Rhs, Test, TestOp};
use crate::interval::{Bound, Interval};
use crate::linear::{Linear, Substitution};
use crate::synth::SynthChannel;
use crate::types::{FoldMap, NumVar, ProgramPoint, VarSet, VarType};

pub use state::{Threshold, ThresholdKey, ThresholdsBuilder, ThresholdsState};

/// Tunables of the [`Thresholds`] functor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdsConfig {
    /// Maximum number of rewritten tests tried when looking for a variant of
    /// a threshold that is redundant on the other side of a merge.
    pub max_substitution_attempts: usize,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        ThresholdsConfig {
            max_substitution_attempts: 5,
        }
    }
}

/// Threshold-collecting widening functor over a child domain `C`.
#[derive(Debug, Clone)]
pub struct Thresholds<C> {
    state: ThresholdsState,
    child: C,
    location: Option<ProgramPoint>,
    config: ThresholdsConfig,
}

/// Whether applying `test` leaves `child` unchanged.
pub fn is_redundant<C: NumericDomain>(test: &Test, child: &C) -> Result<bool> {
    if !test.vars().is_subset(&child.support()) {
        return Ok(false);
    }
    match reachable(child.eval_test(test))? {
        Some(applied) => child.subset_or_equal(&applied),
        None => Ok(false),
    }
}

impl<C: NumericDomain> Thresholds<C> {
    pub fn new(child: C) -> Self {
        Self::with_config(child, ThresholdsConfig::default())
    }

    pub fn with_config(child: C, config: ThresholdsConfig) -> Self {
        Thresholds {
            state: ThresholdsState::default(),
            child,
            location: None,
            config,
        }
    }

    pub fn state(&self) -> &ThresholdsState {
        &self.state
    }

    pub fn child(&self) -> &C {
        &self.child
    }

    pub fn location(&self) -> Option<ProgramPoint> {
        self.location
    }

    fn build(&self, state: ThresholdsState, child: C) -> Self {
        Thresholds {
            state,
            child,
            location: self.location,
            config: self.config,
        }
    }

    fn origin(&self) -> ProgramPoint {
        self.location.unwrap_or_else(|| ProgramPoint::new(0))
    }

    /// Applies `test` to the child, recording its inequalities as thresholds
    /// when they are redundant.
    fn collect(&self, builder: &mut ThresholdsBuilder, test: &Test) -> Result<C> {
        match test.op() {
            TestOp::Eq | TestOp::Neq => {
                // the halves are only recorded; the test itself is applied
                // since the halves of an equality are weaker and those of a
                // disequality hold only one at a time
                if let Some((first, second)) = test.split() {
                    self.collect_one(builder, &first)?;
                    self.collect_one(builder, &second)?;
                }
                self.child.eval_test(test)
            }
            TestOp::Leq => match self.collect_one(builder, test)? {
                Some(applied) => Ok(applied),
                None => self.child.eval_test(test),
            },
        }
    }

    fn collect_one(&self, builder: &mut ThresholdsBuilder, test: &Test) -> Result<Option<C>> {
        if test.is_flag_test() {
            return Ok(None);
        }
        let Some(applied) = reachable(self.child.eval_test(test))? else {
            return Ok(None);
        };
        if self.child.subset_or_equal(&applied)? {
            trace!("{}: collecting {} at {}", Self::NAME, test, self.origin());
            builder.insert(Threshold::new(self.origin(), test.clone()));
        }
        Ok(Some(applied))
    }

    /// Tests derived from `test` by eliminating a variable through an
    /// equality that `own` knows and `other` does not.
    fn substitutes(test: &Test, own: &C, other: &C) -> OrdSet<Test> {
        let mut result = OrdSet::new();
        for var in test.vars().iter() {
            let known = other.query_equalities(var);
            for eq in own.query_equalities(var).iter().filter(|eq| !known.contains(eq)) {
                if let Some(sigma) = eq.gen_substitution(var) {
                    let rewritten = test.apply_substitution(&sigma);
                    if !rewritten.is_tautology() {
                        result.insert(rewritten);
                    }
                }
            }
        }
        result
    }

    /// A variant of `test`, which holds in `own`, that is redundant in
    /// `other`.
    fn redundant_variant(&self, test: &Test, own: &C, other: &C) -> Result<Option<Test>> {
        let mut tried = OrdSet::new();
        let mut pending = vec![test.clone()];
        while let Some(candidate) = pending.pop() {
            if tried.len() > self.config.max_substitution_attempts {
                break;
            }
            if is_redundant(&candidate, other)? {
                return Ok(Some(candidate));
            }
            pending.extend(
                Self::substitutes(&candidate, own, other)
                    .into_iter()
                    .filter(|t| !tried.contains(t)),
            );
            tried.insert(candidate);
        }
        Ok(None)
    }

    /// The thresholds valid on both sides of a join or widening.
    fn merge(&self, other: &Self) -> Result<ThresholdsBuilder> {
        let mut builder = ThresholdsState::default().builder();
        for t in self.state.iter() {
            let key = t.key();
            match other.state.get(&key) {
                Some(o) => {
                    let merged = t.merged(o);
                    for test in state::preference(t.test(), o.test()) {
                        if is_redundant(test, &self.child)? && is_redundant(test, &other.child)? {
                            builder.insert(merged.with_test(test.clone()));
                            break;
                        }
                    }
                }
                None => {
                    if let Some(test) = self.redundant_variant(t.test(), &self.child, &other.child)? {
                        builder.insert(t.with_test(test));
                    }
                }
            }
        }
        for o in other.state.iter() {
            if self.state.get(&o.key()).is_none() {
                if let Some(test) = other.redundant_variant(o.test(), &other.child, &self.child)? {
                    builder.insert(o.with_test(test));
                }
            }
        }
        Ok(builder)
    }

    /// Applies the unused threshold closest to `widened` at `point`.
    ///
    /// Among the thresholds `e ≤ 0` not yet used at `point` and not already
    /// satisfied, the one with the greatest lower bound of `e` is chosen:
    /// it is the closest to the widened state's surviving bound.
    fn narrow(builder: &mut ThresholdsBuilder, widened: C, point: Option<ProgramPoint>) -> Result<C> {
        let Some(point) = point else {
            return Ok(widened);
        };
        let zero = Bound::from(0);
        let mut closest: Option<(Bound, Threshold)> = None;
        for t in builder.state().iter() {
            if t.is_consumed_at(point) {
                continue;
            }
            let range = widened.query_range(t.test().expr());
            if range.high() <= &zero {
                continue;
            }
            if closest.as_ref().map_or(true, |(low, _)| range.low() > low) {
                closest = Some((range.low().clone(), t.clone()));
            }
        }
        let Some((_, threshold)) = closest else {
            return Ok(widened);
        };
        let narrowed = reachable(widened.eval_test(threshold.test()))?.ok_or_else(|| {
            DomainError::invariant(Self::NAME, format!("threshold {} refutes the widened state", threshold))
        })?;
        debug!("{}: narrowing with {} at {}", Self::NAME, threshold.test(), point);
        builder.mark_consumed(&threshold.key(), point);
        Ok(narrowed)
    }

    fn remove_non_redundant(builder: &mut ThresholdsBuilder, child: &C) -> Result<()> {
        let stale: Vec<ThresholdKey> = builder
            .state()
            .iter()
            .map(|t| Ok((t.key(), is_redundant(t.test(), child)?)))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .filter_map(|(key, redundant)| (!redundant).then_some(key))
            .collect();
        for key in &stale {
            builder.remove(key);
        }
        Ok(())
    }
}

impl<C: NumericDomain> NumericDomain for Thresholds<C> {
    const NAME: &'static str = "Thresholds";

    fn empty() -> Self {
        Thresholds::new(C::empty())
    }

    fn eval_assign(&self, assign: &Assign) -> Result<Self> {
        let lhs = assign.lhs;
        let mut builder = self.state.builder();
        let inverse = match &assign.rhs {
            Rhs::Lin { expr, divisor } => Substitution::inverting(expr, divisor, lhs),
            _ => None,
        };
        match inverse {
            Some(sigma) => builder.substitute(lhs, &sigma, self.location),
            None => builder.remove_mentioning(lhs, &self.child.query_equalities(lhs), self.location),
        }
        let child = self.child.eval_assign(assign)?;
        Ok(self.build(builder.build(), child))
    }

    fn eval_test(&self, test: &Test) -> Result<Self> {
        if test.is_tautology_report_unreachable()? {
            return Ok(self.clone());
        }
        let mut builder = self.state.builder();
        let child = self.collect(&mut builder, test)?;
        Ok(self.build(builder.build(), child))
    }

    fn join(&self, other: &Self) -> Result<Self> {
        let mut builder = self.merge(other)?;
        let child = self.child.join(&other.child)?;
        Self::remove_non_redundant(&mut builder, &child)?;
        Ok(self.build(builder.build(), child))
    }

    /// Widens at the location of `other`, the newer state.
    fn widen(&self, other: &Self) -> Result<Self> {
        let mut builder = self.merge(other)?;
        let widened = self.child.widen(&other.child)?;
        let narrowed = Self::narrow(&mut builder, widened, other.location)?;
        Self::remove_non_redundant(&mut builder, &narrowed)?;
        let state = builder.build();
        debug!("{}: widening keeps {}", Self::NAME, state);
        let mut result = self.build(state, narrowed);
        result.location = other.location;
        Ok(result)
    }

    /// Thresholds are hints; only the child decides inclusion.
    fn subset_or_equal(&self, other: &Self) -> Result<bool> {
        self.child.subset_or_equal(&other.child)
    }

    fn project(&self, vars: &VarSet) -> Result<Self> {
        let mut builder = self.state.builder();
        for var in vars.iter() {
            builder.remove_mentioning(var, &self.child.query_equalities(var), self.location);
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
        let mut builder = self.state.builder();
        builder.expand(pairs);
        Ok(self.build(builder.build(), child))
    }

    fn fold(&self, pairs: &FoldMap) -> Result<Self> {
        let child = self.child.fold(pairs)?;
        let mut builder = self.state.builder();
        builder.fold(pairs);
        Ok(self.build(builder.build(), child))
    }

    fn copy_and_paste(&self, vars: &VarSet, from: &Self) -> Result<Self> {
        let child = self.child.copy_and_paste(vars, &from.child)?;
        let mut builder = self.state.builder();
        builder.paste(vars, &from.state);
        Ok(self.build(builder.build(), child))
    }

    fn query_range(&self, expr: &Linear) -> Interval {
        self.child.query_range(expr)
    }

    fn query_equalities(&self, var: NumVar) -> OrdSet<Linear> {
        self.child.query_equalities(var)
    }

    fn synth_channel(&self) -> SynthChannel {
        self.child.synth_channel()
    }

    fn with_location(&self, point: ProgramPoint) -> Self {
        Thresholds {
            state: self.state.clone(),
            child: self.child.with_location(point),
            location: Some(point),
            config: self.config,
        }
    }

    fn support(&self) -> VarSet {
        self.child.support()
    }

    fn dump(&self) -> DomainTree {
        DomainTree::new(Self::NAME)
            .entries(self.state.iter())
            .child(self.child.dump())
    }
}

impl<C: fmt::Display> fmt::Display for Thresholds<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}", self.state, self.child)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::domain::tests::{check_lattice_laws, check_widening_terminates};
    use crate::intervals::Intervals;

    type T = Thresholds<Intervals>;

    const HEAD: u64 = 0x10;
    const GUARD: u64 = 0x14;
    const STEP: u64 = 0x18;

    fn i() -> NumVar {
        NumVar::new(1)
    }

    fn at(p: u64) -> ProgramPoint {
        ProgramPoint::new(p)
    }

    /// `i ≤ c`
    fn at_most(c: i64) -> Test {
        Test::leq(Linear::var(i()).add_constant(-c))
    }

    fn init() -> T {
        T::empty()
            .introduce(i(), VarType::Zeno, None)
            .unwrap()
            .eval_assign(&Assign::constant(i(), 0))
            .unwrap()
    }

    /// One trip through `if (i < 100) i := i + 1`.
    fn body(head: &T) -> T {
        head.with_location(at(GUARD))
            .eval_test(&at_most(99))
            .unwrap()
            .with_location(at(STEP))
            .eval_assign(&Assign::increment(i(), 1))
            .unwrap()
    }

    fn iterate(head: &T) -> T {
        let next = head.join(&body(head)).unwrap().with_location(at(HEAD));
        head.widen(&next).unwrap()
    }

    fn range(t: &T) -> Interval {
        t.query_range(&Linear::var(i()))
    }

    #[test]
    fn test_redundant_tests_are_collected() {
        let s = init();
        let r = s.with_location(at(GUARD)).eval_test(&at_most(99)).unwrap();
        assert!(r.state().contains_test(&at_most(99)));
        // 0 ≤ i
        let r = r.eval_test(&Test::leq(Linear::term(-1, i()))).unwrap();
        assert_eq!(r.state().len(), 2);
        // not redundant: it shrinks the state
        let wide = s.eval_assign(&Assign::new(i(), Rhs::range(Interval::of(0, 10)))).unwrap();
        let r = wide.eval_test(&at_most(5)).unwrap();
        assert!(r.state().is_empty());
        assert_eq!(range(&r), Interval::of(0, 5));
    }

    #[test]
    fn test_increment_shifts_threshold() {
        let after = body(&init());
        assert!(after.state().contains_test(&at_most(100)));
        assert_eq!(range(&after), Interval::constant(1));
    }

    #[test]
    fn test_loop_head_is_bounded() {
        let head = iterate(&init());
        assert_eq!(range(&head), Interval::of(0, 100));
        let again = iterate(&head);
        assert_eq!(range(&again), Interval::of(0, 100));
        assert!(again.subset_or_equal(&head).unwrap());
    }

    #[test]
    fn test_consumed_threshold_is_not_applied_twice() {
        let head = iterate(&init());
        let used = head.state().iter().next().unwrap().clone();
        assert!(used.is_consumed_at(at(HEAD)));

        // widen [0, 100] by [0, 100] with the threshold already used here
        let next = head.join(&head).unwrap().with_location(at(HEAD));
        let same = head.widen(&next).unwrap();
        assert_eq!(range(&same), Interval::of(0, 100));
        assert_eq!(same.state(), head.state());
    }

    #[test]
    fn test_threshold_used_once_per_point() {
        let start = init();
        let joined = start.join(&body(&start)).unwrap();
        let plain = start.widen(&joined).unwrap();
        assert_eq!(range(&plain), Interval::up_from(Bound::from(0)));
        let narrowed = start.widen(&joined.with_location(at(HEAD))).unwrap();
        assert_eq!(range(&narrowed), Interval::of(0, 100));

        // the same widening step again, with the threshold already used at HEAD
        let low = narrowed.eval_test(&at_most(0)).unwrap();
        let high = low.join(&joined).unwrap();
        assert_eq!(range(&high), Interval::of(0, 1));
        let again = low.widen(&high.with_location(at(HEAD))).unwrap();
        assert_eq!(range(&again), Interval::up_from(Bound::from(0)));
        let elsewhere = low.widen(&high.with_location(at(0x20))).unwrap();
        assert_eq!(range(&elsewhere), Interval::of(0, 100));
    }

    #[test]
    fn test_closest_threshold_wins() {
        let guarded = |t: T| {
            t.with_location(at(GUARD))
                .eval_test(&at_most(1000))
                .unwrap()
                .with_location(at(GUARD + 1))
                .eval_test(&at_most(50))
                .unwrap()
        };
        let low = guarded(init());
        let high = guarded(init().eval_assign(&Assign::constant(i(), 1)).unwrap());
        assert_eq!(low.state().len(), 2);
        let w = low.widen(&low.join(&high).unwrap().with_location(at(HEAD))).unwrap();
        assert_eq!(range(&w), Interval::of(0, 50));
        assert_eq!(w.state().len(), 2);
        let w = w.widen(&w.join(&w).unwrap().with_location(at(HEAD))).unwrap();
        assert_eq!(range(&w), Interval::of(0, 50));
    }

    #[test]
    fn test_join_drops_thresholds_not_redundant_in_result() {
        let start = init().with_location(at(GUARD));
        let low = start.eval_test(&at_most(0)).unwrap();
        let high = start.eval_assign(&Assign::constant(i(), 5)).unwrap();
        let j = low.join(&high).unwrap();
        assert_eq!(range(&j), Interval::of(0, 5));
        assert!(j.state().is_empty());
    }

    #[test]
    fn test_increment_shifts_threshold_without_location() {
        let tested = init().eval_test(&at_most(99)).unwrap();
        assert!(tested.location().is_none());
        assert!(tested.state().contains_test(&at_most(99)));
        let after = tested.eval_assign(&Assign::increment(i(), 1)).unwrap();
        assert_eq!(after.state().len(), 1);
        assert!(after.state().contains_test(&at_most(100)));
        let again = after.eval_assign(&Assign::increment(i(), 1)).unwrap();
        assert!(again.state().contains_test(&at_most(101)));
    }

    #[test]
    fn test_project_and_substitute() {
        let j = NumVar::new(2);
        let s = init().with_location(at(GUARD)).eval_test(&at_most(99)).unwrap();
        let renamed = s.substitute(i(), j).unwrap();
        assert!(renamed.state().contains_test(&Test::leq(Linear::var(j).add_constant(-99))));
        let projected = s.project(&VarSet::singleton(i())).unwrap();
        assert!(projected.state().is_empty());
        assert!(projected.support().is_empty());
    }

    #[test]
    fn test_flag_tests_are_not_collected() {
        let f = NumVar::flag(9);
        let s = T::empty().introduce(f, VarType::Bool, None).unwrap();
        let r = s.eval_test(&Test::leq(Linear::var(f).add_constant(-1))).unwrap();
        assert!(r.state().is_empty());
    }

    #[test]
    fn test_lattice_laws_and_termination() {
        let samples: Vec<T> = [0, 7, 100]
            .into_iter()
            .map(|c| init().eval_assign(&Assign::constant(i(), c)).unwrap())
            .collect();
        check_lattice_laws(&samples);
        let chain = (0..50).map(|c| {
            init()
                .eval_assign(&Assign::new(i(), Rhs::range(Interval::of(0, c))))
                .unwrap()
                .with_location(at(HEAD))
        });
        check_widening_terminates(chain, 5);
    }
}
