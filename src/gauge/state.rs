//! Gauge state and its builder.
//!
//! The state keeps a wedge per variable, the set of loop counters the wedges
//! may mention, the candidates that could become counters at the next
//! widening, and a reverse index from every counter to the variables whose
//! wedges mention it.

use std::fmt;

use im::OrdMap;
use log::{debug, trace};
use num_bigint::BigInt;
use num_traits::{One, Signed};

use crate::domain::NumericDomain;
use crate::error::{DomainError, Result};
use crate::expr::{Rhs, Test, TestOp};
use crate::interval::Interval;
use crate::linear::{Linear, Substitution};
use crate::pmap::{MultiMap, ThreeWaySplit};
use crate::types::{NumVar, VarSet};

use super::wedge::{self, Wedge};

/// Immutable gauge state. Variables without a wedge are unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GaugeState {
    candidates: VarSet,
    counters: VarSet,
    wedges: OrdMap<NumVar, Wedge>,
    reverse: MultiMap<NumVar, NumVar>,
}

impl GaugeState {
    pub fn builder(&self) -> GaugeBuilder {
        GaugeBuilder { data: self.clone() }
    }

    pub fn candidates(&self) -> &VarSet {
        &self.candidates
    }

    pub fn counters(&self) -> &VarSet {
        &self.counters
    }

    pub fn is_counter(&self, var: NumVar) -> bool {
        self.counters.contains(var)
    }

    pub fn is_candidate(&self, var: NumVar) -> bool {
        self.candidates.contains(var)
    }

    /// The wedge of `var`, full if it has none.
    pub fn wedge(&self, var: NumVar) -> Wedge {
        self.wedges.get(&var).cloned().unwrap_or_default()
    }

    pub fn wedges(&self) -> &OrdMap<NumVar, Wedge> {
        &self.wedges
    }

    pub fn wedges_domain(&self) -> VarSet {
        self.wedges.keys().copied().collect()
    }

    /// Variables whose wedges mention `counter`.
    pub fn occurrences(&self, counter: NumVar) -> VarSet {
        self.reverse.get(&counter).into_iter().collect()
    }

    /// Wedge-wise inclusion over the union of both domains.
    pub fn subset_or_equal(&self, other: &GaugeState) -> bool {
        self.wedges_domain()
            .union(&other.wedges_domain())
            .iter()
            .all(|x| self.wedge(x).subset_or_equal(&other.wedge(x)))
    }
}

impl fmt::Display for GaugeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "counters={} candidates={} wedges={{", self.counters, self.candidates)?;
        for (i, (var, w)) in self.wedges.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} ∈ {}", var, w)?;
        }
        write!(f, "}}")
    }
}

/// Mutable working copy of a [`GaugeState`].
#[derive(Debug, Clone)]
pub struct GaugeBuilder {
    data: GaugeState,
}

impl GaugeBuilder {
    pub fn build(self) -> GaugeState {
        self.data
    }

    pub fn state(&self) -> &GaugeState {
        &self.data
    }

    /// Binds `var` to `wedge`, keeping the reverse index in sync.
    pub fn set_wedge(&mut self, var: NumVar, wedge: Wedge) {
        let old = self.data.wedges.get(&var).map(Wedge::vars).unwrap_or_default();
        let new = wedge.vars();
        for counter in old.difference(&new).iter() {
            self.data.reverse.remove(&counter, &var);
        }
        for counter in new.difference(&old).iter() {
            self.data.reverse.add(counter, var);
        }
        self.data.wedges.insert(var, wedge);
    }

    pub fn remove_wedge(&mut self, var: NumVar) {
        if let Some(w) = self.data.wedges.remove(&var) {
            for counter in w.vars().iter() {
                self.data.reverse.remove(&counter, &var);
            }
        }
    }

    /// Eliminates `lambda` from every wedge mentioning it.
    fn forget_counter(&mut self, lambda: NumVar, range: &Interval) {
        for x in self.data.occurrences(lambda).iter() {
            let forgotten = self.data.wedge(x).forget_counter(lambda, range);
            self.set_wedge(x, forgotten);
        }
    }

    fn delete_counter(&mut self, lambda: NumVar, range: &Interval) {
        trace!("deleting counter {} with range {}", lambda, range);
        self.forget_counter(lambda, range);
        self.data.counters.remove(lambda);
    }

    /// Counters survive a join if they are a counter on one side and at
    /// least a candidate on the other.
    ///
    /// Dropped counters are eliminated from the wedges of both sides; the
    /// returned state is `other` without them.
    fn join_counters<C: NumericDomain>(&mut self, this_child: &C, other: &GaugeState, other_child: &C) -> GaugeState {
        let (c1, k1) = (&self.data.candidates, &self.data.counters);
        let (c2, k2) = (&other.candidates, &other.counters);
        let candidates = c1.intersection(c2);
        let counters = c1
            .union(k1)
            .intersection(k2)
            .union(&c2.union(k2).intersection(k1));
        for lambda in self.data.counters.difference(&counters).iter() {
            self.forget_counter(lambda, &this_child.query_range(&Linear::var(lambda)));
        }
        let mut theirs = other.builder();
        for lambda in other.counters.difference(&counters).iter() {
            theirs.delete_counter(lambda, &other_child.query_range(&Linear::var(lambda)));
        }
        self.data.candidates = candidates.difference(&counters);
        self.data.counters = counters;
        theirs.build()
    }

    /// Before a widening, every common candidate is promoted to a counter.
    fn infer_counters(&mut self, other: &GaugeState) {
        let promoted = self.data.candidates.intersection(&other.candidates);
        let counters = promoted.union(&self.data.counters).union(&other.counters);
        if !promoted.is_empty() {
            debug!("promoting candidates {} to counters", promoted);
        }
        self.data.candidates = VarSet::new();
        self.data.counters = counters;
    }

    pub fn join<C: NumericDomain>(&mut self, this_child: &C, other: &GaugeState, other_child: &C) {
        let other = self.join_counters(this_child, other, other_child);
        let split = ThreeWaySplit::of(&self.data.wedges, &other.wedges);
        for var in split.only_in_first.keys().chain(split.only_in_second.keys()) {
            self.set_wedge(*var, Wedge::full());
        }
        for (var, (a, b)) in split.in_both_but_differing.iter() {
            self.set_wedge(*var, a.join(b));
        }
    }

    /// Widens the wedges by interpolating along every counter whose value
    /// changed between the two states.
    pub fn widen<C: NumericDomain>(&mut self, this_child: &C, other: &GaugeState, other_child: &C) {
        self.infer_counters(other);
        let lambdas = self.data.counters.union(&other.counters);
        let domain = self.data.wedges_domain().union(&other.wedges_domain());
        let constant_in = |child: &C, lambda: NumVar| child.query_range(&Linear::var(lambda)).as_constant().cloned();
        let changed: VarSet = lambdas
            .iter()
            .filter(|l| constant_in(this_child, *l) != constant_in(other_child, *l))
            .collect();

        if changed.is_empty() {
            for x in domain.iter() {
                let widened = self.data.wedge(x).interval_widen(&other.wedge(x));
                self.set_wedge(x, widened);
            }
            return;
        }

        for lambda in changed.iter() {
            let u = constant_in(this_child, lambda);
            let v = constant_in(other_child, lambda);
            debug!("interpolating along {}: {:?} -> {:?}", lambda, u, v);
            for x in domain.without(lambda).iter() {
                let widened = self.data.wedge(x).widen_li(&other.wedge(x), lambda, u.as_ref(), v.as_ref());
                self.set_wedge(x, widened);
            }
        }
        // a lone changed counter is never interpolated against itself
        if let (1, Some(lambda)) = (changed.len(), changed.first()) {
            let widened = self.data.wedge(lambda).interval_widen(&other.wedge(lambda));
            self.set_wedge(lambda, widened);
        }
        let unchanged = lambdas.difference(&changed);
        for x in domain.iter() {
            let w = self.data.wedge(x);
            if !w.vars().is_disjoint(&unchanged) {
                self.set_wedge(x, w.partial_join(&other.wedge(x), &unchanged));
            }
        }
    }

    /// Transfer function of `lhs := rhs`, given the child state before the
    /// assignment.
    pub fn assign<C: NumericDomain>(&mut self, child: &C, lhs: NumVar, rhs: &Rhs) {
        let increment = increment_of(lhs, rhs);
        let was_counter = self.data.is_counter(lhs);
        if was_counter {
            match &increment {
                Some(k) => {
                    for x in self.data.occurrences(lhs).iter() {
                        let shifted = self.data.wedge(x).inc(lhs, k);
                        self.set_wedge(x, shifted);
                    }
                }
                None => self.delete_counter(lhs, &child.query_range(&Linear::var(lhs))),
            }
        }
        // evaluated after a deleted counter is gone from the wedges
        let value = wedge::evaluate(rhs, &self.data.wedges);
        let non_negative = value.lower().map_or(false, |l| !l.get_constant().is_negative());
        if !was_counter {
            if self.data.is_candidate(lhs) && increment.is_none() && !non_negative {
                self.data.candidates.remove(lhs);
            } else if increment.is_some() || non_negative {
                self.data.candidates.insert(lhs);
            }
        }
        trace!("{} := {} gives wedge {}", lhs, rhs, value);
        self.set_wedge(lhs, value);
    }

    /// Strengthens `child` with the consequences of `test` (an inequality)
    /// on the wedges.
    ///
    /// Non-counters are bounded through their own wedge; counters are
    /// eliminated from the wedges they occur in.
    pub fn reduce<C: NumericDomain>(&self, child: C, test: &Test) -> Result<C> {
        if test.op() != TestOp::Leq {
            return Err(DomainError::invariant("Gauge", format!("cannot reduce by {}", test)));
        }
        let expr = test.expr();
        let vars = expr.vars();
        let counters = vars.intersection(&self.data.counters);
        let mut child = child;

        for v in vars.difference(&counters).iter() {
            let a = expr.coeff(v);
            let rest = expr.drop_term(v);
            let w = self.data.wedge(v);
            // a·v + rest ≤ 0 with L ≤ v ≤ U
            let bound = if a.is_positive() { w.lower() } else { w.upper() };
            if let Some(b) = bound {
                let implied = Test::leq(&rest + &b.scale(&a));
                trace!("reducing {} by the wedge of {}: {}", test, v, implied);
                child = child.eval_test(&implied)?;
            }
        }

        for c in counters.iter() {
            let a = expr.coeff(c);
            let Some(sigma) = expr.gen_substitution(c) else {
                continue;
            };
            for v in self.data.occurrences(c).without(c).iter() {
                let w = self.data.wedge(v);
                if let Some(upper) = w.upper().filter(|u| (&a * u.coeff(c)).is_positive()) {
                    let implied = Test::leq(&Linear::term(sigma.fac.clone(), v) - &upper.apply_substitution(&sigma));
                    child = child.eval_test(&implied)?;
                }
                if let Some(lower) = w.lower().filter(|l| (&a * l.coeff(c)).is_negative()) {
                    let implied = Test::leq(&lower.apply_substitution(&sigma) - &Linear::term(sigma.fac.clone(), v));
                    child = child.eval_test(&implied)?;
                }
            }
        }
        Ok(child)
    }

    pub fn project<C: NumericDomain>(&mut self, child: &C, var: NumVar) {
        if self.data.is_counter(var) {
            self.delete_counter(var, &child.query_range(&Linear::var(var)));
        }
        self.data.candidates.remove(var);
        self.remove_wedge(var);
    }

    pub fn introduce(&mut self, var: NumVar, value: Option<&BigInt>) -> Result<()> {
        if self.data.wedges.contains_key(&var) {
            return Err(DomainError::support("Gauge", var));
        }
        match value {
            Some(c) => {
                if !c.is_negative() {
                    self.data.candidates.insert(var);
                }
                self.set_wedge(var, Wedge::singleton(c.clone()));
            }
            None => self.set_wedge(var, Wedge::full()),
        }
        Ok(())
    }

    /// Renames `from` to `to` in the wedges and the counter sets.
    pub fn substitute(&mut self, from: NumVar, to: NumVar) -> Result<()> {
        let Some(w) = self.data.wedges.get(&from).cloned() else {
            return Err(DomainError::support("Gauge", from));
        };
        if self.data.wedges.contains_key(&to) {
            return Err(DomainError::support("Gauge", to));
        }
        if self.data.is_counter(from) {
            let sigma = Substitution::renaming(from, to);
            for x in self.data.occurrences(from).iter() {
                let renamed = self.data.wedge(x).apply_substitution(&sigma);
                self.set_wedge(x, renamed);
            }
            self.data.counters.remove(from);
            self.data.counters.insert(to);
        }
        if self.data.is_candidate(from) {
            self.data.candidates.remove(from);
            self.data.candidates.insert(to);
        }
        self.remove_wedge(from);
        self.set_wedge(to, w.apply_substitution(&Substitution::renaming(from, to)));
        Ok(())
    }

    /// Demotes `var` to a plain, unbounded variable.
    pub fn forget<C: NumericDomain>(&mut self, child: &C, var: NumVar) {
        self.project(child, var);
        self.set_wedge(var, Wedge::full());
    }
}

/// The `k` of `var := var + k` for a non-negative `k`.
fn increment_of(var: NumVar, rhs: &Rhs) -> Option<BigInt> {
    let lin = rhs.as_linear()?;
    match lin.single_term() {
        Some((v, c)) if v == var && c.is_one() && !lin.get_constant().is_negative() => Some(lin.get_constant().clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use num_traits::Zero;

    use super::*;
    use crate::intervals::Intervals;
    use crate::types::VarType;

    fn vars() -> (NumVar, NumVar) {
        (NumVar::new(1), NumVar::new(2))
    }

    #[test]
    fn test_increment_detection() {
        let (x, y) = vars();
        assert_eq!(increment_of(x, &Rhs::lin(Linear::var(x).add_constant(2))), Some(BigInt::from(2)));
        assert_eq!(increment_of(x, &Rhs::lin(Linear::var(x))), Some(BigInt::zero()));
        assert_eq!(increment_of(x, &Rhs::lin(Linear::var(x).add_constant(-1))), None);
        assert_eq!(increment_of(x, &Rhs::lin(Linear::var(y).add_constant(1))), None);
        assert_eq!(increment_of(x, &Rhs::lin(Linear::term(2, x))), None);
    }

    #[test]
    fn test_reverse_index_follows_wedges() {
        let (x, k) = vars();
        let mut builder = GaugeState::default().builder();
        builder.set_wedge(x, Wedge::exactly(Linear::var(k)));
        assert!(builder.state().occurrences(k).contains(x));
        builder.set_wedge(x, Wedge::singleton(3));
        assert!(builder.state().occurrences(k).is_empty());
        builder.set_wedge(x, Wedge::exactly(Linear::var(k)));
        builder.remove_wedge(x);
        assert!(builder.state().occurrences(k).is_empty());
    }

    #[test]
    fn test_non_negative_assignments_become_candidates() {
        let (x, y) = vars();
        let child = Intervals::empty();
        let mut builder = GaugeState::default().builder();
        builder.assign(&child, x, &Rhs::constant(0));
        builder.assign(&child, y, &Rhs::constant(-4));
        let state = builder.build();
        assert!(state.is_candidate(x));
        assert!(!state.is_candidate(y));
    }

    #[test]
    fn test_reassigned_counter_is_forgotten() {
        let (x, k) = vars();
        let child = Intervals::empty()
            .introduce(k, VarType::Zeno, Some(BigInt::from(3)))
            .unwrap();
        let mut builder = GaugeState::default().builder();
        builder.data.counters.insert(k);
        builder.set_wedge(x, Wedge::exactly(Linear::term(2, k)));
        builder.assign(&child, k, &Rhs::constant(0));
        let state = builder.build();
        assert!(!state.is_counter(k));
        assert_eq!(state.wedge(x), Wedge::singleton(6));
    }

    #[test]
    fn test_substitute_renames_counter() {
        let (x, k) = vars();
        let j = NumVar::new(3);
        let mut builder = GaugeState::default().builder();
        builder.data.counters.insert(k);
        builder.set_wedge(k, Wedge::singleton(0));
        builder.set_wedge(x, Wedge::exactly(Linear::var(k)));
        builder.substitute(k, j).unwrap();
        let state = builder.build();
        assert!(state.is_counter(j));
        assert!(!state.is_counter(k));
        assert_eq!(state.wedge(x), Wedge::exactly(Linear::var(j)));
        assert!(state.occurrences(j).contains(x));
        assert!(!state.wedges().contains_key(&k));
    }
}
