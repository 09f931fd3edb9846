//! Implication store of the predicates functor.

use std::fmt;

use im::OrdSet;

use crate::expr::Test;
use crate::linear::Substitution;
use crate::pmap::MultiMap;
use crate::types::{NumVar, VarSet};

/// A set of implications `premise → consequence`.
///
/// Implications are indexed forwards (premise to consequences), backwards
/// (consequence to premises) and by the variables their tests mention.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PredicatesState {
    forward: MultiMap<Test, Test>,
    backward: MultiMap<Test, Test>,
    occurrences: MultiMap<NumVar, Test>,
}

impl PredicatesState {
    pub fn from_implications<'a>(implications: impl IntoIterator<Item = (&'a Test, &'a Test)>) -> Self {
        let mut builder = PredicatesState::default().builder();
        for (p, q) in implications {
            builder.add_implication(p.clone(), q.clone());
        }
        builder.build()
    }

    pub fn builder(&self) -> PredicatesBuilder {
        PredicatesBuilder { state: self.clone() }
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Number of implications.
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// Whether some tracked test mentions `var`.
    pub fn contains(&self, var: NumVar) -> bool {
        self.occurrences.contains_key(&var)
    }

    pub fn implies(&self, premise: &Test, consequence: &Test) -> bool {
        self.forward.contains(premise, consequence)
    }

    pub fn implications(&self) -> impl Iterator<Item = (&Test, &Test)> + '_ {
        self.forward.pairs()
    }

    pub fn consequences(&self, premise: &Test) -> OrdSet<Test> {
        self.forward.get(premise)
    }

    pub fn premises(&self, consequence: &Test) -> OrdSet<Test> {
        self.backward.get(consequence)
    }

    /// Premises mentioning one of `vars`, or every premise if `vars` is
    /// empty.
    pub fn premises_mentioning(&self, vars: &VarSet) -> OrdSet<Test> {
        self.mentioning(vars, &self.forward)
    }

    /// Consequences mentioning one of `vars`, or every consequence if `vars`
    /// is empty.
    pub fn consequences_mentioning(&self, vars: &VarSet) -> OrdSet<Test> {
        self.mentioning(vars, &self.backward)
    }

    fn mentioning(&self, vars: &VarSet, index: &MultiMap<Test, Test>) -> OrdSet<Test> {
        if vars.is_empty() {
            return index.keys().cloned().collect();
        }
        vars.iter()
            .flat_map(|v| self.occurrences.get(&v))
            .filter(|t| index.contains_key(t))
            .collect()
    }

    /// Checks that the three indexes describe the same implications.
    pub fn is_consistent(&self) -> bool {
        let forward_ok = self.forward.pairs().all(|(p, q)| {
            self.backward.contains(q, p)
                && p.vars().iter().all(|v| self.occurrences.contains(&v, p))
                && q.vars().iter().all(|v| self.occurrences.contains(&v, q))
        });
        let backward_ok = self.backward.pairs().all(|(q, p)| self.forward.contains(p, q));
        let occurrences_ok = self.occurrences.pairs().all(|(v, t)| {
            t.mentions(*v) && (self.forward.contains_key(t) || self.backward.contains_key(t))
        });
        forward_ok && backward_ok && occurrences_ok
    }
}

impl fmt::Display for PredicatesState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {{", self.len())?;
        for (i, (p, q)) in self.implications().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} → {}", p, q)?;
        }
        write!(f, "}}")
    }
}

/// Mutable working copy of a [`PredicatesState`].
#[derive(Debug, Clone)]
pub struct PredicatesBuilder {
    state: PredicatesState,
}

impl PredicatesBuilder {
    pub fn build(self) -> PredicatesState {
        debug_assert!(self.state.is_consistent(), "inconsistent implication indexes");
        self.state
    }

    pub fn state(&self) -> &PredicatesState {
        &self.state
    }

    pub fn add_implication(&mut self, premise: Test, consequence: Test) {
        for v in premise.vars().iter() {
            self.state.occurrences.add(v, premise.clone());
        }
        for v in consequence.vars().iter() {
            self.state.occurrences.add(v, consequence.clone());
        }
        self.state.backward.add(consequence.clone(), premise.clone());
        self.state.forward.add(premise, consequence);
    }

    pub fn add_implications(&mut self, implications: &MultiMap<Test, Test>) {
        for (p, q) in implications.pairs() {
            self.add_implication(p.clone(), q.clone());
        }
    }

    fn remove_implication(&mut self, premise: &Test, consequence: &Test) {
        self.state.forward.remove(premise, consequence);
        self.state.backward.remove(consequence, premise);
        for test in [premise, consequence] {
            if !self.state.forward.contains_key(test) && !self.state.backward.contains_key(test) {
                for v in test.vars().iter() {
                    self.state.occurrences.remove(&v, test);
                }
            }
        }
    }

    /// Implications in which a test mentioning `var` takes part.
    fn implications_mentioning(&self, var: NumVar) -> Vec<(Test, Test)> {
        let mut result = Vec::new();
        for test in self.state.occurrences.get(&var).iter() {
            for q in self.state.forward.get(test).iter() {
                result.push((test.clone(), q.clone()));
            }
            for p in self.state.backward.get(test).iter() {
                if !p.mentions(var) {
                    result.push((p.clone(), test.clone()));
                }
            }
        }
        result
    }

    /// Drops every implication with a test mentioning `var`.
    pub fn remove_mentioning(&mut self, var: NumVar) {
        for (p, q) in self.implications_mentioning(var) {
            self.remove_implication(&p, &q);
        }
    }

    /// Keeps only the implications whose tests mention nothing but `vars`.
    pub fn retain_only(&mut self, vars: &VarSet) {
        let kept: Vec<(Test, Test)> = self
            .state
            .implications()
            .filter(|(p, q)| p.vars().is_subset(vars) && q.vars().is_subset(vars))
            .map(|(p, q)| (p.clone(), q.clone()))
            .collect();
        self.state = PredicatesState::from_implications(kept.iter().map(|(p, q)| (p, q)));
    }

    /// Rewrites every implication mentioning the substituted variable.
    ///
    /// All affected implications are removed before any rewritten one is
    /// added back, so that two tests rewritten onto each other do not clash.
    /// Implications that become trivial are dropped.
    pub fn substitute(&mut self, sigma: &Substitution) {
        if sigma.is_identity() {
            return;
        }
        let affected = self.implications_mentioning(sigma.var);
        for (p, q) in &affected {
            self.remove_implication(p, q);
        }
        for (p, q) in affected {
            let p = p.apply_substitution(sigma);
            let q = q.apply_substitution(sigma);
            if p == q || p.is_tautology() || q.is_tautology() {
                continue;
            }
            self.add_implication(p, q);
        }
    }

    pub fn rename(&mut self, from: NumVar, to: NumVar) {
        if from != to {
            self.substitute(&Substitution::renaming(from, to));
        }
    }

    pub fn union(&mut self, other: &PredicatesState) {
        self.state.forward = self.state.forward.union(&other.forward);
        self.state.backward = self.state.backward.union(&other.backward);
        self.state.occurrences = self.state.occurrences.union(&other.occurrences);
    }

    pub fn intersect(&mut self, other: &PredicatesState) {
        let common = self.state.forward.intersection(&other.forward);
        self.state = PredicatesState::from_implications(common.pairs());
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::linear::Linear;

    fn x() -> NumVar {
        NumVar::new(1)
    }

    fn y() -> NumVar {
        NumVar::new(2)
    }

    /// `c ≤ var`
    fn at_least(var: NumVar, c: i64) -> Test {
        Test::leq(Linear::term(-1, var).add_constant(c))
    }

    #[test]
    fn test_indexes_stay_consistent() {
        let mut builder = PredicatesState::default().builder();
        builder.add_implication(at_least(x(), 6), at_least(x(), 10));
        builder.add_implication(at_least(x(), 6), at_least(y(), 1));
        builder.add_implication(at_least(y(), 3), at_least(x(), 10));
        let state = builder.build();
        assert!(state.is_consistent());
        assert_eq!(state.len(), 3);
        assert_eq!(state.consequences(&at_least(x(), 6)).len(), 2);
        assert_eq!(state.premises(&at_least(x(), 10)).len(), 2);
        assert_eq!(state.premises_mentioning(&VarSet::singleton(y())).len(), 1);
        assert_eq!(state.consequences_mentioning(&VarSet::new()).len(), 2);
    }

    #[test]
    fn test_remove_mentioning() {
        let mut builder = PredicatesState::default().builder();
        builder.add_implication(at_least(x(), 6), at_least(x(), 10));
        builder.add_implication(at_least(y(), 3), at_least(y(), 4));
        builder.add_implication(at_least(y(), 3), at_least(x(), 1));
        builder.remove_mentioning(x());
        let state = builder.build();
        assert_eq!(state.len(), 1);
        assert!(!state.contains(x()));
        assert!(state.implies(&at_least(y(), 3), &at_least(y(), 4)));
    }

    #[test]
    fn test_substitution_shifts_without_clashing() {
        // x ≥ 0 → y ≥ 0 and x ≥ 1 → y ≥ 1 under x := x + 1
        let mut builder = PredicatesState::default().builder();
        builder.add_implication(at_least(x(), 0), at_least(y(), 0));
        builder.add_implication(at_least(x(), 1), at_least(y(), 1));
        let sigma = Substitution::inverting(&Linear::var(x()).add_constant(1), &1.into(), x()).unwrap();
        builder.substitute(&sigma);
        let state = builder.build();
        assert_eq!(state.len(), 2);
        assert!(state.implies(&at_least(x(), 1), &at_least(y(), 0)));
        assert!(state.implies(&at_least(x(), 2), &at_least(y(), 1)));
    }

    #[test]
    fn test_substitution_drops_trivial_implications() {
        let mut builder = PredicatesState::default().builder();
        builder.add_implication(at_least(x(), 3), at_least(y(), 3));
        builder.rename(y(), x());
        assert!(builder.build().is_empty());
    }

    #[test]
    fn test_retain_only_and_intersect() {
        let a = PredicatesState::from_implications([
            (&at_least(x(), 6), &at_least(x(), 10)),
            (&at_least(x(), 6), &at_least(y(), 1)),
        ]);
        let mut builder = a.builder();
        builder.retain_only(&VarSet::singleton(x()));
        assert_eq!(builder.state().len(), 1);

        let b = PredicatesState::from_implications([(&at_least(x(), 6), &at_least(y(), 1))]);
        let mut builder = a.builder();
        builder.intersect(&b);
        assert_eq!(builder.build(), b);
    }
}
