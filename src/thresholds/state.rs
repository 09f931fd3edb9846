//! Threshold store of the thresholds-widening functor.

use std::fmt;

use im::{OrdMap, OrdSet};

use crate::expr::Test;
use crate::linear::{Linear, Substitution};
use crate::pmap::MultiMap;
use crate::types::{FoldMap, NumVar, ProgramPoint, VarSet};

/// Identity of a threshold across affine transformations: where it was
/// collected and the variable part of its test.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThresholdKey {
    origin: ProgramPoint,
    terms: Linear,
}

/// A test `e ≤ 0` found redundant at `origin`, together with the widening
/// points it has already narrowed at and the points at which it has been
/// transformed by an assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Threshold {
    origin: ProgramPoint,
    test: Test,
    consumed: OrdSet<ProgramPoint>,
    transformed: OrdSet<ProgramPoint>,
}

impl Threshold {
    pub fn new(origin: ProgramPoint, test: Test) -> Self {
        Threshold {
            origin,
            test,
            consumed: OrdSet::new(),
            transformed: OrdSet::new(),
        }
    }

    pub fn origin(&self) -> ProgramPoint {
        self.origin
    }

    pub fn test(&self) -> &Test {
        &self.test
    }

    pub fn key(&self) -> ThresholdKey {
        ThresholdKey {
            origin: self.origin,
            terms: self.test.expr().drop_constant(),
        }
    }

    pub fn is_consumed_at(&self, point: ProgramPoint) -> bool {
        self.consumed.contains(&point)
    }

    pub fn is_transformed_at(&self, point: ProgramPoint) -> bool {
        self.transformed.contains(&point)
    }

    /// The same threshold with another test; the marks are kept.
    pub fn with_test(&self, test: Test) -> Threshold {
        Threshold { test, ..self.clone() }
    }

    /// Resolves two variants of the same threshold: the syntactically weaker
    /// test wins, else the smaller one, and the marks are united. The result
    /// does not depend on the order of the arguments.
    pub fn merged(&self, other: &Threshold) -> Threshold {
        let [test, _] = preference(&self.test, &other.test);
        Threshold {
            origin: self.origin,
            test: test.clone(),
            consumed: self.consumed.clone().union(other.consumed.clone()),
            transformed: self.transformed.clone().union(other.transformed.clone()),
        }
    }
}

/// Orders two variants of a threshold test, preferred one first.
pub fn preference<'a>(a: &'a Test, b: &'a Test) -> [&'a Test; 2] {
    let a_weaker = a.is_syntactically_entailed_by(b);
    let b_weaker = b.is_syntactically_entailed_by(a);
    match (a_weaker, b_weaker) {
        (true, false) => [a, b],
        (false, true) => [b, a],
        _ if a <= b => [a, b],
        _ => [b, a],
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.test, self.origin)?;
        if !self.consumed.is_empty() {
            write!(f, " used [")?;
            for (i, point) in self.consumed.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", point)?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

/// The thresholds of a state, indexed by the variables they mention.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThresholdsState {
    thresholds: OrdMap<ThresholdKey, Threshold>,
    reverse: MultiMap<NumVar, ThresholdKey>,
}

impl ThresholdsState {
    pub fn builder(&self) -> ThresholdsBuilder {
        ThresholdsBuilder { state: self.clone() }
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Threshold> + '_ {
        self.thresholds.values()
    }

    pub fn get(&self, key: &ThresholdKey) -> Option<&Threshold> {
        self.thresholds.get(key)
    }

    /// Whether some threshold mentions `var`.
    pub fn contains(&self, var: NumVar) -> bool {
        self.reverse.contains_key(&var)
    }

    /// Whether a threshold with exactly this test is tracked.
    pub fn contains_test(&self, test: &Test) -> bool {
        self.thresholds.values().any(|t| &t.test == test)
    }

    pub fn is_consistent(&self) -> bool {
        let indexed = self.thresholds.iter().all(|(key, t)| {
            *key == t.key() && t.test.vars().iter().all(|v| self.reverse.contains(&v, key))
        });
        let reverse_ok = self.reverse.pairs().all(|(v, key)| {
            self.thresholds.get(key).map_or(false, |t| t.test.mentions(*v))
        });
        indexed && reverse_ok
    }
}

impl fmt::Display for ThresholdsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {{", self.len())?;
        for (i, t) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", t)?;
        }
        write!(f, "}}")
    }
}

/// Mutable working copy of a [`ThresholdsState`].
#[derive(Debug, Clone)]
pub struct ThresholdsBuilder {
    state: ThresholdsState,
}

impl ThresholdsBuilder {
    pub fn build(self) -> ThresholdsState {
        debug_assert!(self.state.is_consistent(), "inconsistent threshold index");
        self.state
    }

    pub fn state(&self) -> &ThresholdsState {
        &self.state
    }

    /// Adds `threshold`, resolving a collision with a tracked variant through
    /// [`Threshold::merged`].
    pub fn insert(&mut self, threshold: Threshold) {
        let key = threshold.key();
        let threshold = match self.state.thresholds.get(&key) {
            Some(existing) => existing.merged(&threshold),
            None => threshold,
        };
        for v in threshold.test.vars().iter() {
            self.state.reverse.add(v, key.clone());
        }
        self.state.thresholds.insert(key, threshold);
    }

    pub fn remove(&mut self, key: &ThresholdKey) {
        if let Some(t) = self.state.thresholds.remove(key) {
            for v in t.test.vars().iter() {
                self.state.reverse.remove(&v, key);
            }
        }
    }

    pub fn mark_consumed(&mut self, key: &ThresholdKey, point: ProgramPoint) {
        if let Some(t) = self.state.thresholds.get_mut(key) {
            t.consumed.insert(point);
        }
    }

    fn mentioning(&self, var: NumVar) -> Vec<Threshold> {
        self.state
            .reverse
            .get(&var)
            .iter()
            .filter_map(|key| self.state.thresholds.get(key).cloned())
            .collect()
    }

    fn mentioning_any(&self, vars: &VarSet) -> Vec<Threshold> {
        let keys: OrdSet<ThresholdKey> = vars.iter().flat_map(|v| self.state.reverse.get(&v)).collect();
        keys.iter()
            .filter_map(|key| self.state.thresholds.get(key).cloned())
            .collect()
    }

    /// Rewrites every threshold mentioning `var` through `sigma`.
    ///
    /// With a `location`, a threshold is transformed at most once per
    /// location and keeps its test on later visits. Thresholds that become
    /// trivial are dropped.
    pub fn substitute(&mut self, var: NumVar, sigma: &Substitution, location: Option<ProgramPoint>) {
        let affected: Vec<Threshold> = self
            .mentioning(var)
            .into_iter()
            .filter(|t| location.map_or(true, |p| !t.is_transformed_at(p)))
            .collect();
        for t in &affected {
            self.remove(&t.key());
        }
        for t in affected {
            let test = t.test.apply_substitution(sigma);
            if test.is_tautology() {
                continue;
            }
            let mut moved = t.with_test(test);
            if let Some(point) = location {
                moved.transformed.insert(point);
            }
            self.insert(moved);
        }
    }

    pub fn rename(&mut self, from: NumVar, to: NumVar) {
        if from != to {
            self.substitute(from, &Substitution::renaming(from, to), None);
        }
    }

    /// Drops every threshold mentioning `var`, after trying to rewrite them
    /// through one of the `equalities` `e = 0` known for `var`.
    pub fn remove_mentioning(&mut self, var: NumVar, equalities: &OrdSet<Linear>, location: Option<ProgramPoint>) {
        if let Some(sigma) = equalities.iter().find_map(|eq| eq.gen_substitution(var)) {
            self.substitute(var, &sigma, location);
        }
        for t in self.mentioning(var) {
            self.remove(&t.key());
        }
    }

    /// Copies every threshold on a permanent onto its ephemeral.
    pub fn expand(&mut self, pairs: &FoldMap) {
        for t in self.mentioning_any(&pairs.permanents()) {
            let test = pairs
                .iter()
                .fold(t.test.clone(), |test, pair| test.rename(pair.permanent, pair.ephemeral));
            self.insert(t.with_test(test));
        }
    }

    /// Keeps the thresholds that hold for a permanent and, renamed, for its
    /// ephemeral; thresholds relating the two are dropped.
    pub fn fold(&mut self, pairs: &FoldMap) {
        let permanents = pairs.permanents();
        let ephemerals = pairs.ephemerals();
        let mut on_permanents = OrdMap::new();
        let mut on_ephemerals = OrdMap::new();
        for t in self.mentioning_any(&permanents.union(&ephemerals)) {
            self.remove(&t.key());
            let vars = t.test.vars();
            let has_permanent = !vars.is_disjoint(&permanents);
            let has_ephemeral = !vars.is_disjoint(&ephemerals);
            if has_permanent && has_ephemeral {
                continue;
            }
            if has_permanent {
                on_permanents.insert(t.key(), t);
            } else {
                let test = pairs
                    .iter()
                    .fold(t.test.clone(), |test, pair| test.rename(pair.ephemeral, pair.permanent));
                let renamed = t.with_test(test);
                on_ephemerals.insert(renamed.key(), renamed);
            }
        }
        for (key, t) in on_permanents {
            if let Some(other) = on_ephemerals.get(&key) {
                self.insert(t.merged(other));
            }
        }
    }

    /// Replaces the thresholds on `vars` by those `from` has on them.
    pub fn paste(&mut self, vars: &VarSet, from: &ThresholdsState) {
        for t in self.mentioning_any(vars) {
            self.remove(&t.key());
        }
        for t in from.iter() {
            let mentioned = t.test.vars();
            if !mentioned.is_empty() && mentioned.is_subset(vars) {
                self.insert(t.clone());
            }
        }
    }
}
