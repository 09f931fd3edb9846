//! The synthesized side channel produced by domain operations.

use std::fmt;

use im::OrdSet;

use crate::expr::Test;
use crate::linear::Linear;
use crate::pmap::MultiMap;
use crate::types::VarSet;

/// Facts synthesized by a single operation: equalities `e = 0` and
/// implications `premise → consequence`.
///
/// The channel belongs to the state produced by the operation and is reset
/// by the next one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SynthChannel {
    equations: OrdSet<Linear>,
    implications: MultiMap<Test, Test>,
}

impl SynthChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.equations.is_empty() && self.implications.is_empty()
    }

    /// Records `eq = 0`, stored in equality normal form.
    pub fn add_equation(&mut self, eq: Linear) {
        self.equations.insert(eq.to_equality());
    }

    pub fn add_implication(&mut self, premise: Test, consequence: Test) {
        self.implications.add(premise, consequence);
    }

    pub fn add_implications(&mut self, implications: &MultiMap<Test, Test>) {
        self.implications = self.implications.union(implications);
    }

    pub fn equations(&self) -> &OrdSet<Linear> {
        &self.equations
    }

    pub fn implications(&self) -> &MultiMap<Test, Test> {
        &self.implications
    }

    /// Equations as tests.
    pub fn equality_tests(&self) -> impl Iterator<Item = Test> + '_ {
        self.equations.iter().map(|e| Test::eq(e.clone()))
    }

    /// Facts present in both channels.
    pub fn intersect(&self, other: &SynthChannel) -> SynthChannel {
        SynthChannel {
            equations: self.equations.iter().filter(|e| other.equations.contains(e)).cloned().collect(),
            implications: self.implications.intersection(&other.implications),
        }
    }

    pub fn union(&self, other: &SynthChannel) -> SynthChannel {
        SynthChannel {
            equations: self.equations.clone().union(other.equations.clone()),
            implications: self.implications.union(&other.implications),
        }
    }

    /// Drops every fact mentioning one of `vars`.
    pub fn remove_variables(&self, vars: &VarSet) -> SynthChannel {
        SynthChannel {
            equations: self.equations.iter().filter(|e| e.vars().is_disjoint(vars)).cloned().collect(),
            implications: self
                .implications
                .filter(|p, q| p.vars().is_disjoint(vars) && q.vars().is_disjoint(vars)),
        }
    }

    /// All variables mentioned by the channel.
    pub fn variables(&self) -> VarSet {
        let from_equations = self.equations.iter().fold(VarSet::new(), |acc, e| acc.union(&e.vars()));
        self.implications
            .pairs()
            .fold(from_equations, |acc, (p, q)| acc.union(&p.vars()).union(&q.vars()))
    }
}

impl fmt::Display for SynthChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        let mut first = true;
        for eq in self.equations.iter() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{} = 0", eq)?;
            first = false;
        }
        for (p, q) in self.implications.pairs() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{} → {}", p, q)?;
            first = false;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::types::NumVar;

    #[test]
    fn test_intersect_and_remove() {
        let (x, y) = (NumVar::new(1), NumVar::new(2));
        let mut a = SynthChannel::new();
        a.add_equation(Linear::var(x).add_constant(-3));
        a.add_equation(Linear::var(y));
        let mut b = SynthChannel::new();
        b.add_equation(Linear::term(-1, x).add_constant(3));

        let both = a.intersect(&b);
        assert_eq!(both.equations().len(), 1);
        assert_eq!(both.variables(), VarSet::singleton(x));

        let without_x = a.remove_variables(&VarSet::singleton(x));
        assert_eq!(without_x.variables(), VarSet::singleton(y));
    }

    #[test]
    fn test_implications_roundtrip_display() {
        let x = NumVar::new(1);
        let mut ch = SynthChannel::new();
        ch.add_implication(
            Test::leq(Linear::term(-1, x).add_constant(6)),
            Test::leq(Linear::term(-1, x).add_constant(10)),
        );
        assert_eq!(ch.to_string(), "{-x1 + 6 ≤ 0 → -x1 + 10 ≤ 0}");
        assert!(!ch.is_empty());
    }
}
