//! Stripe store of the syntactic stripes functor.
//!
//! A stripe `lin ↦ w` stands for the equation `lin + w = 0`, where `w` is a
//! special variable owned by this functor and tracked by the child. Keys are
//! kept in equality normal form: at least two variables, zero constant and a
//! positive leading coefficient. Every special belongs to exactly one stripe.

use std::fmt;

use im::{OrdMap, OrdSet};
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Signed};

use crate::domain::{ChildOp, ChildOps, NumericDomain};
use crate::expr::{Assign, Rhs};
use crate::linear::{Linear, Substitution};
use crate::pmap::{MultiMap, ThreeWaySplit};
use crate::types::{NumVar, VarKind, VarSet, VarType};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StripesState {
    stripes: OrdMap<Linear, NumVar>,
    reverse: MultiMap<NumVar, Linear>,
    specials: VarSet,
}

impl StripesState {
    pub fn builder(&self) -> StripesBuilder {
        StripesBuilder {
            state: self.clone(),
            ops: ChildOps::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.stripes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stripes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Linear, NumVar)> + '_ {
        self.stripes.iter().map(|(lin, w)| (lin, *w))
    }

    /// The special of the stripe keyed by `lin`.
    pub fn special(&self, lin: &Linear) -> Option<NumVar> {
        self.stripes.get(lin).copied()
    }

    pub fn specials(&self) -> &VarSet {
        &self.specials
    }

    /// Stripes mentioning one of `vars`.
    pub fn mentioning_any(&self, vars: &VarSet) -> Vec<(Linear, NumVar)> {
        let mut keys = OrdSet::new();
        for var in vars.iter() {
            keys = keys.union(self.reverse.get(&var));
        }
        keys.into_iter()
            .filter_map(|lin| self.special(&lin).map(|w| (lin, w)))
            .collect()
    }

    /// Replaces `expr` by its special if its variable part is a stripe.
    ///
    /// With `expr = f·key + c` and the stripe `key + w = 0` the result is
    /// `-f·w + c`. Expressions that are not a stripe are returned unchanged.
    pub fn inline(&self, expr: &Linear) -> Linear {
        if expr.num_terms() < 2 {
            return expr.clone();
        }
        let (key, f) = expr.drop_constant().to_equality_with_factor();
        match self.special(&key) {
            Some(w) => Linear::term(-f, w).add_constant(expr.get_constant().clone()),
            None => expr.clone(),
        }
    }

    pub fn is_consistent(&self) -> bool {
        let stripes_ok = self.stripes.iter().all(|(lin, w)| {
            lin.num_terms() >= 2
                && lin.to_equality() == *lin
                && self.specials.contains(*w)
                && self.reverse.contains(w, lin)
                && lin.vars().iter().all(|v| self.reverse.contains(&v, lin))
        });
        let reverse_ok = self
            .reverse
            .pairs()
            .all(|(v, lin)| self.stripes.get(lin).map_or(false, |w| w == v || lin.contains(*v)));
        stripes_ok && reverse_ok && self.specials.len() == self.stripes.len()
    }
}

impl fmt::Display for StripesState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {{", self.len())?;
        for (i, (lin, w)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} + {} = 0", lin, w)?;
        }
        write!(f, "}}")
    }
}

/// `expr / f` as an assignment right-hand side with a positive divisor.
fn quotient(expr: Linear, f: &BigInt) -> Rhs {
    if f.is_one() {
        Rhs::lin(expr)
    } else if f.is_negative() {
        Rhs::scaled(-expr, -f)
    } else {
        Rhs::scaled(expr, f.clone())
    }
}

/// Mutable working copy of a [`StripesState`], together with the operations
/// the child has to replay before the operation that produced them.
#[derive(Debug, Clone)]
pub struct StripesBuilder {
    state: StripesState,
    ops: ChildOps,
}

impl StripesBuilder {
    pub fn build(self) -> StripesState {
        self.finish().0
    }

    pub fn finish(self) -> (StripesState, ChildOps) {
        debug_assert!(self.state.is_consistent(), "inconsistent stripes: {}", self.state);
        (self.state, self.ops)
    }

    pub fn state(&self) -> &StripesState {
        &self.state
    }

    pub fn ops(&self) -> &ChildOps {
        &self.ops
    }

    fn allocate(&mut self) -> NumVar {
        let w = NumVar::fresh(VarKind::Special);
        self.ops.push_introduce(w, VarType::Zeno, None);
        w
    }

    /// Binds `lin ↦ w`; on a collision with an existing stripe `w` is killed.
    fn insert(&mut self, lin: Linear, w: NumVar) {
        if self.state.stripes.contains_key(&lin) {
            self.ops.push_kill(w);
            return;
        }
        for v in lin.vars().iter() {
            self.state.reverse.add(v, lin.clone());
        }
        self.state.reverse.add(w, lin.clone());
        self.state.specials.insert(w);
        self.state.stripes.insert(lin, w);
    }

    /// Adds the stripe `key + w = 0` with a fresh special `w := value`.
    fn insert_fresh(&mut self, key: Linear, value: Rhs) {
        if self.state.stripes.contains_key(&key) {
            return;
        }
        let w = self.allocate();
        self.ops.push_assign(Assign::new(w, value));
        self.insert(key, w);
    }

    fn remove(&mut self, lin: &Linear) -> Option<NumVar> {
        let w = self.state.stripes.remove(lin)?;
        for v in lin.vars().iter() {
            self.state.reverse.remove(&v, lin);
        }
        self.state.reverse.remove(&w, lin);
        self.state.specials.remove(w);
        Some(w)
    }

    fn drop_stripe(&mut self, lin: &Linear) {
        if let Some(w) = self.remove(lin) {
            self.ops.push_kill(w);
        }
    }

    fn mentioning(&self, var: NumVar) -> Vec<Linear> {
        self.state.reverse.get(&var).into_iter().collect()
    }

    /// Drops `var` from the removed stripe `lin + w = 0`, folding its old
    /// value into `w`.
    fn shorten(&mut self, lin: &Linear, w: NumVar, var: NumVar) {
        let a = lin.coeff(var);
        let (key, f) = lin.drop_term(var).to_equality_with_factor();
        // f·key + (w + a·var) = 0
        let value = Linear::var(w).add_term(a, var);
        self.ops.push_assign(Assign::new(w, quotient(value, &f)));
        self.insert(key, w);
    }

    /// Removes `var` from every stripe: stripes over three or more variables
    /// are shortened, the others are dropped.
    pub fn remove_variable(&mut self, var: NumVar) {
        for lin in self.mentioning(var) {
            let Some(w) = self.remove(&lin) else { continue };
            if lin.num_terms() > 2 {
                self.shorten(&lin, w, var);
            } else {
                self.ops.push_kill(w);
            }
        }
    }

    /// Eliminates `var` through the equations the child knows, then removes
    /// it from every stripe.
    ///
    /// A stripe whose special is a constant `c` in `child` yields the
    /// equation `lin + c = 0`; together with the child's own equalities these
    /// are used to rewrite the other stripes mentioning `var` before it is
    /// removed.
    pub fn project_variable<C: NumericDomain>(&mut self, child: &C, var: NumVar) {
        let mentioning = self.mentioning(var);
        let mut equations = Vec::new();
        for lin in &mentioning {
            let Some(w) = self.state.special(lin) else { continue };
            if let Some(c) = child.query_range(&Linear::var(w)).as_constant() {
                equations.push(lin.add_constant(c.clone()));
            }
        }
        equations.extend(
            child
                .query_equalities(var)
                .into_iter()
                .filter(|e| e.vars().iter().all(|v| !v.is_special())),
        );
        for eq in &equations {
            for lin in &mentioning {
                if eq.drop_constant() != *lin {
                    self.rewrite_with(eq, var, lin);
                }
            }
        }
        self.remove_variable(var);
    }

    /// Adds the stripe obtained from `lin + w = 0` by solving `eq = 0` for
    /// `var`, keeping the stripe `lin` itself.
    fn rewrite_with(&mut self, eq: &Linear, var: NumVar, lin: &Linear) {
        let (Some(w), Some(sigma)) = (self.state.special(lin), eq.gen_substitution(var)) else {
            return;
        };
        let rewritten = lin.add_term(1, w).apply_substitution(&sigma);
        let k = rewritten.coeff(w);
        let terms = rewritten.drop_term(w).drop_constant();
        if terms.num_terms() < 2 || terms.vars().iter().any(|v| v.is_special()) {
            return;
        }
        // f·key + k·w + c = 0
        let (key, f) = terms.to_equality_with_factor();
        let value = Linear::term(k, w).add_constant(rewritten.get_constant().clone());
        self.insert_fresh(key, quotient(value, &f));
    }

    /// Transfers the stripes over the assignment `lhs := rhs`.
    ///
    /// Only queries `child` for the state before the assignment; the
    /// recorded child operations must run before the child evaluates it.
    pub fn assign<C: NumericDomain>(&mut self, child: &C, lhs: NumVar, rhs: &Rhs) {
        match rhs {
            Rhs::Lin { expr, divisor } if divisor.is_one() && expr.contains(lhs) => self.assign_invertible(lhs, expr),
            Rhs::Lin { expr, divisor } if divisor.is_one() => {
                self.project_variable(child, lhs);
                self.track_equation(lhs, expr);
            }
            _ => self.project_variable(child, lhs),
        }
    }

    /// `lhs := expr` with `lhs` occurring in `expr`.
    fn assign_invertible(&mut self, lhs: NumVar, expr: &Linear) {
        let mentioning = self.mentioning(lhs);
        if mentioning.is_empty() {
            // lhs - rest = a·lhs_old + c
            let rest = expr.drop_term(lhs).drop_constant();
            if rest.is_constant() {
                return;
            }
            let (key, f) = (&Linear::var(lhs) - &rest).to_equality_with_factor();
            let old = Linear::term(expr.coeff(lhs), lhs).add_constant(expr.get_constant().clone());
            self.insert_fresh(key, quotient(-old, &f));
            return;
        }
        let Some(sigma) = Substitution::inverting(expr, &BigInt::one(), lhs) else {
            return;
        };
        let removed: Vec<(Linear, NumVar)> = mentioning
            .iter()
            .filter_map(|lin| self.remove(lin).map(|w| (lin.clone(), w)))
            .collect();
        for (lin, w) in removed {
            // fac·lin_old = moved, evaluated over the new values
            let moved = lin.apply_substitution(&sigma);
            let terms = moved.drop_constant();
            if terms.num_terms() >= 2 {
                let (key, f) = terms.to_equality_with_factor();
                let value = Linear::term(sigma.fac.clone(), w).add_constant(moved.get_constant().clone());
                self.insert_fresh(key, quotient(value, &f));
                self.ops.push_kill(w);
            } else if lin.num_terms() > 2 {
                self.shorten(&lin, w, lhs);
            } else {
                self.ops.push_kill(w);
            }
        }
    }

    /// Records `expr - lhs = 0` after a non-invertible `lhs := expr`.
    fn track_equation(&mut self, lhs: NumVar, expr: &Linear) {
        let terms = expr.drop_constant().add_term(-1, lhs);
        if terms.num_terms() < 2 {
            return;
        }
        // f·key + c = 0
        let (key, f) = terms.to_equality_with_factor();
        let c = expr.get_constant();
        if c.is_multiple_of(&f) {
            self.insert_fresh(key, Rhs::constant(c / &f));
        }
    }

    /// Renames `from` to the untracked `to`.
    pub fn substitute(&mut self, from: NumVar, to: NumVar) {
        let removed: Vec<(Linear, NumVar)> = self
            .mentioning(from)
            .into_iter()
            .filter_map(|lin| self.remove(&lin).map(|w| (lin, w)))
            .collect();
        for (lin, w) in removed {
            let (key, f) = lin.rename(from, to).to_equality_with_factor();
            if !f.is_one() {
                self.ops.push_assign(Assign::new(w, quotient(Linear::var(w), &f)));
            }
            self.insert(key, w);
        }
    }

    fn bootstrap(&mut self, lin: &Linear, w: NumVar) {
        self.ops.push_introduce(w, VarType::Zeno, None);
        self.ops.push_assign(Assign::linear(w, -lin));
        self.insert(lin.clone(), w);
    }

    /// Moves the stripe `lin` of `second` from special `from` onto `onto`, or
    /// drops it in both if `onto` is already taken.
    fn unify(first: &mut StripesBuilder, second: &mut StripesBuilder, lin: &Linear, from: NumVar, onto: NumVar) {
        if second.state.specials.contains(onto) {
            first.drop_stripe(lin);
            second.drop_stripe(lin);
            return;
        }
        second.remove(lin);
        second.ops.push(ChildOp::Substitute { from, to: onto });
        second.insert(lin.clone(), onto);
    }

    /// Brings two states onto the same stripes for a join.
    ///
    /// A stripe known to only one side is set up on the other side if its
    /// special is free there, and dropped otherwise. A stripe with different
    /// specials is renamed in `second`.
    pub fn make_compatible(first: &mut StripesBuilder, second: &mut StripesBuilder) {
        let split = ThreeWaySplit::of(&first.state.stripes, &second.state.stripes);
        for (lin, w) in split.only_in_first.iter() {
            if second.state.specials.contains(*w) {
                first.drop_stripe(lin);
            } else {
                second.bootstrap(lin, *w);
            }
        }
        for (lin, w) in split.only_in_second.iter() {
            if first.state.specials.contains(*w) {
                second.drop_stripe(lin);
            } else {
                first.bootstrap(lin, *w);
            }
        }
        for (lin, (a, b)) in split.in_both_but_differing.iter() {
            StripesBuilder::unify(first, second, lin, *b, *a);
        }
        debug_assert_eq!(first.state.stripes, second.state.stripes);
    }

    /// Keeps only the stripes both states share.
    pub fn make_compatible_for_widening(first: &mut StripesBuilder, second: &mut StripesBuilder) {
        let split = ThreeWaySplit::of(&first.state.stripes, &second.state.stripes);
        for lin in split.only_in_first.keys() {
            first.drop_stripe(lin);
        }
        for lin in split.only_in_second.keys() {
            second.drop_stripe(lin);
        }
        for (lin, (a, b)) in split.in_both_but_differing.iter() {
            StripesBuilder::unify(first, second, lin, *b, *a);
        }
        debug_assert_eq!(first.state.stripes, second.state.stripes);
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn x() -> NumVar {
        NumVar::new(1)
    }

    fn y() -> NumVar {
        NumVar::new(2)
    }

    fn z() -> NumVar {
        NumVar::new(3)
    }

    fn kills(ops: &ChildOps) -> usize {
        ops.iter().filter(|op| matches!(op, ChildOp::Kill(_))).count()
    }

    /// `x + y - z + w = 0` with `w := 0`
    fn sum() -> StripesState {
        let mut builder = StripesState::default().builder();
        builder.assign(&crate::intervals::Intervals::default(), z(), &Rhs::lin(Linear::var(x()).add_term(1, y())));
        builder.build()
    }

    #[test]
    fn test_equation_becomes_stripe() {
        let state = sum();
        assert_eq!(state.len(), 1);
        assert!(state.is_consistent());
        let key = Linear::from_terms(0, [(1, x()), (1, y()), (-1, z())]);
        let w = state.special(&key).unwrap();
        assert!(w.is_special());
        assert_eq!(state.inline(&key.scale(&BigInt::from(-2)).add_constant(3)), Linear::term(2, w).add_constant(3));
        assert_eq!(state.inline(&Linear::var(x()).add_term(1, y())), Linear::var(x()).add_term(1, y()));
    }

    #[test]
    fn test_collision_kills_new_special() {
        let mut builder = sum().builder();
        // the same equation again allocates nothing
        builder.track_equation(z(), &Linear::var(x()).add_term(1, y()));
        assert_eq!(builder.state().len(), 1);
        assert!(builder.ops().is_empty());
    }

    #[test]
    fn test_remove_variable_shortens_then_kills() {
        let mut builder = sum().builder();
        builder.remove_variable(x());
        let key = Linear::var(y()).add_term(-1, z());
        assert!(builder.state().special(&key).is_some());
        assert_eq!(kills(builder.ops()), 0);
        builder.remove_variable(y());
        assert!(builder.state().is_empty());
        assert_eq!(kills(builder.ops()), 1);
        assert!(builder.build().is_consistent());
    }

    #[test]
    fn test_substitute_renormalizes() {
        let v = NumVar::new(9);
        let mut builder = sum().builder();
        builder.substitute(x(), v);
        assert!(builder.state().special(&Linear::from_terms(0, [(1, y()), (-1, z()), (1, v)])).is_some());
        assert!(builder.ops().is_empty());

        // u becomes the leading variable with a negative coefficient
        let u = NumVar::new(0);
        let mut builder = sum().builder();
        builder.substitute(z(), u);
        let key = Linear::from_terms(0, [(1, u), (-1, x()), (-1, y())]);
        assert!(builder.state().special(&key).is_some());
        assert_eq!(builder.ops().len(), 1);
        assert!(builder.build().is_consistent());
    }

    #[test]
    fn test_make_compatible_bootstraps_free_special() {
        let mut first = sum().builder();
        let mut second = StripesState::default().builder();
        StripesBuilder::make_compatible(&mut first, &mut second);
        assert_eq!(first.state(), second.state());
        assert!(first.ops().is_empty());
        assert!(matches!(second.ops().iter().next(), Some(ChildOp::Introduce { .. })));
    }

    #[test]
    fn test_make_compatible_renames_differing_special() {
        let mut first = sum().builder();
        let mut second = sum().builder();
        StripesBuilder::make_compatible(&mut first, &mut second);
        assert_eq!(first.state(), second.state());
        assert!(first.ops().is_empty());
        assert!(matches!(second.ops().iter().next(), Some(ChildOp::Substitute { .. })));
    }

    #[test]
    fn test_widening_drops_unshared() {
        let mut first = sum().builder();
        let mut second = StripesState::default().builder();
        StripesBuilder::make_compatible_for_widening(&mut first, &mut second);
        assert!(first.state().is_empty());
        assert_eq!(kills(first.ops()), 1);
        assert!(second.ops().is_empty());
    }
}
