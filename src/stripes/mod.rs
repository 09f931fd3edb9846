//! The syntactic stripes functor.
//!
//! [`Stripes`] remembers linear equations between program variables as
//! *stripes* `lin + w = 0`, where `w` is a special variable it introduces
//! into the child. The child only ever sees `w` as an ordinary variable, so
//! any non-relational child bounds the whole expression `lin` through it:
//!
//! ```text
//! z := x + y;        stripe  x + y - z + w = 0,  w = 0
//! z := z + 1;        stripe  x + y - z + w' = 0, w' = 1
//! ```
//!
//! Tests whose variable part is a stripe are rewritten onto its special, and
//! every stripe mentioning a tested variable is replayed as an equation so
//! that the child propagates the bounds between its variables.

mod state;

use std::fmt;

use im::OrdSet;
use log::debug;
use num_bigint::BigInt;

use crate::debug::DomainTree;
use crate::domain::NumericDomain;
use crate::error::{DomainError, Result};
use crate::expr::{Assign, Test};
use crate::interval::Interval;
use crate::linear::Linear;
use crate::synth::SynthChannel;
use crate::types::{FoldMap, NumVar, ProgramPoint, VarSet, VarType};

pub use state::{StripesBuilder, StripesState};

/// Syntactic relational functor over a child domain `C`.
#[derive(Debug, Clone)]
pub struct Stripes<C> {
    state: StripesState,
    child: C,
}

impl<C: NumericDomain> Stripes<C> {
    pub fn new(child: C) -> Self {
        Stripes {
            state: StripesState::default(),
            child,
        }
    }

    pub fn state(&self) -> &StripesState {
        &self.state
    }

    pub fn child(&self) -> &C {
        &self.child
    }

    fn build(state: StripesState, child: C) -> Self {
        Stripes { state, child }
    }

    /// Makes both operands agree on their stripes and returns the common
    /// state with both children adjusted to it.
    fn compatible(&self, other: &Self, widening: bool) -> Result<(StripesState, C, C)> {
        let mut first = self.state.builder();
        let mut second = other.state.builder();
        if widening {
            StripesBuilder::make_compatible_for_widening(&mut first, &mut second);
        } else {
            StripesBuilder::make_compatible(&mut first, &mut second);
        }
        let (state, first_ops) = first.finish();
        let (_, second_ops) = second.finish();
        Ok((state, first_ops.apply(&self.child)?, second_ops.apply(&other.child)?))
    }

    fn unimplemented(operation: &'static str) -> DomainError {
        DomainError::Unimplemented {
            domain: Self::NAME,
            operation,
        }
    }
}

impl<C: NumericDomain> NumericDomain for Stripes<C> {
    const NAME: &'static str = "Stripes";

    fn empty() -> Self {
        Stripes::new(C::empty())
    }

    fn eval_assign(&self, assign: &Assign) -> Result<Self> {
        let mut builder = self.state.builder();
        builder.assign(&self.child, assign.lhs, &assign.rhs);
        let (state, ops) = builder.finish();
        let child = ops.apply(&self.child)?.eval_assign(assign)?;
        debug!("{}: after {}: {}", Self::NAME, assign, state);
        Ok(Self::build(state, child))
    }

    fn eval_test(&self, test: &Test) -> Result<Self> {
        if test.is_tautology_report_unreachable()? {
            return Ok(self.clone());
        }
        let mut child = self.child.eval_test(test)?;
        let inlined = self.state.inline(test.expr());
        if inlined != *test.expr() {
            child = child.eval_test(&Test::new(inlined, test.op()))?;
        }
        for (lin, w) in self.state.mentioning_any(&test.vars()) {
            child = child.eval_test(&Test::eq(lin.add_term(1, w)))?;
        }
        Ok(Self::build(self.state.clone(), child))
    }

    fn join(&self, other: &Self) -> Result<Self> {
        let (state, left, right) = self.compatible(other, false)?;
        Ok(Self::build(state, left.join(&right)?))
    }

    fn widen(&self, other: &Self) -> Result<Self> {
        let (state, left, right) = self.compatible(other, true)?;
        debug!("{}: widening keeps {}", Self::NAME, state);
        Ok(Self::build(state, left.widen(&right)?))
    }

    fn subset_or_equal(&self, other: &Self) -> Result<bool> {
        let (_, left, right) = self.compatible(other, true)?;
        left.subset_or_equal(&right)
    }

    fn project(&self, vars: &VarSet) -> Result<Self> {
        // every variable is eliminated against the child as left by the previous one
        let mut state = self.state.clone();
        let mut child = self.child.clone();
        for var in vars.iter() {
            let mut builder = state.builder();
            builder.project_variable(&child, var);
            let (next, ops) = builder.finish();
            child = ops.apply(&child)?;
            state = next;
        }
        Ok(Self::build(state, child.project(vars)?))
    }

    fn substitute(&self, from: NumVar, to: NumVar) -> Result<Self> {
        let mut builder = self.state.builder();
        builder.substitute(from, to);
        let (state, ops) = builder.finish();
        Ok(Self::build(state, ops.apply(&self.child)?.substitute(from, to)?))
    }

    fn introduce(&self, var: NumVar, ty: VarType, value: Option<BigInt>) -> Result<Self> {
        Ok(Self::build(self.state.clone(), self.child.introduce(var, ty, value)?))
    }

    fn expand(&self, _pairs: &FoldMap) -> Result<Self> {
        Err(Self::unimplemented("expand"))
    }

    fn fold(&self, _pairs: &FoldMap) -> Result<Self> {
        Err(Self::unimplemented("fold"))
    }

    fn copy_and_paste(&self, vars: &VarSet, from: &Self) -> Result<Self> {
        let mut builder = self.state.builder();
        for var in vars.iter() {
            builder.remove_variable(var);
        }
        let (state, ops) = builder.finish();
        Ok(Self::build(state, ops.apply(&self.child)?.copy_and_paste(vars, &from.child)?))
    }

    /// The child's range of `expr`, narrowed by the range of the special if
    /// `expr` is a stripe.
    fn query_range(&self, expr: &Linear) -> Interval {
        let range = self.child.query_range(expr);
        let inlined = self.state.inline(expr);
        if inlined == *expr {
            return range;
        }
        range.meet(&self.child.query_range(&inlined)).unwrap_or(range)
    }

    fn query_equalities(&self, var: NumVar) -> OrdSet<Linear> {
        let mut result: OrdSet<Linear> = self
            .child
            .query_equalities(var)
            .into_iter()
            .filter(|e| e.vars().is_disjoint(self.state.specials()))
            .collect();
        for (lin, w) in self.state.mentioning_any(&VarSet::singleton(var)) {
            if let Some(c) = self.child.query_range(&Linear::var(w)).as_constant() {
                result.insert(lin.add_constant(c.clone()));
            }
        }
        result
    }

    fn synth_channel(&self) -> SynthChannel {
        self.child.synth_channel().remove_variables(self.state.specials())
    }

    fn with_location(&self, point: ProgramPoint) -> Self {
        Self::build(self.state.clone(), self.child.with_location(point))
    }

    fn support(&self) -> VarSet {
        self.child.support().difference(self.state.specials())
    }

    fn dump(&self) -> DomainTree {
        DomainTree::new(Self::NAME)
            .entries(self.state.iter().map(|(lin, w)| format!("{} + {} = 0", lin, w)))
            .child(self.child.dump())
    }
}

impl<C: fmt::Display> fmt::Display for Stripes<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}", self.state, self.child)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::domain::tests::{check_lattice_laws, check_widening_terminates};
    use crate::expr::Rhs;
    use crate::intervals::Intervals;

    type S = Stripes<Intervals>;

    fn x() -> NumVar {
        NumVar::new(1)
    }

    fn y() -> NumVar {
        NumVar::new(2)
    }

    fn z() -> NumVar {
        NumVar::new(3)
    }

    fn with_vars(vars: &[NumVar]) -> S {
        vars.iter()
            .fold(S::empty(), |s, v| s.introduce(*v, VarType::Zeno, None).unwrap())
    }

    fn run(s: &S, stmts: &[Assign]) -> S {
        stmts.iter().fold(s.clone(), |s, a| s.eval_assign(a).unwrap())
    }

    fn within(var: NumVar, low: i64, high: i64) -> Assign {
        Assign::new(var, Rhs::range(Interval::of(low, high)))
    }

    /// `x, y ∈ [0, 10]` and `z := x + y + c`
    fn sum(c: i64) -> S {
        run(
            &with_vars(&[x(), y(), z()]),
            &[
                within(x(), 0, 10),
                within(y(), 0, 10),
                Assign::linear(z(), Linear::var(x()).add_term(1, y()).add_constant(c)),
            ],
        )
    }

    fn difference() -> Linear {
        Linear::from_terms(0, [(1, x()), (1, y()), (-1, z())])
    }

    #[test]
    fn test_stripe_bounds_relation() {
        let s = sum(0);
        assert_eq!(s.state().len(), 1);
        assert_eq!(s.query_range(&difference()), Interval::constant(0));
        assert_eq!(s.child().query_range(&difference()), Interval::of(-20, 20));
        assert_eq!(s.support(), VarSet::from([x(), y(), z()]));
    }

    #[test]
    fn test_invertible_assignment_moves_stripe() {
        let s = sum(0).eval_assign(&Assign::increment(z(), 1)).unwrap();
        assert_eq!(s.state().len(), 1);
        assert_eq!(s.query_range(&difference()), Interval::constant(-1));
        assert_eq!(s.query_range(&difference().scale(&BigInt::from(-2))), Interval::constant(2));
    }

    #[test]
    fn test_overwrite_shortens_stripe() {
        let s = sum(0).eval_assign(&Assign::constant(x(), 5)).unwrap();
        assert_eq!(s.state().len(), 1);
        // w = old x, so y - z = -x_old ∈ [-10, 0]
        let rest = Linear::var(y()).add_term(-1, z());
        assert_eq!(s.query_range(&rest), Interval::of(-10, 0));
        assert_eq!(s.child().query_range(&rest), Interval::of(-20, 10));
    }

    #[test]
    fn test_copy_propagates_test_bounds() {
        let s = run(
            &with_vars(&[x(), y()]),
            &[within(y(), 0, 100), Assign::linear(x(), Linear::var(y()).add_constant(1))],
        );
        let tested = s.eval_test(&Test::leq(Linear::var(x()).add_constant(-10))).unwrap();
        assert_eq!(tested.query_range(&Linear::var(y())), Interval::of(0, 9));
        assert_eq!(tested.query_range(&Linear::var(x())), Interval::of(1, 10));
    }

    #[test]
    fn test_inlined_test_refutes() {
        let s = sum(0);
        // x + y - z ≤ -1 contradicts x + y = z
        let test = Test::leq(difference().add_constant(1));
        assert!(s.eval_test(&test).unwrap_err().is_unreachable());
        assert!(s.eval_test(&Test::eq(difference())).is_ok());
    }

    #[test]
    fn test_join_unifies_specials() {
        let joined = sum(0).join(&sum(2)).unwrap();
        assert_eq!(joined.state().len(), 1);
        assert_eq!(joined.query_range(&difference()), Interval::of(-2, 0));
        assert!(sum(0).subset_or_equal(&joined).unwrap());
        assert!(sum(2).subset_or_equal(&joined).unwrap());
    }

    #[test]
    fn test_join_bootstraps_missing_stripe() {
        let other = run(
            &with_vars(&[x(), y(), z()]),
            &[within(x(), 0, 10), within(y(), 0, 10), Assign::constant(z(), 7)],
        );
        assert!(other.state().is_empty());
        let joined = sum(0).join(&other).unwrap();
        assert_eq!(joined.state().len(), 1);
        assert_eq!(joined.query_range(&difference()), Interval::of(-7, 13));
        assert_eq!(joined.support(), VarSet::from([x(), y(), z()]));
    }

    #[test]
    fn test_widening_drops_unshared_stripes() {
        let other = run(
            &with_vars(&[x(), y(), z()]),
            &[within(x(), 0, 10), within(y(), 0, 10), Assign::constant(z(), 7)],
        );
        let widened = sum(0).widen(&other).unwrap();
        assert!(widened.state().is_empty());
        assert_eq!(widened.child().support(), VarSet::from([x(), y(), z()]));
    }

    #[test]
    fn test_project_keeps_equation_through_constant_special() {
        // y := x; z := x + 5; forgetting x keeps z = y + 5
        let s = run(
            &with_vars(&[x(), y(), z()]),
            &[
                Assign::linear(y(), Linear::var(x())),
                Assign::linear(z(), Linear::var(x()).add_constant(5)),
            ],
        );
        assert_eq!(s.state().len(), 2);
        let projected = s.project(&VarSet::singleton(x())).unwrap();
        assert_eq!(projected.state().len(), 1);
        let gap = Linear::var(z()).add_term(-1, y());
        assert_eq!(projected.query_range(&gap), Interval::constant(5));
        assert_eq!(projected.support(), VarSet::from([y(), z()]));
        assert!(projected.query_equalities(y()).contains(&Linear::var(y()).add_term(-1, z()).add_constant(5)));
    }

    #[test]
    fn test_substitute_renames_stripes() {
        let v = NumVar::new(0);
        let s = sum(0).substitute(z(), v).unwrap();
        let renamed = Linear::from_terms(0, [(1, x()), (1, y()), (-1, v)]);
        assert_eq!(s.query_range(&renamed), Interval::constant(0));
        assert_eq!(s.support(), VarSet::from([v, x(), y()]));
    }

    #[test]
    fn test_summarization_is_unimplemented() {
        let pairs: FoldMap = [(x(), NumVar::new(7))].into_iter().collect();
        assert_eq!(
            sum(0).expand(&pairs).unwrap_err(),
            DomainError::Unimplemented {
                domain: "Stripes",
                operation: "expand"
            }
        );
        assert!(matches!(sum(0).fold(&pairs), Err(DomainError::Unimplemented { operation: "fold", .. })));
    }

    #[test]
    fn test_channel_hides_specials() {
        let s = sum(0).eval_test(&Test::leq(Linear::var(x()).add_constant(-3))).unwrap();
        assert!(s.synth_channel().variables().is_disjoint(s.state().specials()));
        assert!(s.child().support().len() > s.support().len());
    }

    #[test]
    fn test_copy_and_paste_forgets_pasted_variables() {
        let other = run(
            &with_vars(&[x(), y(), z()]),
            &[within(x(), 0, 10), within(y(), 0, 10), Assign::constant(z(), 50)],
        );
        let pasted = sum(0).copy_and_paste(&VarSet::singleton(z()), &other).unwrap();
        assert_eq!(pasted.query_range(&Linear::var(z())), Interval::constant(50));
        // x + y - z was shortened to x + y before z was replaced
        assert_eq!(pasted.state().len(), 1);
        assert!(pasted.state().special(&Linear::var(x()).add_term(1, y())).is_some());
    }

    #[test]
    fn test_lattice_laws() {
        let samples = vec![sum(0), sum(2), sum(0).eval_assign(&Assign::constant(z(), 3)).unwrap()];
        check_lattice_laws(&samples);
        check_widening_terminates((0..20).map(sum), 5);
    }

    #[test]
    fn test_dump_lists_stripes() {
        let tree = sum(0).dump();
        assert_eq!(tree.label, "Stripes");
        assert_eq!(tree.entries.len(), 1);
        assert_eq!(tree.depth(), 2);
    }
}
