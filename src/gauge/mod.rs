//! The gauge functor: loop-counter relations.
//!
//! [`Gauge`] bounds every variable by a [`Wedge`], an interval whose bounds
//! are linear in *loop counters*. Variables that are only ever incremented
//! or assigned non-negative values become counter *candidates*; a widening
//! promotes the candidates common to both states to counters and discovers
//! the slope of every other variable with respect to them by linear
//! interpolation. Tests on counters are propagated through the wedges into
//! the child domain.
//!
//! For the loop
//!
//! ```text
//! k := 0; x := 0;
//! while (...) { k := k + 1; x := x + 1; }
//! ```
//!
//! the first widening at the loop head infers `x ∈ [k, k]` and `k ∈ [x, x]`,
//! which is already stable.

mod state;
pub mod wedge;

use std::fmt;

use im::OrdSet;
use log::debug;
use num_bigint::BigInt;
use num_traits::{One, Zero};

use crate::debug::DomainTree;
use crate::domain::NumericDomain;
use crate::error::{reachable, DomainError, Result};
use crate::expr::{Assign, Test, TestOp};
use crate::interval::Interval;
use crate::linear::Linear;
use crate::synth::SynthChannel;
use crate::types::{FoldMap, NumVar, ProgramPoint, VarSet, VarType};

pub use state::{GaugeBuilder, GaugeState};
pub use wedge::Wedge;

/// Loop-counter functor over a child domain `C`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gauge<C> {
    state: GaugeState,
    child: C,
}

impl<C: NumericDomain> Gauge<C> {
    /// Wraps `child`; no variable is bounded by a wedge yet.
    pub fn new(child: C) -> Self {
        Gauge {
            state: GaugeState::default(),
            child,
        }
    }

    pub fn state(&self) -> &GaugeState {
        &self.state
    }

    pub fn child(&self) -> &C {
        &self.child
    }

    fn build(state: GaugeState, child: C) -> Self {
        Gauge { state, child }
    }

    fn reduce(&self, child: C, test: &Test) -> Result<C> {
        self.state.builder().reduce(child, test)
    }
}

impl<C: NumericDomain> NumericDomain for Gauge<C> {
    const NAME: &'static str = "Gauge";

    fn empty() -> Self {
        Gauge::new(C::empty())
    }

    fn eval_assign(&self, assign: &Assign) -> Result<Self> {
        let mut builder = self.state.builder();
        builder.assign(&self.child, assign.lhs, &assign.rhs);
        let child = self.child.eval_assign(assign)?;
        let state = builder.build();
        debug!("{}: after {}: {}", Self::NAME, assign, state);
        Ok(Self::build(state, child))
    }

    fn eval_test(&self, test: &Test) -> Result<Self> {
        if test.is_tautology_report_unreachable()? {
            return Ok(self.clone());
        }
        let halves = || {
            test.split()
                .ok_or_else(|| DomainError::invariant(Self::NAME, format!("cannot split {}", test)))
        };
        match test.op() {
            TestOp::Neq => {
                let (below, above) = halves()?;
                let tested = Self::build(self.state.clone(), self.child.eval_test(test)?);
                let first = reachable(tested.eval_test(&below))?;
                let second = reachable(tested.eval_test(&above))?;
                match (first, second) {
                    (Some(a), Some(b)) => a.join(&b),
                    (Some(s), None) | (None, Some(s)) => Ok(s),
                    (None, None) => Err(DomainError::Unreachable),
                }
            }
            TestOp::Eq => {
                let (upper, lower) = halves()?;
                let child = self.child.eval_test(test)?;
                let child = self.reduce(child, &upper)?;
                let child = self.reduce(child, &lower)?;
                Ok(Self::build(self.state.clone(), child))
            }
            TestOp::Leq => {
                let child = self.reduce(self.child.eval_test(test)?, test)?;
                Ok(Self::build(self.state.clone(), child))
            }
        }
    }

    fn join(&self, other: &Self) -> Result<Self> {
        let mut builder = self.state.builder();
        builder.join(&self.child, &other.state, &other.child);
        Ok(Self::build(builder.build(), self.child.join(&other.child)?))
    }

    fn widen(&self, other: &Self) -> Result<Self> {
        let mut builder = self.state.builder();
        builder.widen(&self.child, &other.state, &other.child);
        let state = builder.build();
        debug!("{}: widening gives {}", Self::NAME, state);
        Ok(Self::build(state, self.child.widen(&other.child)?))
    }

    fn subset_or_equal(&self, other: &Self) -> Result<bool> {
        Ok(self.child.subset_or_equal(&other.child)? && self.state.subset_or_equal(&other.state))
    }

    fn project(&self, vars: &VarSet) -> Result<Self> {
        let mut builder = self.state.builder();
        for var in vars.iter() {
            builder.project(&self.child, var);
        }
        Ok(Self::build(builder.build(), self.child.project(vars)?))
    }

    fn substitute(&self, from: NumVar, to: NumVar) -> Result<Self> {
        let mut builder = self.state.builder();
        builder.substitute(from, to)?;
        Ok(Self::build(builder.build(), self.child.substitute(from, to)?))
    }

    fn introduce(&self, var: NumVar, ty: VarType, value: Option<BigInt>) -> Result<Self> {
        let mut builder = self.state.builder();
        builder.introduce(var, value.as_ref())?;
        Ok(Self::build(builder.build(), self.child.introduce(var, ty, value)?))
    }

    fn expand(&self, pairs: &FoldMap) -> Result<Self> {
        let mut builder = self.state.builder();
        for pair in pairs.iter() {
            builder.introduce(pair.ephemeral, None)?;
        }
        Ok(Self::build(builder.build(), self.child.expand(pairs)?))
    }

    fn fold(&self, pairs: &FoldMap) -> Result<Self> {
        let mut builder = self.state.builder();
        for pair in pairs.iter() {
            let joined = self.state.wedge(pair.permanent).join(&self.state.wedge(pair.ephemeral));
            builder.set_wedge(pair.permanent, joined);
            builder.project(&self.child, pair.ephemeral);
        }
        Ok(Self::build(builder.build(), self.child.fold(pairs)?))
    }

    fn copy_and_paste(&self, vars: &VarSet, from: &Self) -> Result<Self> {
        let mut builder = self.state.builder();
        for var in vars.iter() {
            builder.forget(&self.child, var);
        }
        Ok(Self::build(builder.build(), self.child.copy_and_paste(vars, &from.child)?))
    }

    /// The child's range, narrowed by the wedge when `expr` is a variable.
    fn query_range(&self, expr: &Linear) -> Interval {
        let range = self.child.query_range(expr);
        match expr.single_term() {
            Some((var, c)) if c.is_one() && expr.get_constant().is_zero() => {
                let bounded = self
                    .state
                    .wedge(var)
                    .concretize(|v| self.child.query_range(&Linear::var(v)));
                range.meet(&bounded).unwrap_or(range)
            }
            _ => range,
        }
    }

    fn query_equalities(&self, var: NumVar) -> OrdSet<Linear> {
        self.child.query_equalities(var)
    }

    fn synth_channel(&self) -> SynthChannel {
        self.child.synth_channel()
    }

    fn with_location(&self, point: ProgramPoint) -> Self {
        Self::build(self.state.clone(), self.child.with_location(point))
    }

    fn support(&self) -> VarSet {
        self.child.support()
    }

    fn dump(&self) -> DomainTree {
        DomainTree::new(Self::NAME)
            .entry(format!("counters: {}", self.state.counters()))
            .entry(format!("candidates: {}", self.state.candidates()))
            .entries(self.state.wedges().iter().map(|(v, w)| format!("{} ∈ {}", v, w)))
            .child(self.child.dump())
    }
}

impl<C: fmt::Display> fmt::Display for Gauge<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}", self.state, self.child)
    }
}
