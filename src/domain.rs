//! The protocol shared by every numeric domain.
//!
//! A domain is an immutable value: every operation returns a new state and
//! leaves the receiver untouched. Functor domains wrap a child domain; they
//! decide locally how an operation affects their own state, record the
//! effects it has on the child as a queue of [`ChildOp`]s, and replay that
//! queue on the child before delegating the operation itself.
//!
//! # Lattice properties
//!
//! For states `a` and `b` over the same support:
//! - `a ⊑ a ⊔ b` and `b ⊑ a ⊔ b`
//! - `a ⊔ b` and `b ⊔ a` are equivalent
//! - `a ⊔ b ⊑ a ∇ b`
//! - widening an increasing chain stabilizes

use std::fmt;

use im::OrdSet;
use log::trace;
use num_bigint::BigInt;

use crate::debug::DomainTree;
use crate::error::Result;
use crate::expr::{Assign, Test};
use crate::interval::Interval;
use crate::linear::Linear;
use crate::synth::SynthChannel;
use crate::types::{FoldMap, NumVar, ProgramPoint, VarSet, VarType};

/// A numeric abstract domain.
///
/// Operations that combine two states (`join`, `widen`, `subset_or_equal`)
/// require both states to range over the same variables; a mismatch is
/// reported as [`DomainError::VariableSupport`](crate::error::DomainError).
pub trait NumericDomain: Clone + fmt::Debug + fmt::Display {
    /// Name used in error reports and log output.
    const NAME: &'static str;

    /// The state tracking no variables.
    fn empty() -> Self;

    /// Transfer function of an assignment.
    fn eval_assign(&self, assign: &Assign) -> Result<Self>;

    /// Restricts the state to executions where `test` holds.
    ///
    /// Returns [`DomainError::Unreachable`](crate::error::DomainError) if no
    /// such execution exists.
    fn eval_test(&self, test: &Test) -> Result<Self>;

    fn join(&self, other: &Self) -> Result<Self>;

    fn widen(&self, other: &Self) -> Result<Self>;

    /// Whether `self ⊑ other`.
    fn subset_or_equal(&self, other: &Self) -> Result<bool>;

    /// Removes `vars` from the support.
    fn project(&self, vars: &VarSet) -> Result<Self>;

    /// Renames `from` to `to`, which must not be tracked yet.
    fn substitute(&self, from: NumVar, to: NumVar) -> Result<Self>;

    /// Adds `var` to the support, either unconstrained within its type or
    /// bound to `value`.
    fn introduce(&self, var: NumVar, ty: VarType, value: Option<BigInt>) -> Result<Self>;

    /// Adds every ephemeral of `pairs` as a copy of its permanent.
    fn expand(&self, pairs: &FoldMap) -> Result<Self>;

    /// Merges every ephemeral of `pairs` into its permanent and removes it.
    fn fold(&self, pairs: &FoldMap) -> Result<Self>;

    /// Replaces everything known about `vars` by what `from` knows about them.
    fn copy_and_paste(&self, vars: &VarSet, from: &Self) -> Result<Self>;

    /// Convex range of `expr`; untracked variables are unconstrained.
    fn query_range(&self, expr: &Linear) -> Interval;

    /// Linear equalities `e = 0` known to hold and mentioning `var`.
    fn query_equalities(&self, var: NumVar) -> OrdSet<Linear>;

    /// Facts synthesized by the operation that produced this state.
    fn synth_channel(&self) -> SynthChannel;

    /// Tells the domain at which program point it is about to be used.
    fn with_location(&self, _point: ProgramPoint) -> Self {
        self.clone()
    }

    /// Variables currently tracked.
    fn support(&self) -> VarSet;

    fn dump(&self) -> DomainTree;

    /// Whether `self` and `other` are mutually included.
    fn equivalent(&self, other: &Self) -> Result<bool> {
        Ok(self.subset_or_equal(other)? && other.subset_or_equal(self)?)
    }

    /// Applies `test` unless it makes the state unreachable.
    fn eval_test_or_none(&self, test: &Test) -> Result<Option<Self>> {
        crate::error::reachable(self.eval_test(test))
    }
}

/// An effect on a child domain decided by the wrapping functor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildOp {
    Introduce {
        var: NumVar,
        ty: VarType,
        value: Option<BigInt>,
    },
    Kill(NumVar),
    Assign(Assign),
    Substitute { from: NumVar, to: NumVar },
}

impl fmt::Display for ChildOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildOp::Introduce { var, value: Some(v), .. } => write!(f, "intro {} = {}", var, v),
            ChildOp::Introduce { var, ty, value: None } => write!(f, "intro {}: {:?}", var, ty),
            ChildOp::Kill(var) => write!(f, "kill {}", var),
            ChildOp::Assign(assign) => write!(f, "{}", assign),
            ChildOp::Substitute { from, to } => write!(f, "{} ↦ {}", from, to),
        }
    }
}

/// An ordered queue of [`ChildOp`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildOps {
    ops: Vec<ChildOp>,
}

impl ChildOps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChildOp> + '_ {
        self.ops.iter()
    }

    pub fn push(&mut self, op: ChildOp) {
        self.ops.push(op);
    }

    pub fn push_introduce(&mut self, var: NumVar, ty: VarType, value: Option<BigInt>) {
        self.ops.push(ChildOp::Introduce { var, ty, value });
    }

    pub fn push_kill(&mut self, var: NumVar) {
        self.ops.push(ChildOp::Kill(var));
    }

    pub fn push_assign(&mut self, assign: Assign) {
        self.ops.push(ChildOp::Assign(assign));
    }

    pub fn push_substitute(&mut self, from: NumVar, to: NumVar) {
        self.ops.push(ChildOp::Substitute { from, to });
    }

    pub fn extend(&mut self, other: ChildOps) {
        self.ops.extend(other.ops);
    }

    /// Replays the queue on `child` in order.
    pub fn apply<D: NumericDomain>(&self, child: &D) -> Result<D> {
        let mut state = child.clone();
        for op in &self.ops {
            trace!("{}: child op {}", D::NAME, op);
            state = match op {
                ChildOp::Introduce { var, ty, value } => state.introduce(*var, *ty, value.clone())?,
                ChildOp::Kill(var) => state.project(&VarSet::singleton(*var))?,
                ChildOp::Assign(assign) => state.eval_assign(assign)?,
                ChildOp::Substitute { from, to } => state.substitute(*from, *to)?,
            };
        }
        Ok(state)
    }
}
