//! Set-valued generalization of [`Intervals`](crate::intervals::Intervals).
//!
//! Every variable maps to a small union of disjoint intervals, so
//! disequalities are represented exactly and joins lose nothing until the
//! piece limit is reached.

use std::fmt;

use im::{OrdMap, OrdSet};
use log::debug;
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::Zero;

use crate::debug::DomainTree;
use crate::domain::NumericDomain;
use crate::error::{DomainError, Result};
use crate::expr::{Assign, BinOp, Rhs, Test, TestOp};
use crate::interval::{Bound, Interval, IntervalSet};
use crate::linear::Linear;
use crate::pmap::ThreeWaySplit;
use crate::synth::SynthChannel;
use crate::types::{FoldMap, NumVar, VarSet, VarType};

#[derive(Debug, Clone, Default)]
pub struct IntervalSets {
    values: OrdMap<NumVar, IntervalSet>,
    channel: SynthChannel,
}

impl PartialEq for IntervalSets {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl Eq for IntervalSets {}

impl IntervalSets {
    pub fn from_values(values: impl IntoIterator<Item = (NumVar, IntervalSet)>) -> Self {
        IntervalSets {
            values: values.into_iter().collect(),
            channel: SynthChannel::new(),
        }
    }

    pub fn get(&self, var: NumVar) -> Option<&IntervalSet> {
        self.values.get(&var)
    }

    fn value_of(&self, var: NumVar) -> Result<&IntervalSet> {
        self.values.get(&var).ok_or(DomainError::support(Self::NAME, var))
    }

    fn build(&self, values: OrdMap<NumVar, IntervalSet>, channel: SynthChannel) -> Self {
        IntervalSets { values, channel }
    }

    fn evaluate(&self, expr: &Linear) -> IntervalSet {
        expr.terms()
            .map(|(var, coeff)| self.values.get(&var).cloned().unwrap_or_else(IntervalSet::top).scale(coeff))
            .fold(IntervalSet::constant(expr.get_constant().clone()), |acc, term| acc.add(&term))
    }

    fn evaluate_rhs(&self, rhs: &Rhs) -> Result<IntervalSet> {
        match rhs {
            Rhs::Lin { expr, divisor } => {
                if divisor.is_zero() {
                    return Ok(IntervalSet::constant(0));
                }
                self.evaluate(expr)
                    .div_round_inwards(divisor)
                    .ok_or(DomainError::Unreachable)
            }
            Rhs::Bin { op, left, right } => {
                let left = self.evaluate_rhs(left)?;
                let right = self.evaluate_rhs(right)?;
                Ok(apply_bin(*op, &left, &right))
            }
            Rhs::Range(interval) => Ok(IntervalSet::from(interval.clone())),
        }
    }
}

/// Solves `coeff · x ⋈ rhs` for `x` within `current`.
fn solve(op: TestOp, coeff: &BigInt, current: &IntervalSet, rhs: &IntervalSet) -> Option<IntervalSet> {
    match op {
        TestOp::Eq => current.meet(&rhs.div_round_inwards(coeff)?),
        TestOp::Leq => {
            let bound = Interval::down_from(rhs.convex_hull().high().clone()).div_round_inwards(coeff)?;
            current.meet_interval(&bound)
        }
        // coeff·x ≤ rhs - 1  ∨  -coeff·x ≤ -rhs - 1
        TestOp::Neq => {
            let one = BigInt::from(1);
            let below = solve(TestOp::Leq, coeff, current, &rhs.add(&IntervalSet::constant(-&one)));
            let above = solve(TestOp::Leq, &-coeff, current, &rhs.neg().add(&IntervalSet::constant(-one)));
            match (below, above) {
                (Some(a), Some(b)) => Some(a.join(&b)),
                (a, b) => a.or(b),
            }
        }
    }
}

fn apply_bin(op: BinOp, left: &IntervalSet, right: &IntervalSet) -> IntervalSet {
    if let (Some(l), Some(r)) = (left.as_constant(), right.as_constant()) {
        return match op {
            BinOp::Mul => IntervalSet::constant(l * r),
            BinOp::Div | BinOp::Mod if r.is_zero() => IntervalSet::constant(0),
            BinOp::Div => IntervalSet::constant(l / r),
            BinOp::Mod => IntervalSet::constant(l.mod_floor(r)),
            BinOp::Shl => left.shl(right),
            BinOp::Shr => left.shr(right),
        };
    }
    match op {
        BinOp::Mul => left.mul(right),
        BinOp::Div => left.div_round_zero(right),
        BinOp::Shl => left.shl(right),
        BinOp::Shr => left.shr(right),
        BinOp::Mod => IntervalSet::top(),
    }
}

impl NumericDomain for IntervalSets {
    const NAME: &'static str = "IntervalSets";

    fn empty() -> Self {
        Self::default()
    }

    fn eval_assign(&self, assign: &Assign) -> Result<Self> {
        self.value_of(assign.lhs)?;
        let value = self.evaluate_rhs(&assign.rhs)?;
        let mut channel = SynthChannel::new();
        if let Some(c) = value.as_constant() {
            channel.add_equation(Linear::var(assign.lhs).add_constant(-c));
        }
        Ok(self.build(self.values.update(assign.lhs, value), channel))
    }

    fn eval_test(&self, test: &Test) -> Result<Self> {
        if test.is_tautology_report_unreachable()? {
            return Ok(self.build(self.values.clone(), SynthChannel::new()));
        }
        let expr = test.expr();
        let mut values = self.values.clone();
        let mut channel = SynthChannel::new();
        for (var, coeff) in expr.terms() {
            let current = self.value_of(var)?;
            let rhs = self.evaluate(&expr.drop_term(var)).neg();
            let value = solve(test.op(), coeff, current, &rhs).ok_or(DomainError::Unreachable)?;
            if let Some(c) = value.as_constant() {
                channel.add_equation(Linear::var(var).add_constant(-c));
            }
            values.insert(var, value);
        }
        debug!("{} restricts to {}", test, self.build(values.clone(), SynthChannel::new()));
        Ok(self.build(values, channel))
    }

    fn join(&self, other: &Self) -> Result<Self> {
        let split = ThreeWaySplit::of(&self.values, &other.values);
        if let Some(var) = split.first_mismatch() {
            return Err(DomainError::support(Self::NAME, *var));
        }
        let mut values = self.values.clone();
        for (var, (a, b)) in split.in_both_but_differing.iter() {
            values.insert(*var, a.join(b));
        }
        Ok(self.build(values, SynthChannel::new()))
    }

    fn widen(&self, other: &Self) -> Result<Self> {
        let split = ThreeWaySplit::of(&self.values, &other.values);
        if let Some(var) = split.first_mismatch() {
            return Err(DomainError::support(Self::NAME, *var));
        }
        let mut values = self.values.clone();
        for (var, (a, b)) in split.in_both_but_differing.iter() {
            let value = if var.is_flag() { a.join(b) } else { a.widen(b) };
            values.insert(*var, value);
        }
        Ok(self.build(values, SynthChannel::new()))
    }

    fn subset_or_equal(&self, other: &Self) -> Result<bool> {
        let split = ThreeWaySplit::of(&self.values, &other.values);
        if let Some(var) = split.first_mismatch() {
            return Err(DomainError::support(Self::NAME, *var));
        }
        Ok(split.in_both_but_differing.values().all(|(a, b)| a.subset_of(b)))
    }

    fn project(&self, vars: &VarSet) -> Result<Self> {
        let mut values = self.values.clone();
        for var in vars.iter() {
            if values.remove(&var).is_none() {
                return Err(DomainError::support(Self::NAME, var));
            }
        }
        Ok(self.build(values, SynthChannel::new()))
    }

    fn substitute(&self, from: NumVar, to: NumVar) -> Result<Self> {
        let value = self.value_of(from)?.clone();
        if self.values.contains_key(&to) {
            return Err(DomainError::support(Self::NAME, to));
        }
        Ok(self.build(self.values.without(&from).update(to, value), SynthChannel::new()))
    }

    fn introduce(&self, var: NumVar, ty: VarType, value: Option<BigInt>) -> Result<Self> {
        if self.values.contains_key(&var) {
            return Err(DomainError::support(Self::NAME, var));
        }
        let initial = match (value, ty) {
            (Some(c), _) => IntervalSet::constant(c),
            (None, VarType::Bool) => IntervalSet::from(Interval::boolean()),
            (None, VarType::Zeno) => IntervalSet::top(),
            (None, VarType::Address) => IntervalSet::from(Interval::up_from(Bound::from(0))),
        };
        Ok(self.build(self.values.update(var, initial), SynthChannel::new()))
    }

    fn expand(&self, pairs: &FoldMap) -> Result<Self> {
        let mut values = self.values.clone();
        for pair in pairs.iter() {
            values.insert(pair.ephemeral, self.value_of(pair.permanent)?.clone());
        }
        Ok(self.build(values, SynthChannel::new()))
    }

    fn fold(&self, pairs: &FoldMap) -> Result<Self> {
        let mut values = self.values.clone();
        for pair in pairs.iter() {
            let joined = self.value_of(pair.permanent)?.join(self.value_of(pair.ephemeral)?);
            values.insert(pair.permanent, joined);
            values.remove(&pair.ephemeral);
        }
        Ok(self.build(values, SynthChannel::new()))
    }

    fn copy_and_paste(&self, vars: &VarSet, from: &Self) -> Result<Self> {
        let mut values = self.values.clone();
        for var in vars.iter() {
            values.insert(var, from.value_of(var)?.clone());
        }
        Ok(self.build(values, SynthChannel::new()))
    }

    fn query_range(&self, expr: &Linear) -> Interval {
        self.evaluate(expr).convex_hull()
    }

    fn query_equalities(&self, _var: NumVar) -> OrdSet<Linear> {
        OrdSet::new()
    }

    fn synth_channel(&self) -> SynthChannel {
        self.channel.clone()
    }

    fn support(&self) -> VarSet {
        self.values.keys().copied().collect()
    }

    fn dump(&self) -> DomainTree {
        DomainTree::new(Self::NAME).entries(self.values.iter().map(|(var, value)| format!("{} ∈ {}", var, value)))
    }
}

impl fmt::Display for IntervalSets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (var, value)) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} = {}", var, value)?;
        }
        write!(f, "}}")
    }
}
