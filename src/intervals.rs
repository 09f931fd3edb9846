//! The leaf interval domain.
//!
//! [`Intervals`] maps every tracked variable to a non-empty [`Interval`].
//! Tests are solved one variable at a time; disequalities are split into
//! two inequalities whose results are joined. Joins and widenings feed the
//! bounds they lose to [`synthesis`](crate::synthesis), so that functors
//! higher in the stack can recover them.

use std::fmt;

use im::{OrdMap, OrdSet};
use log::debug;
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::Zero;

use crate::debug::DomainTree;
use crate::domain::NumericDomain;
use crate::error::{reachable, DomainError, Result};
use crate::expr::{Assign, BinOp, Rhs, Test, TestOp};
use crate::interval::{Bound, Interval};
use crate::linear::Linear;
use crate::pmap::ThreeWaySplit;
use crate::synth::SynthChannel;
use crate::synthesis;
use crate::types::{FoldMap, NumVar, VarSet, VarType};

/// Non-relational interval domain.
#[derive(Debug, Clone, Default)]
pub struct Intervals {
    values: OrdMap<NumVar, Interval>,
    channel: SynthChannel,
}

impl PartialEq for Intervals {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl Eq for Intervals {}

impl Intervals {
    pub fn from_values(values: impl IntoIterator<Item = (NumVar, Interval)>) -> Self {
        Intervals {
            values: values.into_iter().collect(),
            channel: SynthChannel::new(),
        }
    }

    pub fn get(&self, var: NumVar) -> Option<&Interval> {
        self.values.get(&var)
    }

    fn value_of(&self, var: NumVar) -> Result<&Interval> {
        self.values.get(&var).ok_or(DomainError::support(Self::NAME, var))
    }

    fn build(&self, values: OrdMap<NumVar, Interval>, channel: SynthChannel) -> Self {
        Intervals { values, channel }
    }

    /// Range of `expr`; untracked variables are unconstrained.
    fn evaluate(&self, expr: &Linear) -> Interval {
        expr.terms()
            .map(|(var, coeff)| self.values.get(&var).cloned().unwrap_or_else(Interval::top).scale(coeff))
            .fold(Interval::constant(expr.get_constant().clone()), |acc, term| acc.add(&term))
    }

    fn evaluate_rhs(&self, rhs: &Rhs) -> Result<Interval> {
        match rhs {
            Rhs::Lin { expr, divisor } => {
                if divisor.is_zero() {
                    return Ok(Interval::constant(0));
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
            Rhs::Range(interval) => Ok(interval.clone()),
        }
    }

    /// Solves `expr op 0` for each of its variables against the current
    /// values and meets the solutions in.
    fn apply_constraint(&self, expr: &Linear, op: TestOp) -> Result<Self> {
        let mut values = self.values.clone();
        let mut channel = SynthChannel::new();
        for (var, coeff) in expr.terms() {
            let current = self.value_of(var)?;
            // coeff·var ⋈ -rest
            let rhs = self.evaluate(&expr.drop_term(var)).neg();
            let bound = match op {
                TestOp::Eq => rhs,
                _ => Interval::down_from(rhs.high().clone()),
            };
            let solved = bound.div_round_inwards(coeff).ok_or(DomainError::Unreachable)?;
            let value = current.meet(&solved).ok_or(DomainError::Unreachable)?;
            if let Some(c) = value.as_constant() {
                channel.add_equation(Linear::var(var).add_constant(-c));
            }
            values.insert(var, value);
        }
        Ok(self.build(values, channel))
    }

    fn combine(&self, other: &Self, widening: bool) -> Result<Self> {
        let split = ThreeWaySplit::of(&self.values, &other.values);
        if let Some(var) = split.first_mismatch() {
            return Err(DomainError::support(Self::NAME, *var));
        }
        let mut channel = SynthChannel::new();
        channel.add_implications(&synthesis::generate_implications(&split.in_both_but_differing));
        let mut values = self.values.clone();
        for (var, (a, b)) in split.in_both_but_differing.iter() {
            let joined = a.join(b);
            let value = if !widening || (var.is_flag() && joined.subset_of(&Interval::boolean())) {
                joined
            } else {
                a.widen(b)
            };
            values.insert(*var, value);
        }
        let result = self.build(values, channel);
        debug!(
            "{} of {} differing values: {}",
            if widening { "widening" } else { "join" },
            split.in_both_but_differing.len(),
            result
        );
        Ok(result)
    }
}

/// Interval semantics of a binary operator.
fn apply_bin(op: BinOp, left: &Interval, right: &Interval) -> Interval {
    if let (Some(l), Some(r)) = (left.as_constant(), right.as_constant()) {
        return match op {
            BinOp::Mul => Interval::constant(l * r),
            // Division and remainder by zero yield zero.
            BinOp::Div | BinOp::Mod if r.is_zero() => Interval::constant(0),
            BinOp::Div => Interval::constant(l / r),
            BinOp::Mod => Interval::constant(l.mod_floor(r)),
            BinOp::Shl => left.shl(right),
            BinOp::Shr => left.shr(right),
        };
    }
    match op {
        BinOp::Mul => left.mul(right),
        BinOp::Div => left.div_round_zero(right),
        BinOp::Shl => left.shl(right),
        BinOp::Shr => left.shr(right),
        BinOp::Mod => Interval::top(),
    }
}

impl NumericDomain for Intervals {
    const NAME: &'static str = "Intervals";

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
        debug!("{} evaluates to {}", assign, value);
        Ok(self.build(self.values.update(assign.lhs, value), channel))
    }

    fn eval_test(&self, test: &Test) -> Result<Self> {
        if test.is_tautology_report_unreachable()? {
            return Ok(self.build(self.values.clone(), SynthChannel::new()));
        }
        match test.op() {
            TestOp::Neq => {
                let (below, above) = match test.split() {
                    Some(halves) => halves,
                    None => return Err(DomainError::invariant(Self::NAME, "disequality cannot be split")),
                };
                let first = reachable(self.apply_constraint(below.expr(), TestOp::Leq))?;
                let second = reachable(self.apply_constraint(above.expr(), TestOp::Leq))?;
                match (first, second) {
                    (Some(a), Some(b)) => a.join(&b),
                    (Some(s), None) | (None, Some(s)) => Ok(s),
                    (None, None) => Err(DomainError::Unreachable),
                }
            }
            op => self.apply_constraint(test.expr(), op),
        }
    }

    fn join(&self, other: &Self) -> Result<Self> {
        self.combine(other, false)
    }

    fn widen(&self, other: &Self) -> Result<Self> {
        self.combine(other, true)
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
            (Some(c), _) => Interval::constant(c),
            (None, VarType::Bool) => Interval::boolean(),
            (None, VarType::Zeno) => Interval::top(),
            (None, VarType::Address) => Interval::up_from(Bound::from(0)),
        };
        Ok(self.build(self.values.update(var, initial), SynthChannel::new()))
    }

    fn expand(&self, pairs: &FoldMap) -> Result<Self> {
        let mut values = self.values.clone();
        for pair in pairs.iter() {
            let value = self.value_of(pair.permanent)?.clone();
            values.insert(pair.ephemeral, value);
        }
        Ok(self.build(values, SynthChannel::new()))
    }

    fn fold(&self, pairs: &FoldMap) -> Result<Self> {
        let mut values = self.values.clone();
        for pair in pairs.iter() {
            let permanent = self.value_of(pair.permanent)?;
            let ephemeral = self.value_of(pair.ephemeral)?;
            values.insert(pair.permanent, permanent.join(ephemeral));
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
        self.evaluate(expr)
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

impl fmt::Display for Intervals {
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
