//! Statement IR consumed by the domains: tests and assignments.
//!
//! Tests are always of the form `e = 0`, `e ≠ 0` or `e ≤ 0`; every other
//! comparison is expressed by rewriting the linear expression.

use std::fmt;

use num_bigint::BigInt;
use num_traits::{One, Signed, Zero};

use crate::error::{DomainError, Result};
use crate::interval::Interval;
use crate::linear::{Linear, Substitution};
use crate::types::{NumVar, VarSet};

/// Comparison operator of a [`Test`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum TestOp {
    /// `e = 0`
    Eq,
    /// `e ≠ 0`
    Neq,
    /// `e ≤ 0`
    Leq,
}

/// A linear test `expr op 0`.
///
/// The expression is normalized on construction: equalities and
/// disequalities use [`Linear::to_equality`], inequalities are divided by
/// the positive gcd of their coefficients and constant.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Test {
    op: TestOp,
    expr: Linear,
}

impl Test {
    pub fn new(expr: Linear, op: TestOp) -> Self {
        let expr = match op {
            TestOp::Eq | TestOp::Neq => expr.to_equality(),
            TestOp::Leq => expr.lowest_form().0,
        };
        Test { op, expr }
    }

    /// `expr = 0`
    pub fn eq(expr: Linear) -> Self {
        Test::new(expr, TestOp::Eq)
    }

    /// `expr ≠ 0`
    pub fn neq(expr: Linear) -> Self {
        Test::new(expr, TestOp::Neq)
    }

    /// `expr ≤ 0`
    pub fn leq(expr: Linear) -> Self {
        Test::new(expr, TestOp::Leq)
    }

    /// `lhs ≤ rhs`
    pub fn less_or_equal(lhs: &Linear, rhs: &Linear) -> Self {
        Test::leq(lhs - rhs)
    }

    /// `lhs < rhs`
    pub fn less_than(lhs: &Linear, rhs: &Linear) -> Self {
        Test::leq((lhs - rhs).add_constant(1))
    }

    /// `lhs = rhs`
    pub fn equal(lhs: &Linear, rhs: &Linear) -> Self {
        Test::eq(lhs - rhs)
    }

    /// `lhs ≠ rhs`
    pub fn not_equal(lhs: &Linear, rhs: &Linear) -> Self {
        Test::neq(lhs - rhs)
    }

    pub fn op(&self) -> TestOp {
        self.op
    }

    pub fn expr(&self) -> &Linear {
        &self.expr
    }

    pub fn vars(&self) -> VarSet {
        self.expr.vars()
    }

    pub fn mentions(&self, var: NumVar) -> bool {
        self.expr.contains(var)
    }

    /// Whether every variable of the test is a flag.
    pub fn is_flag_test(&self) -> bool {
        self.expr.terms().all(|(v, _)| v.is_flag())
    }

    /// The logical negation.
    pub fn not(&self) -> Test {
        match self.op {
            TestOp::Eq => Test::neq(self.expr.clone()),
            TestOp::Neq => Test::eq(self.expr.clone()),
            // ¬(e ≤ 0)  ⇔  e ≥ 1  ⇔  1 - e ≤ 0
            TestOp::Leq => Test::leq((-&self.expr).add_constant(1)),
        }
    }

    /// Splits an (dis)equality into two inequalities.
    ///
    /// `e ≠ 0` becomes `e + 1 ≤ 0` or `-e + 1 ≤ 0` (a disjunction);
    /// `e = 0` becomes `e ≤ 0` and `-e ≤ 0` (a conjunction).
    /// Inequalities cannot be split.
    pub fn split(&self) -> Option<(Test, Test)> {
        let offset = match self.op {
            TestOp::Neq => 1,
            TestOp::Eq => 0,
            TestOp::Leq => return None,
        };
        Some((
            Test::leq(self.expr.add_constant(offset)),
            Test::leq((-&self.expr).add_constant(offset)),
        ))
    }

    /// Applies the substitution if the test mentions its variable.
    pub fn apply_substitution(&self, subst: &Substitution) -> Test {
        if self.mentions(subst.var) {
            Test::new(self.expr.apply_substitution(subst), self.op)
        } else {
            self.clone()
        }
    }

    pub fn rename(&self, from: NumVar, to: NumVar) -> Test {
        if self.mentions(from) {
            Test::new(self.expr.rename(from, to), self.op)
        } else {
            self.clone()
        }
    }

    /// Decides constant tests.
    ///
    /// Returns `Ok(true)` for a constant test that holds, `Ok(false)` for any
    /// test that mentions variables, and `Err(Unreachable)` for a constant
    /// test that is false.
    pub fn is_tautology_report_unreachable(&self) -> Result<bool> {
        if !self.expr.is_constant() {
            return Ok(false);
        }
        let c = self.expr.get_constant();
        let holds = match self.op {
            TestOp::Eq => c.is_zero(),
            TestOp::Neq => !c.is_zero(),
            TestOp::Leq => !c.is_positive(),
        };
        if holds {
            Ok(true)
        } else {
            Err(DomainError::Unreachable)
        }
    }

    /// Whether the test is constant, treating contradictions as trivially
    /// true.
    pub fn is_tautology(&self) -> bool {
        self.is_tautology_report_unreachable().unwrap_or(true)
    }

    /// Whether `by` implies `self` by literal comparison of bounds.
    ///
    /// Only single-variable tests over the same term are compared, e.g.
    /// `x - 5 ≤ 0` is entailed by `x - 3 ≤ 0`.
    pub fn is_syntactically_entailed_by(&self, by: &Test) -> bool {
        if self == by {
            return true;
        }
        if self.expr.num_terms() != 1 || self.expr.drop_constant() != by.expr.drop_constant() {
            return false;
        }
        // Both read `t ⋈ c` for the same term `t`.
        let tc = -self.expr.get_constant();
        let bc = -by.expr.get_constant();
        match self.op {
            TestOp::Eq => false,
            TestOp::Neq => match by.op {
                TestOp::Eq => bc != tc,
                TestOp::Leq => bc < tc,
                TestOp::Neq => false,
            },
            TestOp::Leq => match by.op {
                TestOp::Eq | TestOp::Leq => bc <= tc,
                TestOp::Neq => false,
            },
        }
    }
}

impl fmt::Display for Test {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            TestOp::Eq => write!(f, "{} = 0", self.expr),
            TestOp::Neq => write!(f, "{} ≠ 0", self.expr),
            TestOp::Leq => write!(f, "{} ≤ 0", self.expr),
        }
    }
}

/// Non-linear binary operators.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum BinOp {
    Mul,
    Div,
    Shl,
    Shr,
    Mod,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Mod => "%",
        };
        write!(f, "{}", symbol)
    }
}

/// Right-hand side of an assignment.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Rhs {
    /// `expr / divisor`
    Lin { expr: Linear, divisor: BigInt },
    /// `left op right`
    Bin { op: BinOp, left: Box<Rhs>, right: Box<Rhs> },
    /// Any value within the interval.
    Range(Interval),
}

impl Rhs {
    /// A linear expression with divisor one.
    pub fn lin(expr: Linear) -> Self {
        Rhs::Lin {
            expr,
            divisor: BigInt::one(),
        }
    }

    pub fn scaled(expr: Linear, divisor: impl Into<BigInt>) -> Self {
        Rhs::Lin {
            expr,
            divisor: divisor.into(),
        }
    }

    pub fn constant(c: impl Into<BigInt>) -> Self {
        Rhs::lin(Linear::constant(c))
    }

    pub fn var(var: NumVar) -> Self {
        Rhs::lin(Linear::var(var))
    }

    pub fn bin(op: BinOp, left: Rhs, right: Rhs) -> Self {
        Rhs::Bin {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn range(interval: Interval) -> Self {
        Rhs::Range(interval)
    }

    /// The linear expression, if this is a plain linear right-hand side.
    pub fn as_linear(&self) -> Option<&Linear> {
        match self {
            Rhs::Lin { expr, divisor } if divisor.is_one() => Some(expr),
            _ => None,
        }
    }

    pub fn vars(&self) -> VarSet {
        match self {
            Rhs::Lin { expr, .. } => expr.vars(),
            Rhs::Bin { left, right, .. } => left.vars().union(&right.vars()),
            Rhs::Range(_) => VarSet::new(),
        }
    }
}

impl fmt::Display for Rhs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rhs::Lin { expr, divisor } if divisor.is_one() => write!(f, "{}", expr),
            Rhs::Lin { expr, divisor } => write!(f, "({}) / {}", expr, divisor),
            Rhs::Bin { op, left, right } => write!(f, "({} {} {})", left, op, right),
            Rhs::Range(interval) => write!(f, "{}", interval),
        }
    }
}

/// An assignment `lhs := rhs`.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Assign {
    pub lhs: NumVar,
    pub rhs: Rhs,
}

impl Assign {
    pub fn new(lhs: NumVar, rhs: Rhs) -> Self {
        Assign { lhs, rhs }
    }

    /// `lhs := expr`
    pub fn linear(lhs: NumVar, expr: Linear) -> Self {
        Assign::new(lhs, Rhs::lin(expr))
    }

    /// `lhs := c`
    pub fn constant(lhs: NumVar, c: impl Into<BigInt>) -> Self {
        Assign::new(lhs, Rhs::constant(c))
    }

    /// `lhs := lhs + k`
    pub fn increment(lhs: NumVar, k: impl Into<BigInt>) -> Self {
        Assign::linear(lhs, Linear::var(lhs).add_constant(k))
    }
}

impl fmt::Display for Assign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} := {}", self.lhs, self.rhs)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn x() -> NumVar {
        NumVar::new(1)
    }

    #[test]
    fn test_negation() {
        let t = Test::leq(Linear::var(x()).add_constant(-5)); // x <= 5
        let n = t.not(); // x >= 6
        assert_eq!(n, Test::leq(Linear::term(-1, x()).add_constant(6)));
        assert_eq!(n.not(), t);
        assert_eq!(Test::eq(Linear::var(x())).not(), Test::neq(Linear::var(x())));
    }

    #[test]
    fn test_split() {
        let e = Linear::var(x());
        let (a, b) = Test::neq(e.clone()).split().unwrap();
        assert_eq!(a, Test::leq(e.add_constant(1)));
        assert_eq!(b, Test::leq((-&e).add_constant(1)));
        let (a, b) = Test::eq(e.clone()).split().unwrap();
        assert_eq!(a, Test::leq(e.clone()));
        assert_eq!(b, Test::leq(-&e));
        assert!(Test::leq(e).split().is_none());
    }

    #[test]
    fn test_normalization() {
        let t = Test::eq(Linear::from_terms(4, [(-2, x())]));
        assert_eq!(t.expr(), &Linear::from_terms(-2, [(1, x())]));
        let u = Test::leq(Linear::from_terms(4, [(2, x())]));
        assert_eq!(u.expr(), &Linear::from_terms(2, [(1, x())]));
    }

    #[test]
    fn test_constant_tests() {
        assert_eq!(Test::leq(Linear::constant(-1)).is_tautology_report_unreachable(), Ok(true));
        assert_eq!(
            Test::leq(Linear::constant(1)).is_tautology_report_unreachable(),
            Err(DomainError::Unreachable)
        );
        assert_eq!(Test::neq(Linear::constant(0)).is_tautology_report_unreachable(), Err(DomainError::Unreachable));
        assert_eq!(Test::leq(Linear::var(x())).is_tautology_report_unreachable(), Ok(false));
        assert!(Test::eq(Linear::constant(3)).is_tautology());
        assert!(!Test::eq(Linear::var(x())).is_tautology());
    }

    #[test]
    fn test_syntactic_entailment() {
        let below = |c: i64| Test::leq(Linear::var(x()).add_constant(-c)); // x <= c
        assert!(below(10).is_syntactically_entailed_by(&below(5)));
        assert!(!below(5).is_syntactically_entailed_by(&below(10)));

        let equals = |c: i64| Test::eq(Linear::var(x()).add_constant(-c));
        let differs = |c: i64| Test::neq(Linear::var(x()).add_constant(-c));
        assert!(below(10).is_syntactically_entailed_by(&equals(7)));
        assert!(differs(10).is_syntactically_entailed_by(&equals(7)));
        assert!(!differs(7).is_syntactically_entailed_by(&equals(7)));
        assert!(differs(10).is_syntactically_entailed_by(&below(9)));
        assert!(!equals(7).is_syntactically_entailed_by(&below(7)));

        let y = NumVar::new(2);
        let other = Test::leq(Linear::var(y));
        assert!(!below(10).is_syntactically_entailed_by(&other));
    }

    #[test]
    fn test_substitution_on_tests() {
        let sigma = Substitution::renaming(x(), NumVar::new(2));
        let t = Test::leq(Linear::var(x()).add_constant(-3));
        assert_eq!(t.apply_substitution(&sigma), Test::leq(Linear::var(NumVar::new(2)).add_constant(-3)));
        let untouched = Test::leq(Linear::var(NumVar::new(3)));
        assert_eq!(untouched.apply_substitution(&sigma), untouched);
    }

    #[test]
    fn test_assign_display() {
        let a = Assign::increment(x(), 1);
        assert_eq!(a.to_string(), "x1 := x1 + 1");
        let b = Assign::new(x(), Rhs::bin(BinOp::Mul, Rhs::var(x()), Rhs::constant(2)));
        assert_eq!(b.to_string(), "x1 := (x1 * 2)");
    }
}
