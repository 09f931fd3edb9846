//! Parametric intervals whose bounds are linear in loop counters.

use std::fmt;

use im::OrdMap;
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Signed, Zero};

use crate::expr::{BinOp, Rhs};
use crate::interval::{Bound, Interval};
use crate::linear::{Linear, Substitution};
use crate::types::{NumVar, VarSet};

/// A pair of optional bounds `lower ≤ x ≤ upper`, each linear in counters.
///
/// A missing bound is infinite. Empty wedges are always represented by the
/// canonical `[1, 0]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Wedge {
    lower: Option<Linear>,
    upper: Option<Linear>,
}

impl Default for Wedge {
    fn default() -> Self {
        Wedge::full()
    }
}

impl Wedge {
    pub fn new(lower: Option<Linear>, upper: Option<Linear>) -> Self {
        if let (Some(l), Some(u)) = (&lower, &upper) {
            if l.is_constant() && u.is_constant() && l.get_constant() > u.get_constant() {
                return Wedge::empty();
            }
        }
        Wedge { lower, upper }
    }

    /// `(-∞, +∞)`
    pub fn full() -> Self {
        Wedge {
            lower: None,
            upper: None,
        }
    }

    /// `[1, 0]`
    pub fn empty() -> Self {
        Wedge {
            lower: Some(Linear::constant(1)),
            upper: Some(Linear::constant(0)),
        }
    }

    pub fn singleton(value: impl Into<BigInt>) -> Self {
        let c = Linear::constant(value);
        Wedge::new(Some(c.clone()), Some(c))
    }

    /// `[expr, expr]`
    pub fn exactly(expr: Linear) -> Self {
        Wedge::new(Some(expr.clone()), Some(expr))
    }

    pub fn is_full(&self) -> bool {
        self.lower.is_none() && self.upper.is_none()
    }

    pub fn is_empty(&self) -> bool {
        *self == Wedge::empty()
    }

    pub fn lower(&self) -> Option<&Linear> {
        self.lower.as_ref()
    }

    pub fn upper(&self) -> Option<&Linear> {
        self.upper.as_ref()
    }

    /// The single constant value, if any.
    pub fn as_constant(&self) -> Option<&BigInt> {
        match (&self.lower, &self.upper) {
            (Some(l), Some(u)) if l.is_constant() && l == u => Some(l.get_constant()),
            _ => None,
        }
    }

    /// Counters mentioned by either bound.
    pub fn vars(&self) -> VarSet {
        let lower = self.lower.as_ref().map(Linear::vars).unwrap_or_default();
        let upper = self.upper.as_ref().map(Linear::vars).unwrap_or_default();
        lower.union(&upper)
    }

    pub fn add(&self, other: &Wedge) -> Wedge {
        Wedge::new(
            both(&self.lower, &other.lower).map(|(a, b)| a + b),
            both(&self.upper, &other.upper).map(|(a, b)| a + b),
        )
    }

    pub fn subtract(&self, other: &Wedge) -> Wedge {
        Wedge::new(
            both(&self.lower, &other.upper).map(|(a, b)| a - b),
            both(&self.upper, &other.lower).map(|(a, b)| a - b),
        )
    }

    pub fn add_constant(&self, c: &BigInt) -> Wedge {
        Wedge::new(
            self.lower.as_ref().map(|l| l.add_constant(c.clone())),
            self.upper.as_ref().map(|u| u.add_constant(c.clone())),
        )
    }

    /// Multiplies by a constant, swapping the bounds for negative factors.
    pub fn scale(&self, factor: &BigInt) -> Wedge {
        let lower = self.lower.as_ref().map(|l| l.scale(factor));
        let upper = self.upper.as_ref().map(|u| u.scale(factor));
        if factor.is_negative() {
            Wedge::new(upper, lower)
        } else {
            Wedge::new(lower, upper)
        }
    }

    /// Multiplication is only precise if one side is a constant.
    pub fn multiply(&self, other: &Wedge) -> Wedge {
        if let Some(c) = other.as_constant() {
            self.scale(c)
        } else if let Some(c) = self.as_constant() {
            other.scale(c)
        } else {
            Wedge::full()
        }
    }

    /// Rewrites the bounds after `lambda := lambda + k`.
    ///
    /// A bound `c + a·lambda + ...` becomes `c - a·k + a·lambda + ...`. When
    /// both bounds exist, their new constants are ordered so that the wedge
    /// stays well-formed.
    pub fn inc(&self, lambda: NumVar, k: &BigInt) -> Wedge {
        let shifted = |b: &Linear| b.get_constant() - k * b.coeff(lambda);
        match (&self.lower, &self.upper) {
            (None, None) => Wedge::full(),
            (Some(l), None) => Wedge::new(Some(l.drop_constant().add_constant(shifted(l))), None),
            (None, Some(u)) => Wedge::new(None, Some(u.drop_constant().add_constant(shifted(u)))),
            (Some(l), Some(u)) => {
                let (lc, uc) = (shifted(l), shifted(u));
                let (lo, hi) = if lc <= uc { (lc, uc) } else { (uc, lc) };
                Wedge::new(
                    Some(l.drop_constant().add_constant(lo)),
                    Some(u.drop_constant().add_constant(hi)),
                )
            }
        }
    }

    /// Whether `self ⊑ other`, comparing bounds coefficient by coefficient.
    pub fn subset_or_equal(&self, other: &Wedge) -> bool {
        leq(false, other.lower.as_ref(), false, self.lower.as_ref())
            && leq(true, self.upper.as_ref(), true, other.upper.as_ref())
    }

    /// Joins constants and the coefficients of the counters in `joined`;
    /// every other counter keeps the coefficient it has in `self`.
    pub fn partial_join(&self, other: &Wedge, joined: &VarSet) -> Wedge {
        let counters = self.vars().union(&other.vars());
        let lower = both(&self.lower, &other.lower).map(|(l, ol)| {
            counters.iter().fold(
                Linear::constant(l.get_constant().min(ol.get_constant()).clone()),
                |acc, v| {
                    let coeff = if joined.contains(v) { l.coeff(v).min(ol.coeff(v)) } else { l.coeff(v) };
                    acc.add_term(coeff, v)
                },
            )
        });
        let upper = both(&self.upper, &other.upper).map(|(u, ou)| {
            counters.iter().fold(
                Linear::constant(u.get_constant().max(ou.get_constant()).clone()),
                |acc, v| {
                    let coeff = if joined.contains(v) { u.coeff(v).max(ou.coeff(v)) } else { u.coeff(v) };
                    acc.add_term(coeff, v)
                },
            )
        });
        Wedge::new(lower, upper)
    }

    pub fn join(&self, other: &Wedge) -> Wedge {
        self.partial_join(other, &self.vars().union(&other.vars()))
    }

    pub fn apply_substitution(&self, sigma: &Substitution) -> Wedge {
        self.apply_substitutions(sigma, sigma)
    }

    fn apply_substitutions(&self, lower: &Substitution, upper: &Substitution) -> Wedge {
        Wedge::new(
            self.lower.as_ref().map(|l| l.apply_substitution(lower)),
            self.upper.as_ref().map(|u| u.apply_substitution(upper)),
        )
    }

    /// Eliminates `lambda` by the endpoints of its numeric `range`.
    ///
    /// Each bound picks the endpoint that keeps it sound given the sign of
    /// its coefficient; a bound whose endpoint is infinite is dropped.
    pub fn forget_counter(&self, lambda: NumVar, range: &Interval) -> Wedge {
        if !self.vars().contains(lambda) {
            return self.clone();
        }
        let eliminate = |bound: &Linear, upper: bool| -> Option<Linear> {
            let coeff = bound.coeff(lambda);
            if coeff.is_zero() {
                return Some(bound.clone());
            }
            // a lower bound needs the smallest value of coeff·lambda
            let endpoint = if coeff.is_positive() != upper { range.low() } else { range.high() };
            let value = endpoint.as_finite()?;
            Some(bound.drop_term(lambda).add_constant(coeff * value))
        };
        Wedge::new(
            self.lower.as_ref().and_then(|l| eliminate(l, false)),
            self.upper.as_ref().and_then(|u| eliminate(u, true)),
        )
    }

    /// Widening by linear interpolation along `lambda`.
    ///
    /// `lambda` has value `u` in `self` and `v` in `other` (`None` if not a
    /// constant). The coefficient of `lambda` is estimated as the growth of
    /// each bound's constant divided by `v - u`, rounded outwards.
    /// Configurations that admit no interpolation fall back to
    /// [`Wedge::interval_widen`].
    pub fn widen_li(&self, other: &Wedge, lambda: NumVar, u: Option<&BigInt>, v: Option<&BigInt>) -> Wedge {
        let (Some(l), Some(h), Some(ol), Some(oh)) = (&self.lower, &self.upper, &other.lower, &other.upper) else {
            return Wedge::full();
        };
        let in_this = self.vars().contains(lambda);
        let in_other = other.vars().contains(lambda);
        let Some(u) = u else {
            return self.interval_widen(other);
        };
        if in_this && in_other {
            return self.interval_widen(other);
        }

        let (alpha, beta) = match v {
            None if in_this => (ol.coeff(lambda), oh.coeff(lambda)),
            Some(v) if v != u => {
                let delta = v - u;
                let alpha = (ol.get_constant() - l.get_constant()).div_floor(&delta);
                let beta = -(-(oh.get_constant() - h.get_constant())).div_floor(&delta);
                (alpha, beta)
            }
            _ => return self.interval_widen(other),
        };

        let alpha0 = l.get_constant() - &alpha * u;
        let beta0 = h.get_constant() - &beta * u;
        let mut lower = Linear::constant(alpha0.clone().min(beta0.clone()));
        let mut upper = Linear::constant(alpha0.max(beta0));
        lower = lower.add_term(alpha.clone().min(beta.clone()), lambda);
        upper = upper.add_term(alpha.max(beta), lambda);

        for var in self.vars().union(&other.vars()).without(lambda).iter() {
            lower = lower.add_term(l.coeff(var).min(ol.coeff(var)), var);
            upper = upper.add_term(h.coeff(var).max(oh.coeff(var)), var);
        }
        Wedge::new(Some(lower), Some(upper))
    }

    /// Classic interval widening lifted to wedges: an unstable bound is
    /// dropped, keeping the stable one.
    pub fn interval_widen(&self, other: &Wedge) -> Wedge {
        if other.subset_or_equal(self) {
            return self.clone();
        }
        let upper_stable = leq(true, other.upper.as_ref(), true, self.upper.as_ref());
        let lower_stable = leq(false, self.lower.as_ref(), false, other.lower.as_ref());
        if !upper_stable && leq(false, self.lower.as_ref(), true, other.upper.as_ref()) {
            Wedge::new(self.lower.clone(), None)
        } else if !lower_stable && upper_stable {
            Wedge::new(None, self.upper.clone())
        } else {
            Wedge::full()
        }
    }

    /// Convex range of the wedge given the ranges of its counters.
    pub fn concretize(&self, range_of: impl Fn(NumVar) -> Interval) -> Interval {
        let eval = |b: &Linear| {
            b.terms()
                .map(|(v, c)| range_of(v).scale(c))
                .fold(Interval::constant(b.get_constant().clone()), |acc, t| acc.add(&t))
        };
        let low = self.lower.as_ref().map_or(Bound::NegInf, |l| eval(l).low().clone());
        let high = self.upper.as_ref().map_or(Bound::PosInf, |u| eval(u).high().clone());
        Interval::new(low, high).unwrap_or_else(Interval::top)
    }
}

fn both<'a>(a: &'a Option<Linear>, b: &'a Option<Linear>) -> Option<(&'a Linear, &'a Linear)> {
    a.as_ref().zip(b.as_ref())
}

/// Coefficient-wise `small ≤ big`; the flags say whether a missing bound
/// reads as `+∞` (upper) or `-∞` (lower).
fn leq(small_upper: bool, small: Option<&Linear>, big_upper: bool, big: Option<&Linear>) -> bool {
    match (small, big) {
        (Some(s), Some(b)) => {
            s.get_constant() <= b.get_constant()
                && s.vars().union(&b.vars()).iter().all(|v| s.coeff(v) <= b.coeff(v))
        }
        (None, _) if !small_upper => true,
        (_, None) if big_upper => true,
        _ => false,
    }
}

/// Evaluates a right-hand side to a wedge over the current `wedges`.
///
/// Untracked variables are unbounded. Only linear expressions with divisor
/// one and multiplications by constants are tracked precisely.
pub fn evaluate(rhs: &Rhs, wedges: &OrdMap<NumVar, Wedge>) -> Wedge {
    match rhs {
        Rhs::Lin { expr, divisor } if divisor.is_one() => evaluate_linear(expr, wedges),
        Rhs::Lin { .. } => Wedge::full(),
        Rhs::Bin { op: BinOp::Mul, left, right } => evaluate(left, wedges).multiply(&evaluate(right, wedges)),
        Rhs::Bin { .. } => Wedge::full(),
        Rhs::Range(interval) => Wedge::new(
            interval.low().as_finite().map(|c| Linear::constant(c.clone())),
            interval.high().as_finite().map(|c| Linear::constant(c.clone())),
        ),
    }
}

pub fn evaluate_linear(expr: &Linear, wedges: &OrdMap<NumVar, Wedge>) -> Wedge {
    expr.terms().fold(Wedge::singleton(expr.get_constant().clone()), |acc, (var, coeff)| {
        let wedge = wedges.get(&var).cloned().unwrap_or_default();
        acc.add(&wedge.scale(coeff))
    })
}

impl fmt::Display for Wedge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "W[")?;
        match &self.lower {
            Some(l) => write!(f, "{}", l)?,
            None => write!(f, "-∞")?,
        }
        write!(f, ", ")?;
        match &self.upper {
            Some(u) => write!(f, "{}", u)?,
            None => write!(f, "+∞")?,
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn k() -> NumVar {
        NumVar::new(10)
    }

    #[test]
    fn test_empty_is_canonical() {
        let w = Wedge::new(Some(Linear::constant(7)), Some(Linear::constant(3)));
        assert!(w.is_empty());
        assert_eq!(w, Wedge::empty());
        assert!(!Wedge::singleton(3).is_empty());
    }

    #[test]
    fn test_arithmetic() {
        let a = Wedge::new(Some(Linear::var(k())), Some(Linear::var(k()).add_constant(2)));
        let b = Wedge::singleton(3);
        assert_eq!(a.add(&b), Wedge::new(Some(Linear::var(k()).add_constant(3)), Some(Linear::var(k()).add_constant(5))));
        let neg = a.scale(&BigInt::from(-1));
        assert_eq!(neg.lower(), Some(&Linear::term(-1, k()).add_constant(-2)));
        assert_eq!(a.multiply(&a), Wedge::full());
        assert_eq!(Wedge::full().add(&b), Wedge::full());
    }

    #[test]
    fn test_inc_shifts_constants() {
        // x ∈ [k, k] and then k := k + 1 gives x ∈ [k - 1, k - 1]
        let w = Wedge::exactly(Linear::var(k()));
        let expected = Wedge::exactly(Linear::var(k()).add_constant(-1));
        assert_eq!(w.inc(k(), &BigInt::one()), expected);
    }

    #[test]
    fn test_subset_and_join() {
        let a = Wedge::singleton(0);
        let b = Wedge::singleton(5);
        let j = a.join(&b);
        assert_eq!(j, Wedge::new(Some(Linear::constant(0)), Some(Linear::constant(5))));
        assert!(a.subset_or_equal(&j));
        assert!(b.subset_or_equal(&j));
        assert!(!j.subset_or_equal(&a));
        assert!(j.subset_or_equal(&Wedge::full()));
        assert!(!Wedge::full().subset_or_equal(&j));
    }

    #[test]
    fn test_widen_li_discovers_slope() {
        // x goes from 0 to 1 while k goes from 0 to 1
        let w = Wedge::singleton(0).widen_li(&Wedge::singleton(1), k(), Some(&BigInt::zero()), Some(&BigInt::one()));
        assert_eq!(w, Wedge::exactly(Linear::var(k())));

        // x goes from 0 to 2 while k goes from 0 to 1
        let w = Wedge::singleton(0).widen_li(&Wedge::singleton(2), k(), Some(&BigInt::zero()), Some(&BigInt::one()));
        assert_eq!(w, Wedge::exactly(Linear::term(2, k())));
    }

    #[test]
    fn test_widen_li_without_bounds_is_full() {
        let half = Wedge::new(Some(Linear::constant(0)), None);
        let w = half.widen_li(&Wedge::singleton(1), k(), Some(&BigInt::zero()), Some(&BigInt::one()));
        assert!(w.is_full());
    }

    #[test]
    fn test_interval_widen() {
        let a = Wedge::new(Some(Linear::constant(0)), Some(Linear::constant(1)));
        let b = Wedge::new(Some(Linear::constant(0)), Some(Linear::constant(2)));
        assert_eq!(a.interval_widen(&b), Wedge::new(Some(Linear::constant(0)), None));
        assert_eq!(b.interval_widen(&a), b);
        let c = Wedge::new(Some(Linear::constant(-1)), Some(Linear::constant(1)));
        assert_eq!(a.interval_widen(&c), Wedge::new(None, Some(Linear::constant(1))));
    }

    #[test]
    fn test_forget_counter_respects_signs() {
        // x ∈ [10 - k, k + 10]
        let w = Wedge::new(
            Some(Linear::term(-1, k()).add_constant(10)),
            Some(Linear::var(k()).add_constant(10)),
        );
        let forgotten = w.forget_counter(k(), &Interval::of(0, 4));
        assert_eq!(forgotten, Wedge::new(Some(Linear::constant(6)), Some(Linear::constant(14))));
        let unbounded = w.forget_counter(k(), &Interval::up_from(Bound::from(0)));
        assert_eq!(unbounded, Wedge::new(None, None));
    }

    #[test]
    fn test_evaluate() {
        let x = NumVar::new(1);
        let wedges: OrdMap<NumVar, Wedge> = [(x, Wedge::exactly(Linear::var(k())))].into_iter().collect();
        let rhs = Rhs::lin(Linear::term(2, x).add_constant(1));
        assert_eq!(evaluate(&rhs, &wedges), Wedge::exactly(Linear::term(2, k()).add_constant(1)));
        assert!(evaluate(&Rhs::scaled(Linear::var(x), 2), &wedges).is_full());
        assert_eq!(evaluate(&Rhs::range(Interval::of(1, 4)), &wedges).as_constant(), None);
    }
}
