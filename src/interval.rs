//! Integer intervals and small unions of intervals.
//!
//! [`Interval`] is the convex value used by the base domain and by range
//! queries; [`IntervalSet`] is its set-valued generalization that can
//! represent holes such as `[-3, -1] ∪ [1, 3]`.

use std::cmp::{max, min};
use std::fmt;

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Signed, ToPrimitive, Zero};

/// Largest shift amount evaluated precisely; larger shifts go to top.
const MAX_SHIFT: u32 = 1024;

/// Bound of an interval: -∞, finite value, or +∞.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Bound {
    NegInf,
    Finite(BigInt),
    PosInf,
}

impl Bound {
    pub fn as_finite(&self) -> Option<&BigInt> {
        match self {
            Bound::Finite(n) => Some(n),
            _ => None,
        }
    }

    pub fn is_finite(&self) -> bool {
        matches!(self, Bound::Finite(_))
    }

    pub fn neg(&self) -> Bound {
        match self {
            Bound::NegInf => Bound::PosInf,
            Bound::Finite(n) => Bound::Finite(-n),
            Bound::PosInf => Bound::NegInf,
        }
    }

    /// Sum of two bounds on the same side; `-∞ + +∞` never arises for
    /// well-formed intervals and is resolved towards the first operand.
    pub fn add(&self, other: &Bound) -> Bound {
        match (self, other) {
            (Bound::Finite(a), Bound::Finite(b)) => Bound::Finite(a + b),
            (Bound::NegInf, _) => Bound::NegInf,
            (Bound::PosInf, _) => Bound::PosInf,
            (_, Bound::NegInf) => Bound::NegInf,
            (_, Bound::PosInf) => Bound::PosInf,
        }
    }

    pub fn mul(&self, other: &Bound) -> Bound {
        match (self, other) {
            (Bound::Finite(a), Bound::Finite(b)) => Bound::Finite(a * b),
            (Bound::Finite(a), _) if a.is_zero() => Bound::Finite(BigInt::zero()),
            (_, Bound::Finite(b)) if b.is_zero() => Bound::Finite(BigInt::zero()),
            _ => {
                if self.is_negative() == other.is_negative() {
                    Bound::PosInf
                } else {
                    Bound::NegInf
                }
            }
        }
    }

    pub fn scale(&self, factor: &BigInt) -> Bound {
        self.mul(&Bound::Finite(factor.clone()))
    }

    /// Truncating division by a non-zero bound.
    fn div_trunc(&self, other: &Bound) -> Bound {
        match (self, other) {
            (Bound::Finite(a), Bound::Finite(b)) => Bound::Finite(a / b),
            (Bound::Finite(_), _) => Bound::Finite(BigInt::zero()),
            _ => {
                if self.is_negative() == other.is_negative() {
                    Bound::PosInf
                } else {
                    Bound::NegInf
                }
            }
        }
    }

    /// Floor division by a positive integer.
    fn div_floor(&self, d: &BigInt) -> Bound {
        match self {
            Bound::Finite(a) => Bound::Finite(a.div_floor(d)),
            other => other.clone(),
        }
    }

    fn is_negative(&self) -> bool {
        match self {
            Bound::NegInf => true,
            Bound::Finite(n) => n.is_negative(),
            Bound::PosInf => false,
        }
    }
}

impl From<BigInt> for Bound {
    fn from(n: BigInt) -> Self {
        Bound::Finite(n)
    }
}

impl From<i64> for Bound {
    fn from(n: i64) -> Self {
        Bound::Finite(BigInt::from(n))
    }
}

impl From<i32> for Bound {
    fn from(n: i32) -> Self {
        Bound::Finite(BigInt::from(n))
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::NegInf => write!(f, "-∞"),
            Bound::Finite(n) => write!(f, "{}", n),
            Bound::PosInf => write!(f, "+∞"),
        }
    }
}

/// A non-empty integer interval `[low, high]`.
///
/// Emptiness is never stored: operations that may produce an empty result
/// return `Option<Interval>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Interval {
    low: Bound,
    high: Bound,
}

impl Interval {
    /// Creates `[low, high]`, or `None` if it is empty.
    pub fn new(low: Bound, high: Bound) -> Option<Self> {
        if low > high || low == Bound::PosInf || high == Bound::NegInf {
            None
        } else {
            Some(Interval { low, high })
        }
    }

    /// Creates the finite interval `[low, high]`.
    ///
    /// # Panics
    ///
    /// Panics if `low > high`.
    pub fn of(low: impl Into<BigInt>, high: impl Into<BigInt>) -> Self {
        let (low, high) = (low.into(), high.into());
        assert!(low <= high, "Empty interval [{}, {}]", low, high);
        Interval {
            low: Bound::Finite(low),
            high: Bound::Finite(high),
        }
    }

    pub fn top() -> Self {
        Interval {
            low: Bound::NegInf,
            high: Bound::PosInf,
        }
    }

    pub fn constant(c: impl Into<BigInt>) -> Self {
        let c = c.into();
        Interval {
            low: Bound::Finite(c.clone()),
            high: Bound::Finite(c),
        }
    }

    /// `[low, +∞)`.
    pub fn up_from(low: Bound) -> Self {
        Interval::new(low, Bound::PosInf).unwrap_or_else(Interval::top)
    }

    /// `(-∞, high]`.
    pub fn down_from(high: Bound) -> Self {
        Interval::new(Bound::NegInf, high).unwrap_or_else(Interval::top)
    }

    /// The boolean range `[0, 1]`.
    pub fn boolean() -> Self {
        Interval::of(0, 1)
    }

    pub fn low(&self) -> &Bound {
        &self.low
    }

    pub fn high(&self) -> &Bound {
        &self.high
    }

    pub fn is_top(&self) -> bool {
        self.low == Bound::NegInf && self.high == Bound::PosInf
    }

    pub fn is_finite(&self) -> bool {
        self.low.is_finite() && self.high.is_finite()
    }

    /// Returns the single value if `low == high`.
    pub fn as_constant(&self) -> Option<&BigInt> {
        match (&self.low, &self.high) {
            (Bound::Finite(l), Bound::Finite(h)) if l == h => Some(l),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        self.as_constant().is_some()
    }

    pub fn contains_value(&self, value: &BigInt) -> bool {
        let v = Bound::Finite(value.clone());
        self.low <= v && v <= self.high
    }

    /// Whether `other ⊆ self`.
    pub fn contains(&self, other: &Interval) -> bool {
        self.low <= other.low && other.high <= self.high
    }

    pub fn subset_of(&self, other: &Interval) -> bool {
        other.contains(self)
    }

    pub fn join(&self, other: &Interval) -> Interval {
        Interval {
            low: min(&self.low, &other.low).clone(),
            high: max(&self.high, &other.high).clone(),
        }
    }

    pub fn meet(&self, other: &Interval) -> Option<Interval> {
        Interval::new(
            max(&self.low, &other.low).clone(),
            min(&self.high, &other.high).clone(),
        )
    }

    /// Standard interval widening: unstable bounds jump to infinity.
    pub fn widen(&self, other: &Interval) -> Interval {
        let low = if other.low < self.low { Bound::NegInf } else { self.low.clone() };
        let high = if other.high > self.high { Bound::PosInf } else { self.high.clone() };
        Interval { low, high }
    }

    pub fn add(&self, other: &Interval) -> Interval {
        Interval {
            low: self.low.add(&other.low),
            high: self.high.add(&other.high),
        }
    }

    pub fn neg(&self) -> Interval {
        Interval {
            low: self.high.neg(),
            high: self.low.neg(),
        }
    }

    pub fn sub(&self, other: &Interval) -> Interval {
        self.add(&other.neg())
    }

    pub fn add_constant(&self, c: &BigInt) -> Interval {
        self.add(&Interval::constant(c.clone()))
    }

    pub fn scale(&self, factor: &BigInt) -> Interval {
        if factor.is_negative() {
            Interval {
                low: self.high.scale(factor),
                high: self.low.scale(factor),
            }
        } else {
            Interval {
                low: self.low.scale(factor),
                high: self.high.scale(factor),
            }
        }
    }

    pub fn mul(&self, other: &Interval) -> Interval {
        let corners = [
            self.low.mul(&other.low),
            self.low.mul(&other.high),
            self.high.mul(&other.low),
            self.high.mul(&other.high),
        ];
        Interval::hull_of(corners)
    }

    /// Solves `d · x ∈ self` for integral `x`, rounding the bounds inwards.
    ///
    /// Returns `None` if no integer solution exists. Division by zero yields
    /// top if zero is in the interval, and `None` otherwise.
    pub fn div_round_inwards(&self, d: &BigInt) -> Option<Interval> {
        if d.is_zero() {
            return if self.contains_value(&BigInt::zero()) {
                Some(Interval::top())
            } else {
                None
            };
        }
        let (lo, hi) = if d.is_negative() {
            (self.high.neg(), self.low.neg())
        } else {
            (self.low.clone(), self.high.clone())
        };
        let d = d.abs();
        let low = match lo {
            Bound::Finite(n) => Bound::Finite(-(-n).div_floor(&d)),
            other => other,
        };
        let high = match hi {
            Bound::Finite(n) => Bound::Finite(n.div_floor(&d)),
            other => other,
        };
        Interval::new(low, high)
    }

    /// Interval division truncating towards zero.
    ///
    /// Division by zero is defined to yield zero, so a divisor containing
    /// zero contributes the constant `0` to the result.
    pub fn div_round_zero(&self, other: &Interval) -> Interval {
        let minus_one = Bound::Finite(-BigInt::one());
        let one = Bound::Finite(BigInt::one());
        let mut parts = Vec::new();
        if other.low < Bound::Finite(BigInt::zero()) {
            parts.push(Interval::new(other.low.clone(), min(&other.high, &minus_one).clone()));
        }
        if other.high > Bound::Finite(BigInt::zero()) {
            parts.push(Interval::new(max(&other.low, &one).clone(), other.high.clone()));
        }
        let mut result: Option<Interval> = if other.contains_value(&BigInt::zero()) {
            Some(Interval::constant(0))
        } else {
            None
        };
        for divisor in parts.into_iter().flatten() {
            let corners = [
                self.low.div_trunc(&divisor.low),
                self.low.div_trunc(&divisor.high),
                self.high.div_trunc(&divisor.low),
                self.high.div_trunc(&divisor.high),
            ];
            let quotient = Interval::hull_of(corners);
            result = Some(match result {
                Some(r) => r.join(&quotient),
                None => quotient,
            });
        }
        result.unwrap_or_else(|| Interval::constant(0))
    }

    /// Left shift by a non-negative amount.
    pub fn shl(&self, amount: &Interval) -> Interval {
        match shift_range(amount) {
            Some((a, b)) => {
                let factors = Interval::of(BigInt::one() << a, BigInt::one() << b);
                self.mul(&factors)
            }
            None => Interval::top(),
        }
    }

    /// Arithmetic right shift by a non-negative amount.
    pub fn shr(&self, amount: &Interval) -> Interval {
        match shift_range(amount) {
            Some((a, b)) => {
                let (da, db) = (BigInt::one() << a, BigInt::one() << b);
                let corners = [
                    self.low.div_floor(&da),
                    self.low.div_floor(&db),
                    self.high.div_floor(&da),
                    self.high.div_floor(&db),
                ];
                Interval::hull_of(corners)
            }
            None => Interval::top(),
        }
    }

    fn hull_of(corners: [Bound; 4]) -> Interval {
        let low = corners.iter().min().cloned().unwrap_or(Bound::NegInf);
        let high = corners.iter().max().cloned().unwrap_or(Bound::PosInf);
        let low = if low == Bound::PosInf { Bound::NegInf } else { low };
        let high = if high == Bound::NegInf { Bound::PosInf } else { high };
        Interval { low, high }
    }
}

/// Extracts a bounded, non-negative shift range.
fn shift_range(amount: &Interval) -> Option<(u32, u32)> {
    let a = amount.low.as_finite()?;
    let b = amount.high.as_finite()?;
    if a.is_negative() {
        return None;
    }
    let (a, b) = (a.to_u32()?, b.to_u32()?);
    if b > MAX_SHIFT {
        return None;
    }
    Some((a, b))
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.low, self.high)
    }
}

/// Maximum number of disjoint pieces kept in an [`IntervalSet`].
const MAX_PIECES: usize = 8;

/// A non-empty union of disjoint, non-adjacent intervals, sorted by bound.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IntervalSet {
    pieces: Vec<Interval>,
}

impl IntervalSet {
    /// Builds a set from arbitrary pieces, or `None` if there are none.
    pub fn from_pieces(pieces: impl IntoIterator<Item = Interval>) -> Option<Self> {
        let mut pieces: Vec<Interval> = pieces.into_iter().collect();
        if pieces.is_empty() {
            return None;
        }
        pieces.sort();
        let mut merged: Vec<Interval> = Vec::with_capacity(pieces.len());
        for piece in pieces {
            match merged.last_mut() {
                Some(last) if touches(last, &piece) => *last = last.join(&piece),
                _ => merged.push(piece),
            }
        }
        while merged.len() > MAX_PIECES {
            merge_closest(&mut merged);
        }
        Some(IntervalSet { pieces: merged })
    }

    pub fn top() -> Self {
        IntervalSet::from(Interval::top())
    }

    pub fn constant(c: impl Into<BigInt>) -> Self {
        IntervalSet::from(Interval::constant(c))
    }

    pub fn pieces(&self) -> &[Interval] {
        &self.pieces
    }

    pub fn convex_hull(&self) -> Interval {
        let first = &self.pieces[0];
        let last = &self.pieces[self.pieces.len() - 1];
        Interval {
            low: first.low.clone(),
            high: last.high.clone(),
        }
    }

    pub fn as_constant(&self) -> Option<&BigInt> {
        match self.pieces.as_slice() {
            [single] => single.as_constant(),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        self.as_constant().is_some()
    }

    pub fn contains_value(&self, value: &BigInt) -> bool {
        self.pieces.iter().any(|p| p.contains_value(value))
    }

    /// Whether every piece of `self` lies within some piece of `other`.
    pub fn subset_of(&self, other: &IntervalSet) -> bool {
        self.pieces
            .iter()
            .all(|p| other.pieces.iter().any(|q| q.contains(p)))
    }

    pub fn join(&self, other: &IntervalSet) -> IntervalSet {
        let pieces = self.pieces.iter().chain(other.pieces.iter()).cloned();
        IntervalSet::from_pieces(pieces).unwrap_or_else(|| self.clone())
    }

    pub fn meet(&self, other: &IntervalSet) -> Option<IntervalSet> {
        let pieces = self
            .pieces
            .iter()
            .flat_map(|p| other.pieces.iter().filter_map(move |q| p.meet(q)));
        IntervalSet::from_pieces(pieces)
    }

    pub fn meet_interval(&self, other: &Interval) -> Option<IntervalSet> {
        IntervalSet::from_pieces(self.pieces.iter().filter_map(|p| p.meet(other)))
    }

    /// Keeps the pieces of the join, but pushes outer bounds that grew to
    /// infinity.
    pub fn widen(&self, other: &IntervalSet) -> IntervalSet {
        if other.subset_of(self) {
            return self.clone();
        }
        let hull = self.convex_hull().widen(&other.convex_hull());
        let joined = self.join(other);
        let mut pieces = joined.pieces;
        let last = pieces.len() - 1;
        pieces[0].low = hull.low;
        pieces[last].high = hull.high;
        IntervalSet { pieces }
    }

    /// Applies `f` to every pair of pieces and unions the results.
    fn lift(&self, other: &IntervalSet, f: impl Fn(&Interval, &Interval) -> Interval) -> IntervalSet {
        let pieces = self
            .pieces
            .iter()
            .flat_map(|p| other.pieces.iter().map(|q| f(p, q)).collect::<Vec<_>>());
        IntervalSet::from_pieces(pieces).unwrap_or_else(IntervalSet::top)
    }

    pub fn add(&self, other: &IntervalSet) -> IntervalSet {
        self.lift(other, Interval::add)
    }

    pub fn mul(&self, other: &IntervalSet) -> IntervalSet {
        self.lift(other, Interval::mul)
    }

    pub fn div_round_zero(&self, other: &IntervalSet) -> IntervalSet {
        self.lift(other, Interval::div_round_zero)
    }

    pub fn shl(&self, other: &IntervalSet) -> IntervalSet {
        self.lift(other, Interval::shl)
    }

    pub fn shr(&self, other: &IntervalSet) -> IntervalSet {
        self.lift(other, Interval::shr)
    }

    pub fn scale(&self, factor: &BigInt) -> IntervalSet {
        IntervalSet::from_pieces(self.pieces.iter().map(|p| p.scale(factor))).unwrap_or_else(IntervalSet::top)
    }

    pub fn neg(&self) -> IntervalSet {
        self.scale(&-BigInt::one())
    }

    /// Pointwise [`Interval::div_round_inwards`], dropping pieces without
    /// integral solutions.
    pub fn div_round_inwards(&self, d: &BigInt) -> Option<IntervalSet> {
        IntervalSet::from_pieces(self.pieces.iter().filter_map(|p| p.div_round_inwards(d)))
    }
}

/// Whether two sorted pieces overlap or are adjacent.
fn touches(a: &Interval, b: &Interval) -> bool {
    match (&a.high, &b.low) {
        (Bound::Finite(h), Bound::Finite(l)) => l <= &(h + BigInt::one()),
        _ => a.high >= b.low,
    }
}

/// Joins the two neighbouring pieces separated by the smallest gap.
fn merge_closest(pieces: &mut Vec<Interval>) {
    let mut best = 0;
    let mut best_gap: Option<BigInt> = None;
    for i in 0..pieces.len() - 1 {
        if let (Bound::Finite(h), Bound::Finite(l)) = (&pieces[i].high, &pieces[i + 1].low) {
            let gap = l - h;
            if best_gap.as_ref().map_or(true, |g| gap < *g) {
                best_gap = Some(gap);
                best = i;
            }
        }
    }
    let next = pieces.remove(best + 1);
    pieces[best] = pieces[best].join(&next);
}

impl From<Interval> for IntervalSet {
    fn from(interval: Interval) -> Self {
        IntervalSet { pieces: vec![interval] }
    }
}

impl fmt::Display for IntervalSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, p) in self.pieces.iter().enumerate() {
            if i > 0 {
                write!(f, " ∪ ")?;
            }
            write!(f, "{}", p)?;
        }
        Ok(())
    }
}
