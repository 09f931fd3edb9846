//! Linear expressions over numeric variables.
//!
//! A [`Linear`] is the normal form `c + Σ aᵢ·xᵢ` with arbitrary-precision
//! coefficients. Terms are kept sorted by variable and never carry a zero
//! coefficient, so two expressions are structurally equal iff they have the
//! same terms and the same constant.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Neg, Sub};

use im::OrdMap;
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Signed, Zero};

use crate::types::{NumVar, VarSet};

#[derive(Debug, Clone, Default, Eq, PartialEq, Hash)]
pub struct Linear {
    constant: BigInt,
    terms: OrdMap<NumVar, BigInt>,
}

impl Linear {
    pub fn zero() -> Self {
        Linear::default()
    }

    pub fn constant(c: impl Into<BigInt>) -> Self {
        Linear {
            constant: c.into(),
            terms: OrdMap::new(),
        }
    }

    /// The expression `1·var`.
    pub fn var(var: NumVar) -> Self {
        Linear::term(1, var)
    }

    /// The expression `coeff·var`.
    pub fn term(coeff: impl Into<BigInt>, var: NumVar) -> Self {
        Linear::zero().add_term(coeff, var)
    }

    /// Builds `c + Σ coeff·var` from its parts, merging repeated variables.
    pub fn from_terms<C: Into<BigInt>>(c: impl Into<BigInt>, terms: impl IntoIterator<Item = (C, NumVar)>) -> Self {
        terms
            .into_iter()
            .fold(Linear::constant(c), |acc, (coeff, var)| acc.add_term(coeff, var))
    }

    pub fn get_constant(&self) -> &BigInt {
        &self.constant
    }

    /// Returns the coefficient of `var`, zero if absent.
    pub fn coeff(&self, var: NumVar) -> BigInt {
        self.terms.get(&var).cloned().unwrap_or_else(BigInt::zero)
    }

    pub fn contains(&self, var: NumVar) -> bool {
        self.terms.contains_key(&var)
    }

    pub fn terms(&self) -> impl Iterator<Item = (NumVar, &BigInt)> + '_ {
        self.terms.iter().map(|(v, c)| (*v, c))
    }

    pub fn vars(&self) -> VarSet {
        self.terms.keys().copied().collect()
    }

    pub fn num_terms(&self) -> usize {
        self.terms.len()
    }

    pub fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn is_zero(&self) -> bool {
        self.is_constant() && self.constant.is_zero()
    }

    /// Returns the only term if the expression has exactly one.
    pub fn single_term(&self) -> Option<(NumVar, &BigInt)> {
        if self.terms.len() == 1 {
            self.terms().next()
        } else {
            None
        }
    }

    /// The leading (smallest) variable.
    pub fn key(&self) -> Option<NumVar> {
        self.terms.keys().next().copied()
    }

    /// Adds `coeff·var`, dropping the term if it cancels out.
    pub fn add_term(&self, coeff: impl Into<BigInt>, var: NumVar) -> Self {
        let coeff = coeff.into();
        if coeff.is_zero() {
            return self.clone();
        }
        let sum = self.coeff(var) + coeff;
        let terms = if sum.is_zero() {
            self.terms.without(&var)
        } else {
            self.terms.update(var, sum)
        };
        Linear {
            constant: self.constant.clone(),
            terms,
        }
    }

    pub fn add_constant(&self, c: impl Into<BigInt>) -> Self {
        Linear {
            constant: &self.constant + c.into(),
            terms: self.terms.clone(),
        }
    }

    pub fn drop_term(&self, var: NumVar) -> Self {
        Linear {
            constant: self.constant.clone(),
            terms: self.terms.without(&var),
        }
    }

    pub fn drop_constant(&self) -> Self {
        Linear {
            constant: BigInt::zero(),
            terms: self.terms.clone(),
        }
    }

    /// Multiplies every coefficient and the constant by `factor`.
    pub fn scale(&self, factor: &BigInt) -> Self {
        if factor.is_zero() {
            return Linear::zero();
        }
        Linear {
            constant: &self.constant * factor,
            terms: self.terms.iter().map(|(v, c)| (*v, c * factor)).collect(),
        }
    }

    /// Divides the whole expression by the gcd of all coefficients and the
    /// constant, returning the reduced expression and the (positive) divisor.
    pub fn lowest_form(&self) -> (Linear, BigInt) {
        let gcd = self
            .terms
            .values()
            .fold(self.constant.abs(), |acc, c| acc.gcd(c));
        if gcd.is_zero() || gcd.is_one() {
            return (self.clone(), BigInt::one());
        }
        let reduced = Linear {
            constant: &self.constant / &gcd,
            terms: self.terms.iter().map(|(v, c)| (*v, c / &gcd)).collect(),
        };
        (reduced, gcd)
    }

    /// Normal form of the equation `self = 0`, returned together with the
    /// signed factor `f` such that `self == f · result`.
    pub fn to_equality_with_factor(&self) -> (Linear, BigInt) {
        let (reduced, gcd) = self.lowest_form();
        let leading_negative = reduced.terms.values().next().map_or(false, |c| c.is_negative());
        if leading_negative {
            (-&reduced, -gcd)
        } else {
            (reduced, gcd)
        }
    }

    /// Normal form of the equation `self = 0`: positive leading coefficient
    /// and lowest form.
    pub fn to_equality(&self) -> Linear {
        self.to_equality_with_factor().0
    }

    /// Solves the equation `self = 0` for `var`.
    ///
    /// For `self = d·var + rest` this yields `var = -rest / d`. Returns `None`
    /// if `var` does not occur.
    pub fn gen_substitution(&self, var: NumVar) -> Option<Substitution> {
        let d = self.terms.get(&var)?;
        let rest = self.drop_term(var);
        Some(Substitution::new(var, -rest, d.clone()))
    }

    /// Applies `[var \ expr / fac]`, scaling the remaining terms by `fac` so
    /// that the result stays integral.
    ///
    /// For `a·var + rest` the result is `fac·rest + a·expr`. Unchanged if
    /// `var` does not occur.
    pub fn apply_substitution(&self, subst: &Substitution) -> Self {
        let a = match self.terms.get(&subst.var) {
            Some(a) => a.clone(),
            None => return self.clone(),
        };
        let rest = self.drop_term(subst.var).scale(&subst.fac);
        &rest + &subst.expr.scale(&a)
    }

    /// Renames `from` to `to`, merging coefficients if `to` already occurs.
    pub fn rename(&self, from: NumVar, to: NumVar) -> Self {
        match self.terms.get(&from) {
            Some(a) => self.drop_term(from).add_term(a.clone(), to),
            None => self.clone(),
        }
    }
}

impl Ord for Linear {
    fn cmp(&self, other: &Self) -> Ordering {
        self.terms
            .len()
            .cmp(&other.terms.len())
            .then_with(|| self.terms.cmp(&other.terms))
            .then_with(|| self.constant.cmp(&other.constant))
    }
}

impl PartialOrd for Linear {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Add for &Linear {
    type Output = Linear;

    fn add(self, other: &Linear) -> Linear {
        other
            .terms()
            .fold(self.add_constant(other.constant.clone()), |acc, (v, c)| acc.add_term(c.clone(), v))
    }
}

impl Sub for &Linear {
    type Output = Linear;

    fn sub(self, other: &Linear) -> Linear {
        self + &(-other)
    }
}

impl Neg for &Linear {
    type Output = Linear;

    fn neg(self) -> Linear {
        Linear {
            constant: -&self.constant,
            terms: self.terms.iter().map(|(v, c)| (*v, -c)).collect(),
        }
    }
}

impl Neg for Linear {
    type Output = Linear;

    fn neg(self) -> Linear {
        -&self
    }
}

impl From<NumVar> for Linear {
    fn from(var: NumVar) -> Self {
        Linear::var(var)
    }
}

impl fmt::Display for Linear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (v, c) in self.terms() {
            if first {
                if c.is_one() {
                    write!(f, "{}", v)?;
                } else if *c == -BigInt::one() {
                    write!(f, "-{}", v)?;
                } else {
                    write!(f, "{}{}", c, v)?;
                }
                first = false;
            } else {
                let sign = if c.is_negative() { '-' } else { '+' };
                let abs = c.abs();
                if abs.is_one() {
                    write!(f, " {} {}", sign, v)?;
                } else {
                    write!(f, " {} {}{}", sign, abs, v)?;
                }
            }
        }
        if first {
            write!(f, "{}", self.constant)
        } else if self.constant.is_zero() {
            Ok(())
        } else if self.constant.is_negative() {
            write!(f, " - {}", self.constant.abs())
        } else {
            write!(f, " + {}", self.constant)
        }
    }
}

/// A substitution `[var \ expr / fac]`, meaning `var = expr / fac`.
///
/// The factor is kept strictly positive.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Substitution {
    pub var: NumVar,
    pub expr: Linear,
    pub fac: BigInt,
}

impl Substitution {
    /// Creates `var = expr / fac`, normalizing the sign of `fac`.
    ///
    /// # Panics
    ///
    /// Panics if `fac` is zero.
    pub fn new(var: NumVar, expr: Linear, fac: BigInt) -> Self {
        assert!(!fac.is_zero(), "Substitution factor must be non-zero");
        if fac.is_negative() {
            Substitution { var, expr: -expr, fac: -fac }
        } else {
            Substitution { var, expr, fac }
        }
    }

    /// The renaming `var = by`.
    pub fn renaming(var: NumVar, by: NumVar) -> Self {
        Substitution::new(var, Linear::var(by), BigInt::one())
    }

    /// Inverts the assignment `var := rhs / divisor` where `rhs` mentions `var`.
    ///
    /// For `rhs = b·var + r` the old value satisfies `var_old = (divisor·var - r) / b`.
    /// Returns `None` if `var` does not occur in `rhs`.
    pub fn inverting(rhs: &Linear, divisor: &BigInt, var: NumVar) -> Option<Self> {
        let b = rhs.terms.get(&var)?.clone();
        let expr = rhs.drop_term(var).add_term(-divisor.clone(), var);
        Some(Substitution::new(var, expr, -b))
    }

    /// Whether the substitution still mentions its own variable, i.e. stems
    /// from an invertible assignment.
    pub fn is_invertible(&self) -> bool {
        self.expr.contains(self.var)
    }

    /// Whether the substitution is a plain renaming `var = y`.
    pub fn is_simple(&self) -> bool {
        self.expr.get_constant().is_zero() && self.expr.single_term().map_or(false, |(_, c)| *c == self.fac)
    }

    /// Whether the substitution maps its variable onto itself.
    pub fn is_identity(&self) -> bool {
        self.is_simple() && self.expr.contains(self.var)
    }
}

impl fmt::Display for Substitution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fac.is_one() {
            write!(f, "[{} \\ {}]", self.var, self.expr)
        } else {
            write!(f, "[{} \\ ({}) / {}]", self.var, self.expr, self.fac)
        }
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn vars() -> (NumVar, NumVar, NumVar) {
        (NumVar::new(1), NumVar::new(2), NumVar::new(3))
    }

    #[test]
    fn test_terms_are_normalized() {
        let (x, y, _) = vars();
        let lin = Linear::from_terms(3, [(2, x), (1, y), (-2, x)]);
        assert_eq!(lin, Linear::from_terms(3, [(1, y)]));
        assert!(!lin.contains(x));
        assert_eq!(lin.coeff(x), BigInt::zero());
        assert_eq!(lin.to_string(), "x2 + 3");
    }

    #[test]
    fn test_arithmetic() {
        let (x, y, _) = vars();
        let a = Linear::from_terms(1, [(1, x), (2, y)]);
        let b = Linear::from_terms(-1, [(1, x), (-1, y)]);
        assert_eq!(&a + &b, Linear::from_terms(0, [(2, x), (1, y)]));
        assert_eq!(&a - &b, Linear::from_terms(2, [(3, y)]));
        assert_eq!(-&a, Linear::from_terms(-1, [(-1, x), (-2, y)]));
    }

    #[test]
    fn test_lowest_form_includes_constant() {
        let (x, y, _) = vars();
        let lin = Linear::from_terms(6, [(4, x), (-2, y)]);
        let (reduced, gcd) = lin.lowest_form();
        assert_eq!(gcd, BigInt::from(2));
        assert_eq!(reduced, Linear::from_terms(3, [(2, x), (-1, y)]));

        let coprime = Linear::from_terms(3, [(4, x)]);
        assert_eq!(coprime.lowest_form().1, BigInt::one());
    }

    #[test]
    fn test_to_equality_makes_leading_positive() {
        let (x, y, _) = vars();
        let lin = Linear::from_terms(4, [(-2, x), (2, y)]);
        let (eq, factor) = lin.to_equality_with_factor();
        assert_eq!(eq, Linear::from_terms(-2, [(1, x), (-1, y)]));
        assert_eq!(factor, BigInt::from(-2));
        assert_eq!(eq.scale(&factor), lin);
    }

    #[test]
    fn test_gen_and_apply_substitution() {
        let (x, y, z) = vars();
        // 2x - y + 4 = 0  =>  x = (y - 4) / 2
        let eq = Linear::from_terms(4, [(2, x), (-1, y)]);
        let sigma = eq.gen_substitution(x).unwrap();
        assert_eq!(sigma.fac, BigInt::from(2));
        assert_eq!(sigma.expr, Linear::from_terms(-4, [(1, y)]));

        // 3x + z  becomes  2z + 3(y - 4)
        let target = Linear::from_terms(0, [(3, x), (1, z)]);
        let applied = target.apply_substitution(&sigma);
        assert_eq!(applied, Linear::from_terms(-12, [(3, y), (2, z)]));

        assert_eq!(Linear::var(z).apply_substitution(&sigma), Linear::var(z));
        assert!(eq.gen_substitution(z).is_none());
    }

    #[test]
    fn test_inverting_substitution() {
        let (x, _, _) = vars();
        // x := x + 1  =>  x_old = x - 1
        let rhs = Linear::from_terms(1, [(1, x)]);
        let sigma = Substitution::inverting(&rhs, &BigInt::one(), x).unwrap();
        assert!(sigma.is_invertible());
        assert_eq!(sigma.fac, BigInt::one());
        assert_eq!(sigma.expr, Linear::from_terms(-1, [(1, x)]));

        // x - 99 <= 0 holds before the increment, so x - 100 <= 0 afterwards
        let bound = Linear::from_terms(-99, [(1, x)]);
        assert_eq!(bound.apply_substitution(&sigma), Linear::from_terms(-100, [(1, x)]));
    }

    #[test]
    fn test_simple_substitution() {
        let (x, y, _) = vars();
        assert!(Substitution::renaming(x, y).is_simple());
        assert!(!Substitution::renaming(x, y).is_identity());
        assert!(Substitution::renaming(x, x).is_identity());
        let scaled = Substitution::new(x, Linear::term(2, y), BigInt::one());
        assert!(!scaled.is_simple());
    }

    #[test]
    fn test_rename() {
        let (x, y, _) = vars();
        let lin = Linear::from_terms(0, [(2, x), (1, y)]);
        assert_eq!(lin.rename(x, y), Linear::term(3, y));
        assert_eq!(lin.rename(NumVar::new(9), y), lin);
    }

    #[test]
    fn test_ordering_by_size_first() {
        let (x, y, z) = vars();
        let small = Linear::from_terms(100, [(1, z)]);
        let large = Linear::from_terms(0, [(1, x), (1, y)]);
        assert!(small < large);
    }
}
