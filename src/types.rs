//! Type-safe wrappers for numeric variables, variable sets and program points.
//!
//! This module provides the identifiers shared by every domain in the stack:
//! numeric variables, persistent variable sets, the `(permanent, ephemeral)`
//! pairs used for summarization, and opaque program locations.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use im::OrdSet;

/// First identifier handed out by [`NumVar::fresh`].
///
/// Identifiers below this value are reserved for variables created by the
/// front end through [`NumVar::new`].
const FIRST_FRESH_ID: u32 = 1 << 24;

static NEXT_FRESH_ID: AtomicU32 = AtomicU32::new(FIRST_FRESH_ID);

/// The role a numeric variable plays in the analysis.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum VarKind {
    /// An ordinary program variable or temporary.
    Plain,
    /// A single-bit condition flag, known to range over `[0, 1]`.
    Flag,
    /// A surrogate variable allocated by a relational functor.
    Special,
}

/// A numeric variable identifier.
///
/// Variables are compared by identifier first, so the ordering of a set of
/// variables is stable regardless of their kind.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct NumVar {
    id: u32,
    kind: VarKind,
}

impl NumVar {
    /// Creates a plain variable with the given identifier.
    ///
    /// # Panics
    ///
    /// Panics if `id` collides with the range reserved for fresh variables.
    pub fn new(id: u32) -> Self {
        assert!(id < FIRST_FRESH_ID, "Variable IDs must be < {}", FIRST_FRESH_ID);
        NumVar { id, kind: VarKind::Plain }
    }

    /// Creates a flag variable with the given identifier.
    pub fn flag(id: u32) -> Self {
        assert!(id < FIRST_FRESH_ID, "Variable IDs must be < {}", FIRST_FRESH_ID);
        NumVar { id, kind: VarKind::Flag }
    }

    /// Allocates a globally unique variable of the given kind.
    pub fn fresh(kind: VarKind) -> Self {
        let id = NEXT_FRESH_ID.fetch_add(1, Ordering::Relaxed);
        NumVar { id, kind }
    }

    /// Returns the raw identifier.
    pub fn id(self) -> u32 {
        self.id
    }

    pub fn kind(self) -> VarKind {
        self.kind
    }

    pub fn is_flag(self) -> bool {
        self.kind == VarKind::Flag
    }

    pub fn is_special(self) -> bool {
        self.kind == VarKind::Special
    }
}

impl fmt::Display for NumVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            VarKind::Plain => write!(f, "x{}", self.id),
            VarKind::Flag => write!(f, "f{}", self.id),
            VarKind::Special => write!(f, "w{}", self.id),
        }
    }
}

impl From<NumVar> for u32 {
    fn from(var: NumVar) -> Self {
        var.id
    }
}

/// An immutable ordered set of numeric variables.
///
/// Backed by a persistent balanced tree, so cloning is `O(1)` and every
/// update shares structure with the set it was derived from.
#[derive(Debug, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VarSet(OrdSet<NumVar>);

impl VarSet {
    pub fn new() -> Self {
        VarSet(OrdSet::new())
    }

    pub fn singleton(var: NumVar) -> Self {
        VarSet(OrdSet::unit(var))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, var: NumVar) -> bool {
        self.0.contains(&var)
    }

    pub fn insert(&mut self, var: NumVar) {
        self.0.insert(var);
    }

    pub fn remove(&mut self, var: NumVar) {
        self.0.remove(&var);
    }

    /// Returns a copy of this set with `var` added.
    pub fn with(&self, var: NumVar) -> Self {
        VarSet(self.0.update(var))
    }

    /// Returns a copy of this set with `var` removed.
    pub fn without(&self, var: NumVar) -> Self {
        VarSet(self.0.without(&var))
    }

    pub fn union(&self, other: &VarSet) -> Self {
        VarSet(self.0.clone().union(other.0.clone()))
    }

    /// Variables of `self` that are not in `other`.
    pub fn difference(&self, other: &VarSet) -> Self {
        self.iter().filter(|v| !other.contains(*v)).collect()
    }

    pub fn intersection(&self, other: &VarSet) -> Self {
        self.iter().filter(|v| other.contains(*v)).collect()
    }

    pub fn is_disjoint(&self, other: &VarSet) -> bool {
        self.iter().all(|v| !other.contains(v))
    }

    pub fn is_subset(&self, other: &VarSet) -> bool {
        self.iter().all(|v| other.contains(v))
    }

    pub fn first(&self) -> Option<NumVar> {
        self.0.get_min().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = NumVar> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<NumVar> for VarSet {
    fn from_iter<I: IntoIterator<Item = NumVar>>(iter: I) -> Self {
        VarSet(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[NumVar; N]> for VarSet {
    fn from(vars: [NumVar; N]) -> Self {
        vars.into_iter().collect()
    }
}

impl fmt::Display for VarSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, v) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, "}}")
    }
}

/// The type a variable is introduced with.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum VarType {
    /// A boolean, ranging over `[0, 1]`.
    Bool,
    /// An unconstrained integer.
    Zeno,
    /// A non-negative address offset.
    Address,
}

/// A `(permanent, ephemeral)` pair used by `expand` and `fold`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VarPair {
    pub permanent: NumVar,
    pub ephemeral: NumVar,
}

impl VarPair {
    pub fn new(permanent: NumVar, ephemeral: NumVar) -> Self {
        VarPair { permanent, ephemeral }
    }
}

/// An ordered list of variable pairs for region summarization.
#[derive(Debug, Clone, Default, Eq, PartialEq, Hash)]
pub struct FoldMap(Vec<VarPair>);

impl FoldMap {
    pub fn new() -> Self {
        FoldMap(Vec::new())
    }

    pub fn push(&mut self, permanent: NumVar, ephemeral: NumVar) {
        self.0.push(VarPair::new(permanent, ephemeral));
    }

    pub fn iter(&self) -> impl Iterator<Item = &VarPair> + '_ {
        self.0.iter()
    }

    pub fn permanents(&self) -> VarSet {
        self.0.iter().map(|p| p.permanent).collect()
    }

    pub fn ephemerals(&self) -> VarSet {
        self.0.iter().map(|p| p.ephemeral).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(NumVar, NumVar)> for FoldMap {
    fn from_iter<I: IntoIterator<Item = (NumVar, NumVar)>>(iter: I) -> Self {
        FoldMap(iter.into_iter().map(|(p, e)| VarPair::new(p, e)).collect())
    }
}

/// An opaque program location supplied by the fixpoint driver.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ProgramPoint(u64);

impl ProgramPoint {
    pub fn new(address: u64) -> Self {
        ProgramPoint(address)
    }

    pub fn address(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProgramPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{:#x}", self.0)
    }
}

impl From<u64> for ProgramPoint {
    fn from(address: u64) -> Self {
        ProgramPoint(address)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_var_creation() {
        let x1 = NumVar::new(1);
        let x2 = NumVar::new(2);
        assert_eq!(x1.id(), 1);
        assert_eq!(x2.id(), 2);
        assert!(x1 < x2);
        assert_eq!(x1.to_string(), "x1");
        assert_eq!(NumVar::flag(3).to_string(), "f3");
    }

    #[test]
    #[should_panic(expected = "Variable IDs must be <")]
    fn test_var_reserved_range_panics() {
        NumVar::new(FIRST_FRESH_ID);
    }

    #[test]
    fn test_fresh_vars_are_unique() {
        let w1 = NumVar::fresh(VarKind::Special);
        let w2 = NumVar::fresh(VarKind::Special);
        assert_ne!(w1, w2);
        assert!(w1.is_special());
        assert!(w1.id() >= FIRST_FRESH_ID);
    }

    #[test]
    fn test_varset_operations() {
        let (a, b, c) = (NumVar::new(1), NumVar::new(2), NumVar::new(3));
        let s1 = VarSet::from([a, b]);
        let s2 = VarSet::from([b, c]);

        assert_eq!(s1.union(&s2), VarSet::from([a, b, c]));
        assert_eq!(s1.intersection(&s2), VarSet::singleton(b));
        assert_eq!(s1.difference(&s2), VarSet::singleton(a));
        assert!(VarSet::singleton(b).is_subset(&s1));
        assert!(!s1.is_disjoint(&s2));
        assert_eq!(s1.to_string(), "{x1, x2}");
    }

    #[test]
    fn test_varset_persistence() {
        let a = NumVar::new(1);
        let s = VarSet::new();
        let t = s.with(a);
        assert!(s.is_empty());
        assert!(t.contains(a));
        assert!(t.without(a).is_empty());
    }

    #[test]
    fn test_foldmap_sides() {
        let (p, e) = (NumVar::new(1), NumVar::new(2));
        let pairs: FoldMap = [(p, e)].into_iter().collect();
        assert_eq!(pairs.permanents(), VarSet::singleton(p));
        assert_eq!(pairs.ephemerals(), VarSet::singleton(e));
    }
}
