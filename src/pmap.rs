//! Persistent map primitives shared by all domains.
//!
//! [`ThreeWaySplit`] is the structural diff used by every join, widening and
//! inclusion check; [`MultiMap`] is a persistent relation used for reverse
//! indexes and implication sets.

use std::fmt;

use im::ordmap::DiffItem;
use im::{OrdMap, OrdSet};

/// The result of comparing two maps key by key.
#[derive(Debug, Clone)]
pub struct ThreeWaySplit<K: Ord + Clone, V: Clone> {
    /// Bindings present only in the first map.
    pub only_in_first: OrdMap<K, V>,
    /// Bindings present only in the second map.
    pub only_in_second: OrdMap<K, V>,
    /// Keys bound in both maps to different values, with both values.
    pub in_both_but_differing: OrdMap<K, (V, V)>,
}

impl<K: Ord + Clone, V: Clone + PartialEq> ThreeWaySplit<K, V> {
    /// Splits `first` against `second`, skipping shared subtrees.
    pub fn of(first: &OrdMap<K, V>, second: &OrdMap<K, V>) -> Self {
        let mut split = ThreeWaySplit {
            only_in_first: OrdMap::new(),
            only_in_second: OrdMap::new(),
            in_both_but_differing: OrdMap::new(),
        };
        for item in first.diff(second) {
            match item {
                DiffItem::Add(k, v) => {
                    split.only_in_second.insert(k.clone(), v.clone());
                }
                DiffItem::Remove(k, v) => {
                    split.only_in_first.insert(k.clone(), v.clone());
                }
                DiffItem::Update { old: (k, a), new: (_, b) } => {
                    split.in_both_but_differing.insert(k.clone(), (a.clone(), b.clone()));
                }
            }
        }
        split
    }

    /// Whether both maps have the same key set.
    pub fn same_keys(&self) -> bool {
        self.only_in_first.is_empty() && self.only_in_second.is_empty()
    }

    /// Some key that is bound in only one of the maps.
    pub fn first_mismatch(&self) -> Option<&K> {
        self.only_in_first
            .keys()
            .next()
            .or_else(|| self.only_in_second.keys().next())
    }

    pub fn is_empty(&self) -> bool {
        self.same_keys() && self.in_both_but_differing.is_empty()
    }
}

/// A persistent one-to-many relation.
///
/// Keys with no values are never stored.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct MultiMap<K: Ord + Clone, V: Ord + Clone> {
    map: OrdMap<K, OrdSet<V>>,
}

impl<K: Ord + Clone, V: Ord + Clone> Default for MultiMap<K, V> {
    fn default() -> Self {
        MultiMap { map: OrdMap::new() }
    }
}

impl<K: Ord + Clone, V: Ord + Clone> MultiMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Number of `(key, value)` pairs.
    pub fn len(&self) -> usize {
        self.map.values().map(|vs| vs.len()).sum()
    }

    pub fn add(&mut self, key: K, value: V) {
        self.map.entry(key).or_default().insert(value);
    }

    pub fn remove(&mut self, key: &K, value: &V) {
        let now_empty = match self.map.get_mut(key) {
            Some(values) => {
                values.remove(value);
                values.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.map.remove(key);
        }
    }

    pub fn remove_key(&mut self, key: &K) -> OrdSet<V> {
        self.map.remove(key).unwrap_or_default()
    }

    /// Values bound to `key`, empty if none.
    pub fn get(&self, key: &K) -> OrdSet<V> {
        self.map.get(key).cloned().unwrap_or_default()
    }

    pub fn contains(&self, key: &K, value: &V) -> bool {
        self.map.get(key).map_or(false, |vs| vs.contains(value))
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.map.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &OrdSet<V>)> + '_ {
        self.map.iter()
    }

    /// All `(key, value)` pairs in order.
    pub fn pairs(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.map.iter().flat_map(|(k, vs)| vs.iter().map(move |v| (k, v)))
    }

    pub fn union(&self, other: &MultiMap<K, V>) -> MultiMap<K, V> {
        let mut result = self.clone();
        for (k, v) in other.pairs() {
            result.add(k.clone(), v.clone());
        }
        result
    }

    pub fn intersection(&self, other: &MultiMap<K, V>) -> MultiMap<K, V> {
        let mut result = MultiMap::new();
        for (k, v) in self.pairs() {
            if other.contains(k, v) {
                result.add(k.clone(), v.clone());
            }
        }
        result
    }

    /// Keeps only the pairs satisfying `keep`.
    pub fn filter(&self, mut keep: impl FnMut(&K, &V) -> bool) -> MultiMap<K, V> {
        let mut result = MultiMap::new();
        for (k, v) in self.pairs() {
            if keep(k, v) {
                result.add(k.clone(), v.clone());
            }
        }
        result
    }
}

impl<K: Ord + Clone, V: Ord + Clone> FromIterator<(K, V)> for MultiMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut result = MultiMap::new();
        for (k, v) in iter {
            result.add(k, v);
        }
        result
    }
}

impl<K: Ord + Clone + fmt::Debug, V: Ord + Clone + fmt::Debug> fmt::Debug for MultiMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.map.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_split_classifies_bindings() {
        let first: OrdMap<u32, &str> = [(1u32, "a"), (2, "b"), (3, "c")].into_iter().collect();
        let second: OrdMap<u32, &str> = [(2u32, "b"), (3, "z"), (4, "d")].into_iter().collect();
        let split = ThreeWaySplit::of(&first, &second);

        assert_eq!(split.only_in_first.keys().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(split.only_in_second.keys().copied().collect::<Vec<_>>(), vec![4]);
        assert_eq!(split.in_both_but_differing.get(&3), Some(&("c", "z")));
        assert!(!split.in_both_but_differing.contains_key(&2));
        assert!(!split.same_keys());
        assert_eq!(split.first_mismatch(), Some(&1));
    }

    #[test]
    fn test_split_of_equal_maps_is_empty() {
        let first: OrdMap<u32, u32> = (0u32..100).map(|i| (i, i * i)).collect();
        let second = first.update(7, 49);
        assert!(ThreeWaySplit::of(&first, &second).is_empty());
    }

    #[test]
    fn test_multimap_add_remove() {
        let mut m: MultiMap<u32, u32> = MultiMap::new();
        m.add(1, 10);
        m.add(1, 11);
        m.add(2, 20);
        assert_eq!(m.len(), 3);
        assert!(m.contains(&1, &11));

        m.remove(&1, &10);
        m.remove(&1, &11);
        assert!(!m.contains_key(&1));
        assert_eq!(m.get(&1).len(), 0);
        assert_eq!(m.remove_key(&2).len(), 1);
        assert!(m.is_empty());
    }

    #[test]
    fn test_multimap_set_operations() {
        let a: MultiMap<u32, u32> = [(1, 1), (1, 2), (2, 2)].into_iter().collect();
        let b: MultiMap<u32, u32> = [(1, 2), (3, 3)].into_iter().collect();
        assert_eq!(a.intersection(&b), [(1, 2)].into_iter().collect());
        assert_eq!(a.union(&b).len(), 4);
        assert_eq!(a.filter(|k, _| *k == 2).len(), 1);
    }
}
