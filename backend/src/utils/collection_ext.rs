//! Collection helpers
//!
//! Insertion-ordered keyed storage and small ordered-set helpers used by
//! the aggregation passes, where output order must follow input order.

use std::collections::HashMap;
use std::hash::Hash;

/// Map that iterates in first-insertion order
///
/// # Example
/// ```ignore
/// let mut groups: OrderedMap<String, usize> = OrderedMap::new();
/// *groups.entry_or_insert_with("b".to_string(), || 0) += 1;
/// *groups.entry_or_insert_with("a".to_string(), || 0) += 1;
/// assert_eq!(groups.keys().collect::<Vec<_>>(), ["b", "a"]);
/// ```
#[derive(Debug, Clone)]
pub struct OrderedMap<K, V> {
    positions: HashMap<K, usize>,
    entries: Vec<(K, V)>,
}

impl<K, V> Default for OrderedMap<K, V> {
    fn default() -> Self {
        Self { positions: HashMap::new(), entries: Vec::new() }
    }
}

impl<K: Eq + Hash + Clone, V> OrderedMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.positions.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        match self.positions.get(key) {
            Some(&i) => Some(&mut self.entries[i].1),
            None => None,
        }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.positions.contains_key(key)
    }

    /// Value for `key`, inserting `init()` at the end when absent
    pub fn entry_or_insert_with<F>(&mut self, key: K, init: F) -> &mut V
    where
        F: FnOnce() -> V,
    {
        let index = match self.positions.get(&key) {
            Some(&i) => i,
            None => {
                let i = self.entries.len();
                self.positions.insert(key.clone(), i);
                self.entries.push((key, init()));
                i
            },
        };
        &mut self.entries[index].1
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn into_values(self) -> Vec<V> {
        self.entries.into_iter().map(|(_, v)| v).collect()
    }

    pub fn into_entries(self) -> Vec<(K, V)> {
        self.entries
    }
}

/// Append `item` unless already present, keeping first-seen order
#[inline]
pub fn push_unique<T: PartialEq>(items: &mut Vec<T>, item: T) {
    if !items.contains(&item) {
        items.push(item);
    }
}

/// Append `item` while `items` is shorter than `cap`
#[inline]
pub fn push_capped<T>(items: &mut Vec<T>, item: T, cap: usize) -> bool {
    if items.len() < cap {
        items.push(item);
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_map_keeps_insertion_order() {
        let mut map: OrderedMap<String, usize> = OrderedMap::new();
        for key in ["b", "a", "b", "c", "a", "b"] {
            *map.entry_or_insert_with(key.to_string(), || 0) += 1;
        }

        let entries = map.into_entries();
        assert_eq!(
            entries,
            vec![("b".to_string(), 3), ("a".to_string(), 2), ("c".to_string(), 1)]
        );
    }

    #[test]
    fn test_ordered_map_lookup() {
        let mut map: OrderedMap<&str, i32> = OrderedMap::new();
        map.entry_or_insert_with("x", || 1);
        assert_eq!(map.get(&"x"), Some(&1));
        assert!(map.get(&"y").is_none());
        if let Some(v) = map.get_mut(&"x") {
            *v = 5;
        }
        assert_eq!(map.values().copied().collect::<Vec<_>>(), vec![5]);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_push_helpers() {
        let mut items = vec![1, 2];
        push_unique(&mut items, 2);
        push_unique(&mut items, 3);
        assert_eq!(items, vec![1, 2, 3]);

        assert!(!push_capped(&mut items, 4, 3));
        assert!(push_capped(&mut items, 4, 4));
        assert_eq!(items.len(), 4);
    }
}
