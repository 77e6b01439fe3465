use rustc_hash::FxHashMap as HashMap;

/// A string-keyed map that iterates in insertion order.
///
/// Replacing the value of an existing key keeps its position; removing a key shifts every
/// later entry forward.
#[derive(Clone)]
pub struct NamedMap<V> {
    entries: Vec<(String, V)>,
    index: HashMap<String, usize>,
}

impl<V> Default for NamedMap<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::default(),
        }
    }
}

impl<V: std::fmt::Debug> std::fmt::Debug for NamedMap<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<V: PartialEq> PartialEq for NamedMap<V> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<V> NamedMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    #[inline]
    pub fn position(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }

    #[inline]
    pub fn get(&self, key: &str) -> Option<&V> {
        self.position(key).map(|index| &self.entries[index].1)
    }

    #[inline]
    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.position(key).map(|index| &mut self.entries[index].1)
    }

    /// Inserts or replaces. Returns the replaced value, if any.
    pub fn insert(&mut self, key: impl Into<String>, value: V) -> Option<V> {
        let key = key.into();
        match self.position(&key) {
            Some(index) => Some(std::mem::replace(&mut self.entries[index].1, value)),
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Removes `key`, preserving the order of the remaining entries.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        let index = self.index.remove(key)?;
        let (_, value) = self.entries.remove(index);
        for (_, position) in self.index.iter_mut() {
            if *position > index {
                *position -= 1;
            }
        }
        Some(value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&str, &V)> + ExactSizeIterator {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn iter_mut(
        &mut self,
    ) -> impl DoubleEndedIterator<Item = (&str, &mut V)> + ExactSizeIterator {
        self.entries
            .iter_mut()
            .map(|(key, value)| (key.as_str(), value))
    }

    pub fn keys(&self) -> impl DoubleEndedIterator<Item = &str> + ExactSizeIterator {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn values(&self) -> impl DoubleEndedIterator<Item = &V> + ExactSizeIterator {
        self.entries.iter().map(|(_, value)| value)
    }

    pub fn values_mut(&mut self) -> impl DoubleEndedIterator<Item = &mut V> + ExactSizeIterator {
        self.entries.iter_mut().map(|(_, value)| value)
    }
}

impl<V> std::ops::Index<&str> for NamedMap<V> {
    type Output = V;

    /// Panics if `key` is absent.
    fn index(&self, key: &str) -> &V {
        match self.get(key) {
            Some(value) => value,
            None => panic!("key \"{key}\" not found"),
        }
    }
}

impl<K: Into<String>, V> FromIterator<(K, V)> for NamedMap<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::default();
        map.extend(iter);
        map
    }
}

impl<K: Into<String>, V> Extend<(K, V)> for NamedMap<V> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl<V> IntoIterator for NamedMap<V> {
    type Item = (String, V);
    type IntoIter = std::vec::IntoIter<(String, V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::NamedMap;

    #[test]
    fn test_insertion_order() {
        let mut map = NamedMap::new();
        for key in ["z", "a", "m", "b"] {
            map.insert(key, key.len());
        }
        assert_eq!(map.keys().collect_vec(), ["z", "a", "m", "b"]);

        // replacing keeps the position
        assert_eq!(map.insert("a", 10), Some(1));
        assert_eq!(map.keys().collect_vec(), ["z", "a", "m", "b"]);
        assert_eq!(map.get("a"), Some(&10));
    }

    #[test]
    fn test_remove_shifts() {
        let mut map: NamedMap<usize> = (0..5).map(|x| (format!("k{x}"), x)).collect();
        assert_eq!(map.remove("k1"), Some(1));
        assert_eq!(map.remove("k1"), None);
        assert_eq!(map.keys().collect_vec(), ["k0", "k2", "k3", "k4"]);
        assert_eq!(map.position("k4"), Some(3));
        assert_eq!(map.get("k3"), Some(&3));

        map.insert("k1", 1);
        assert_eq!(map.keys().collect_vec(), ["k0", "k2", "k3", "k4", "k1"]);
        assert_eq!(map.len(), 5);
    }
}
