/// Unbalanced binary search tree used as the sorted station index.
///
/// Insertion and lookup are O(log n) on average; no rebalancing is performed,
/// so sorted-order insertion degrades both to O(n). The station catalog is
/// small (~44 entries) and rebuilt per run, which keeps that acceptable.
pub struct TreeIndex<K, V> {
    root: Option<Box<TreeNode<K, V>>>,
    len: usize,
}

struct TreeNode<K, V> {
    key: K,
    value: V,
    left: Option<Box<TreeNode<K, V>>>,
    right: Option<Box<TreeNode<K, V>>>,
}

impl<K: Ord, V> TreeIndex<K, V> {
    pub fn new() -> Self {
        Self { root: None, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts a key-value pair. Re-inserting an existing key overwrites the
    /// stored value (last-write-wins).
    pub fn insert(&mut self, key: K, value: V) {
        let mut node = &mut self.root;
        loop {
            match node {
                None => {
                    *node = Some(Box::new(TreeNode {
                        key,
                        value,
                        left: None,
                        right: None,
                    }));
                    self.len += 1;
                    return;
                }
                Some(n) => match key.cmp(&n.key) {
                    std::cmp::Ordering::Less => node = &mut n.left,
                    std::cmp::Ordering::Greater => node = &mut n.right,
                    std::cmp::Ordering::Equal => {
                        n.value = value;
                        return;
                    }
                },
            }
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let mut node = &self.root;
        while let Some(n) = node {
            match key.cmp(&n.key) {
                std::cmp::Ordering::Less => node = &n.left,
                std::cmp::Ordering::Greater => node = &n.right,
                std::cmp::Ordering::Equal => return Some(&n.value),
            }
        }
        None
    }

    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// In-order traversal: yields entries sorted by key, ascending.
    pub fn in_order(&self) -> Vec<(&K, &V)> {
        let mut out = Vec::with_capacity(self.len);
        Self::walk(&self.root, &mut out);
        out
    }

    fn walk<'a>(node: &'a Option<Box<TreeNode<K, V>>>, out: &mut Vec<(&'a K, &'a V)>) {
        if let Some(n) = node {
            Self::walk(&n.left, out);
            out.push((&n.key, &n.value));
            Self::walk(&n.right, out);
        }
    }
}

impl<K: Ord, V> Default for TreeIndex<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_traversal_is_sorted() {
        let mut tree = TreeIndex::new();
        for key in [24u32, 10, 37, 5] {
            tree.insert(key, format!("station-{key}"));
        }
        let keys: Vec<u32> = tree.in_order().into_iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![5, 10, 24, 37]);
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn duplicate_insert_overwrites() {
        let mut tree = TreeIndex::new();
        tree.insert(24u32, "old");
        tree.insert(24u32, "new");
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.get(&24), Some(&"new"));
    }

    #[test]
    fn lookup_misses_return_none() {
        let mut tree = TreeIndex::new();
        tree.insert(1u32, ());
        assert!(tree.get(&2).is_none());
        assert!(!tree.contains(&2));
    }

    #[test]
    fn sorted_insertion_still_correct() {
        // Degenerates into a list, but semantics must hold
        let mut tree = TreeIndex::new();
        for key in 0u32..100 {
            tree.insert(key, key * 2);
        }
        let keys: Vec<u32> = tree.in_order().into_iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, (0..100).collect::<Vec<_>>());
        assert_eq!(tree.get(&99), Some(&198));
    }
}
