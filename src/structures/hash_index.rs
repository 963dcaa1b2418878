use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

const DEFAULT_CAPACITY: usize = 64;

/// Separate-chaining hash map used for point lookups of station metadata.
///
/// Bucket count is fixed at construction; expected O(1) insert/lookup/delete
/// for the catalog sizes this pipeline handles.
pub struct HashIndex<K, V> {
    buckets: Vec<Vec<(K, V)>>,
    len: usize,
}

impl<K: Hash + Eq, V> HashIndex<K, V> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(buckets: usize) -> Self {
        let buckets = buckets.max(1);
        Self {
            buckets: (0..buckets).map(|_| Vec::new()).collect(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn bucket_for(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.buckets.len()
    }

    /// Inserts a key-value pair, overwriting any existing entry for the key.
    pub fn insert(&mut self, key: K, value: V) {
        let idx = self.bucket_for(&key);
        let bucket = &mut self.buckets[idx];
        for entry in bucket.iter_mut() {
            if entry.0 == key {
                entry.1 = value;
                return;
            }
        }
        bucket.push((key, value));
        self.len += 1;
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let idx = self.bucket_for(key);
        self.buckets[idx]
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let idx = self.bucket_for(key);
        self.buckets[idx]
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Removes a key, returning its value. Removing an absent key is a no-op.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.bucket_for(key);
        let bucket = &mut self.buckets[idx];
        let pos = bucket.iter().position(|(k, _)| k == key)?;
        self.len -= 1;
        Some(bucket.swap_remove(pos).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.buckets
            .iter()
            .flat_map(|b| b.iter().map(|(k, v)| (k, v)))
    }
}

impl<K: Hash + Eq, V> Default for HashIndex<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
