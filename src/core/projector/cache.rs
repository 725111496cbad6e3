//! LRU cache for linear minimization oracle solutions.
//!
//! The same constraint structure is projected on every tick, and the zero
//! gradient used for initialization repeats verbatim, so oracle vertices
//! are highly reusable across projections.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};

/// Cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// Hit rate in percent.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64 * 100.0
        }
    }
}

/// LRU map from (constraint structure, gradient) to an oracle vertex.
pub struct LmoCache {
    capacity: usize,
    entries: HashMap<u64, Vec<f64>>,
    access_order: VecDeque<u64>,
    hits: u64,
    misses: u64,
}

impl LmoCache {
    /// Create a cache holding at most `capacity` vertices.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            access_order: VecDeque::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// Build the cache key for a constraint structure and gradient.
    #[must_use]
    pub fn key(structure_hash: u64, gradient: &[f64]) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        structure_hash.hash(&mut hasher);
        for g in gradient {
            g.to_bits().hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Look up a cached vertex, refreshing its recency.
    pub fn get(&mut self, key: u64) -> Option<Vec<f64>> {
        if let Some(vertex) = self.entries.get(&key) {
            self.hits += 1;
            let vertex = vertex.clone();
            if let Some(pos) = self.access_order.iter().position(|k| *k == key) {
                self.access_order.remove(pos);
            }
            self.access_order.push_back(key);
            Some(vertex)
        } else {
            self.misses += 1;
            None
        }
    }

    /// Insert a vertex, evicting the least recently used entry at capacity.
    pub fn put(&mut self, key: u64, vertex: Vec<f64>) {
        while self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            if let Some(oldest) = self.access_order.pop_front() {
                self.entries.remove(&oldest);
            } else {
                break;
            }
        }
        if self.entries.insert(key, vertex).is_some() {
            if let Some(pos) = self.access_order.iter().position(|k| *k == key) {
                self.access_order.remove(pos);
            }
        }
        self.access_order.push_back(key);
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            size: self.entries.len(),
            capacity: self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_after_put() {
        let mut cache = LmoCache::new(4);
        let key = LmoCache::key(42, &[0.0, 1.0]);
        assert!(cache.get(key).is_none());

        cache.put(key, vec![1.0, 0.0]);
        assert_eq!(cache.get(key).unwrap(), vec![1.0, 0.0]);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn distinct_gradients_get_distinct_keys() {
        let a = LmoCache::key(7, &[0.1, 0.2]);
        let b = LmoCache::key(7, &[0.1, 0.3]);
        let c = LmoCache::key(8, &[0.1, 0.2]);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = LmoCache::new(2);
        cache.put(1, vec![1.0]);
        cache.put(2, vec![2.0]);
        // Touch 1 so 2 becomes the eviction candidate.
        assert!(cache.get(1).is_some());
        cache.put(3, vec![3.0]);

        assert!(cache.get(2).is_none());
        assert!(cache.get(1).is_some());
        assert!(cache.get(3).is_some());
        assert_eq!(cache.stats().size, 2);
    }

    #[test]
    fn reinserting_same_key_does_not_grow() {
        let mut cache = LmoCache::new(2);
        cache.put(1, vec![1.0]);
        cache.put(1, vec![1.5]);
        assert_eq!(cache.stats().size, 1);
        assert_eq!(cache.get(1).unwrap(), vec![1.5]);
    }
}
