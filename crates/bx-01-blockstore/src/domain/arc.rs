//! Adaptive Replacement Cache.
//!
//! Four LRU lists: `t1` (seen once recently), `t2` (seen at least twice),
//! and their ghost lists `b1`/`b2` holding only keys of recent evictions.
//! The target size `p` of `t1` adapts on ghost hits, trading recency
//! against frequency. `t1 + t2` never exceeds the capacity.

use std::hash::Hash;

use lru::LruCache;

pub struct ArcCache<K: Hash + Eq, V> {
    size: usize,
    p: usize,
    t1: LruCache<K, V>,
    t2: LruCache<K, V>,
    b1: LruCache<K, ()>,
    b2: LruCache<K, ()>,
}

impl<K: Hash + Eq + Clone, V: Clone> ArcCache<K, V> {
    /// Cache holding up to `size` values. A size of zero stores nothing.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            p: 0,
            t1: LruCache::unbounded(),
            t2: LruCache::unbounded(),
            b1: LruCache::unbounded(),
            b2: LruCache::unbounded(),
        }
    }

    /// Look up `key`, promoting it to the frequent list on hit.
    pub fn get(&mut self, key: &K) -> Option<V> {
        if let Some(value) = self.t1.pop(key) {
            self.t2.put(key.clone(), value.clone());
            return Some(value);
        }
        self.t2.get(key).cloned()
    }

    /// Look up `key` without touching recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.t1.peek(key).or_else(|| self.t2.peek(key))
    }

    pub fn contains(&self, key: &K) -> bool {
        self.t1.contains(key) || self.t2.contains(key)
    }

    pub fn add(&mut self, key: K, value: V) {
        if self.size == 0 {
            return;
        }

        if self.t1.pop(&key).is_some() {
            self.t2.put(key, value);
            return;
        }

        if self.t2.contains(&key) {
            self.t2.put(key, value);
            return;
        }

        if self.b1.contains(&key) {
            // Recency was undervalued: grow t1's target.
            let delta = if self.b2.len() > self.b1.len() {
                self.b2.len() / self.b1.len()
            } else {
                1
            };
            self.p = (self.p + delta).min(self.size);
            if self.t1.len() + self.t2.len() >= self.size {
                self.replace(false);
            }
            self.b1.pop(&key);
            self.t2.put(key, value);
            return;
        }

        if self.b2.contains(&key) {
            // Frequency was undervalued: shrink t1's target.
            let delta = if self.b1.len() > self.b2.len() {
                self.b1.len() / self.b2.len()
            } else {
                1
            };
            self.p = self.p.saturating_sub(delta);
            if self.t1.len() + self.t2.len() >= self.size {
                self.replace(true);
            }
            self.b2.pop(&key);
            self.t2.put(key, value);
            return;
        }

        if self.t1.len() + self.t2.len() >= self.size {
            self.replace(false);
        }
        if self.b1.len() > self.size - self.p {
            self.b1.pop_lru();
        }
        if self.b2.len() > self.p {
            self.b2.pop_lru();
        }
        self.t1.put(key, value);
    }

    /// Evict one entry from t1 or t2 into the matching ghost list.
    fn replace(&mut self, b2_contains_key: bool) {
        let t1_len = self.t1.len();
        if t1_len > 0 && (t1_len > self.p || (t1_len == self.p && b2_contains_key)) {
            if let Some((key, _)) = self.t1.pop_lru() {
                self.b1.put(key, ());
            }
        } else if let Some((key, _)) = self.t2.pop_lru() {
            self.b2.put(key, ());
        } else if let Some((key, _)) = self.t1.pop_lru() {
            self.b1.put(key, ());
        }
    }

    /// Forget `key` entirely, including ghost entries.
    pub fn remove(&mut self, key: &K) {
        self.t1.pop(key);
        self.t2.pop(key);
        self.b1.pop(key);
        self.b2.pop(key);
    }

    /// Drop every entry and reset adaptation.
    pub fn clear(&mut self) {
        self.t1.clear();
        self.t2.clear();
        self.b1.clear();
        self.b2.clear();
        self.p = 0;
    }

    /// Values currently held.
    pub fn len(&self) -> usize {
        self.t1.len() + self.t2.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.size
    }
}
