//! Bounded set of recently published envelope keys
//!
//! Not an LRU: once the set grows past capacity it is cleared wholesale and a
//! new dedup epoch begins.

use std::collections::HashSet;
use std::hash::{DefaultHasher, Hash, Hasher};

use tracing::debug;

/// Keys remembered before the cache resets
pub const DEFAULT_DEDUP_CAPACITY: usize = 1000;

#[derive(Debug)]
pub struct DedupCache {
    seen: HashSet<u64>,
    capacity: usize,
    epoch: u64,
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity.saturating_add(1)),
            capacity,
            epoch: 0,
        }
    }

    fn fingerprint(key: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    /// Record `key`; returns false if it was already seen this epoch
    pub fn insert(&mut self, key: &str) -> bool {
        if !self.seen.insert(Self::fingerprint(key)) {
            return false;
        }
        if self.seen.len() > self.capacity {
            debug!(capacity = self.capacity, epoch = self.epoch, "DedupCache::insert: overflow, clearing");
            self.seen.clear();
            self.epoch += 1;
        }
        true
    }

    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains(&Self::fingerprint(key))
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Number of resets so far
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}
