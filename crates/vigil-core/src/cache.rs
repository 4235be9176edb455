//! Bounded memoization map keyed by normalized hostname.
//!
//! Insertions past the capacity ceiling are rejected rather than evicting,
//! since every rule reload clears the whole map anyway. Each map carries the
//! rule-set generation it was filled under so a result computed against an
//! older rule set is never stored.

use std::collections::HashMap;

/// Default capacity ceiling.
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Hostname-keyed cache with a fixed ceiling.
#[derive(Debug, Clone)]
pub struct HostCache<V> {
    entries: HashMap<String, V>,
    capacity: usize,
    generation: u64,
}

impl<V: Clone> HostCache<V> {
    /// Creates an empty cache for generation 0.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            generation: 0,
        }
    }

    /// Looks up a host, treating a generation mismatch as a miss.
    pub fn get(&self, host: &str, generation: u64) -> Option<V> {
        if self.generation != generation {
            return None;
        }
        self.entries.get(host).cloned()
    }

    /// Stores a value computed under `generation`.
    ///
    /// A newer generation wipes the map first; an older one is ignored.
    /// Returns false if the value was not stored.
    pub fn insert(&mut self, host: String, value: V, generation: u64) -> bool {
        if generation < self.generation {
            return false;
        }
        if generation > self.generation {
            self.reset(generation);
        }
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&host) {
            return false;
        }
        self.entries.insert(host, value);
        true
    }

    /// Drops every entry and adopts `generation`.
    pub fn reset(&mut self, generation: u64) {
        self.entries.clear();
        self.generation = generation;
    }

    /// Drops every entry, keeping the generation.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Capacity ceiling.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Generation the current entries belong to.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<V: Clone> Default for HostCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}
