//! Generation-tagged storage for windowed list rows.
//!
//! Server-side lists have no stable row identity: a row is addressed by
//! `(generation, index)` and nothing survives a generation change. The cache
//! therefore only ever holds rows for a single generation; replacing the
//! generation drops every entry. Typical usage:
//!
//! ```
//! # use ledgerview::cache::ListCache;
//! let mut cache: ListCache<String> = ListCache::new();
//! cache.invalidate_all(1);
//! cache.put(0, "row".to_string());
//! assert_eq!(cache.get(0), Some(&"row".to_string()));
//! cache.invalidate_all(2);
//! assert_eq!(cache.get(0), None);
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Monotonic identifier for one version of a named list's contents.
pub type Generation = u64;

/// `(generation, count)` pair pushed by the server for each named list.
/// Serialized as a two-element array on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationAndCount(pub Generation, pub u64);

impl GenerationAndCount {
    #[inline]
    pub fn generation(self) -> Generation {
        self.0
    }

    #[inline]
    pub fn count(self) -> u64 {
        self.1
    }
}

/// Rows fetched for the current generation, keyed by index.
///
/// The cache carries no fetch bookkeeping; in-flight ranges are tracked by
/// the scheduler that owns it. All mutation happens on the owning sync
/// state's event task, so no lock is needed here.
#[derive(Debug)]
pub struct ListCache<T> {
    generation: Option<Generation>,
    rows: HashMap<u64, T>,
}

impl<T> ListCache<T> {
    pub fn new() -> Self {
        Self {
            generation: None,
            rows: HashMap::new(),
        }
    }

    /// Generation the stored rows belong to. `None` until the first push.
    pub fn generation(&self) -> Option<Generation> {
        self.generation
    }

    pub fn get(&self, index: u64) -> Option<&T> {
        self.rows.get(&index)
    }

    pub fn contains(&self, index: u64) -> bool {
        self.rows.contains_key(&index)
    }

    pub fn put(&mut self, index: u64, value: T) {
        self.rows.insert(index, value);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Drop every entry and adopt `generation`. Completions issued against
    /// the previous generation must be discarded by the caller before they
    /// ever reach `put`.
    pub fn invalidate_all(&mut self, generation: Generation) {
        self.rows.clear();
        self.generation = Some(generation);
    }

    /// Drop rows at or past `count` after a same-generation count change.
    pub fn truncate(&mut self, count: u64) {
        self.rows.retain(|index, _| *index < count);
    }
}

impl<T> Default for ListCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_without_generation() {
        let cache: ListCache<u32> = ListCache::new();
        assert_eq!(cache.generation(), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidate_drops_rows_and_swaps_generation() {
        let mut cache = ListCache::new();
        cache.invalidate_all(3);
        cache.put(0, "a");
        cache.put(7, "b");
        assert_eq!(cache.len(), 2);

        cache.invalidate_all(4);
        assert_eq!(cache.generation(), Some(4));
        assert!(cache.is_empty());
        assert_eq!(cache.get(0), None);
    }

    #[test]
    fn truncate_drops_rows_past_count() {
        let mut cache = ListCache::new();
        cache.invalidate_all(1);
        for index in 0..10u64 {
            cache.put(index, index);
        }
        cache.truncate(3);
        assert_eq!(cache.len(), 3);
        assert!(cache.contains(2));
        assert!(!cache.contains(3));
    }

    #[test]
    fn generation_and_count_accessors() {
        let gc = GenerationAndCount(5, 42);
        assert_eq!(gc.generation(), 5);
        assert_eq!(gc.count(), 42);
    }
}
