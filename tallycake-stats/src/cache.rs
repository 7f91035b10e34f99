use std::collections::HashMap;
use std::num::NonZeroUsize;

use lru::LruCache;

enum Entries {
    Unbounded(HashMap<String, f64>),
    Bounded(LruCache<String, f64>),
}

/// A worker local memo of the results computed for each token.
///
/// The cache is owned by exactly one worker and is never shared, two workers
/// may well hold the same entry.
pub struct Cache {
    entries: Entries,
    hits: u64,
    misses: u64,
}

impl Cache {
    /// Creates a new cache, evicting the least recently used entry once
    /// `capacity` is reached if one is provided.
    pub fn new(capacity: Option<NonZeroUsize>) -> Self {
        match capacity {
            Some(capacity) => Self::bounded(capacity),
            None => Self::unbounded(),
        }
    }

    pub fn unbounded() -> Self {
        Self::with_entries(Entries::Unbounded(HashMap::new()))
    }

    pub fn bounded(capacity: NonZeroUsize) -> Self {
        Self::with_entries(Entries::Bounded(LruCache::new(capacity)))
    }

    fn with_entries(entries: Entries) -> Self {
        Self {
            entries,
            hits: 0,
            misses: 0,
        }
    }

    /// Looks up the cached result of the token.
    pub fn lookup(&mut self, token: &str) -> Option<f64> {
        let value = match &mut self.entries {
            Entries::Unbounded(entries) => entries.get(token).copied(),
            Entries::Bounded(entries) => entries.get(token).copied(),
        };

        if value.is_some() {
            self.hits += 1;
        } else {
            self.misses += 1;
        }

        value
    }

    /// Stores the result of the token.
    pub fn store(&mut self, token: String, value: f64) {
        match &mut self.entries {
            Entries::Unbounded(entries) => {
                entries.insert(token, value);
            },
            Entries::Bounded(entries) => {
                entries.put(token, value);
            },
        }
    }

    pub fn len(&self) -> usize {
        match &self.entries {
            Entries::Unbounded(entries) => entries.len(),
            Entries::Bounded(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn hits(&self) -> u64 {
        self.hits
    }

    #[inline]
    pub fn misses(&self) -> u64 {
        self.misses
    }
}
