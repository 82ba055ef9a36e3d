//! Memory strategies for the SQLite-backed store (spec.md §4.5).
//!
//! Each strategy trades peak memory for re-decode cost differently:
//!
//! - `Eager` loads every row on every search (default, simplest, most memory).
//! - `Streaming` scans in fixed-size batches, keeping only a bounded
//!   top-k heap resident.
//! - `LruCached` keeps up to `capacity` decoded rows resident, evicting the
//!   least recently touched entry, avoiding re-decode on repeat hits.
//! - `Hybrid` combines a bounded cache for hot rows with a streaming scan of
//!   the remaining (cold) rows, merging both into one ranked result.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use crate::entities::Embedding;

/// Row count below which [`recommend`] suggests `Eager`.
pub const EAGER_THRESHOLD: usize = 10_000;
/// Row count above which [`recommend`] suggests `Streaming`.
pub const STREAMING_THRESHOLD: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryStrategy {
    Eager,
    Streaming { batch_size: usize },
    LruCached { capacity: usize },
    Hybrid { capacity: usize, batch_size: usize },
}

impl Default for MemoryStrategy {
    fn default() -> Self {
        MemoryStrategy::Eager
    }
}

/// Recommends a strategy from the current row count, per spec.md §4.5:
/// `< 10k -> Eager`, `10k..=100k -> Hybrid`, `> 100k -> Streaming`.
pub fn recommend(row_count: usize) -> MemoryStrategy {
    if row_count < EAGER_THRESHOLD {
        MemoryStrategy::Eager
    } else if row_count <= STREAMING_THRESHOLD {
        MemoryStrategy::Hybrid { capacity: 5_000, batch_size: 1_000 }
    } else {
        MemoryStrategy::Streaming { batch_size: 1_000 }
    }
}

/// A decoded-row LRU cache shared by the `LruCached` and `Hybrid` strategies.
///
/// Backed by `lru::LruCache`'s doubly-linked-list + map, giving O(1)
/// get/put/evict; a `get` always promotes the entry to most-recently-used.
pub struct EmbeddingCache {
    inner: Mutex<LruCache<String, Embedding>>,
}

impl EmbeddingCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self { inner: Mutex::new(LruCache::new(cap)) }
    }

    pub fn get(&self, id: &str) -> Option<Embedding> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).get(id).cloned()
    }

    pub fn put(&self, id: String, embedding: Embedding) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).put(id, embedding);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
