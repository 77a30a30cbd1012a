//! Semantic cache
//!
//! Similarity-keyed cache of prior retrieval results. Callers ask the same
//! questions in near-identical words; a cosine match above a high threshold
//! reuses the earlier snippets and skips the index scan.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::embed::cosine_similarity;
use crate::index::ContextSnippet;

/// Cache statistics
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }
}

struct CacheEntry {
    query_vector: Vec<f32>,
    snippets: Vec<ContextSnippet>,
}

/// Similarity-keyed cache of retrieval results.
///
/// Process-wide and read-mostly: lookups take the read lock, inserts the
/// write lock. Capacity-bounded with oldest-first eviction; the access
/// pattern is bursts of near-identical consecutive queries, so recency
/// bookkeeping buys nothing here.
pub struct SemanticCache {
    entries: RwLock<Vec<CacheEntry>>,
    capacity: usize,
    /// Cosine similarity required for a hit
    threshold: f32,
    pub stats: CacheStats,
}

impl SemanticCache {
    pub fn new(capacity: usize, threshold: f32) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            capacity: capacity.max(1),
            threshold,
            stats: CacheStats::default(),
        }
    }

    /// Look up a near-identical prior query.
    pub fn get(&self, query_vector: &[f32]) -> Option<Vec<ContextSnippet>> {
        let entries = self.entries.read();

        let best = entries
            .iter()
            .map(|entry| (cosine_similarity(query_vector, &entry.query_vector), entry))
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        match best {
            Some((score, entry)) if score >= self.threshold => {
                self.stats.record_hit();
                tracing::debug!(score, "semantic cache hit");
                Some(entry.snippets.clone())
            }
            _ => {
                self.stats.record_miss();
                None
            }
        }
    }

    /// Store a query's snippets.
    pub fn insert(&self, query_vector: Vec<f32>, snippets: Vec<ContextSnippet>) {
        let mut entries = self.entries.write();

        if entries.len() >= self.capacity {
            entries.remove(0);
            self.stats.record_eviction();
        }

        entries.push(CacheEntry {
            query_vector,
            snippets,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
