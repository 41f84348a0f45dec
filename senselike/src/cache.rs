//! Similarity result cache.
//!
//! Results are cached per request fingerprint, scoped to the index generation the
//! result was computed against. Entries are shared as `Arc<MatchedResult>`, so a
//! reader sees either the previous entry or the complete new one.
//!
//! Windows reaching past `CACHE_WINDOW_LIMIT` always recompute and overwrite the
//! entry. The overwrite is harmless for small windows because every computation
//! ranks the same capped list regardless of the requested window.

use moka::sync::Cache;
use parking_lot::RwLock;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Once};
use tantivy::DocAddress;
use tracing::warn;

/// Largest window upper bound (`start + rows`) served from cache.
pub const CACHE_WINDOW_LIMIT: usize = 1000;

/// Registry name of the similarity result cache.
pub const SIMILARITY_CACHE_NAME: &str = "sltcache";

static DEGRADED_WARNING: Once = Once::new();

// ─────────────────────────────────────────────────────────────────────────────
// Fingerprint
// ─────────────────────────────────────────────────────────────────────────────

/// Every search-affecting request parameter. Pagination and presentation toggles
/// are deliberately absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FingerprintParams<'a> {
    pub q: &'a str,
    pub match_offset: usize,
    pub filters: Vec<&'a str>,
    pub field: &'a str,
    pub knowledge_base: &'a str,
    pub weight: f32,
    pub num_terms_to_use: usize,
    pub threshold: f32,
    pub max_candidate_set_size: usize,
    pub min_doc_set_size_for_filter: usize,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Digest the canonical JSON encoding. Filters are treated as a set.
    pub fn of(params: &FingerprintParams<'_>) -> Result<Self, serde_json::Error> {
        let mut canonical = params.clone();
        canonical.filters.sort_unstable();
        canonical.filters.dedup();
        let encoded = serde_json::to_vec(&canonical)?;
        Ok(Self(Sha256::digest(&encoded).into()))
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub fingerprint: Fingerprint,
    pub generation: u64,
}

impl CacheKey {
    pub fn new(fingerprint: Fingerprint, generation: u64) -> Self {
        Self { fingerprint, generation }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Matched result
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct RankedDoc {
    pub address: DocAddress,
    pub key: String,
    pub score: f32,
}

/// Ranked hits plus the full matched set of one similarity computation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchedResult {
    docs: Vec<RankedDoc>,
    doc_set: Option<HashSet<DocAddress>>,
}

impl MatchedResult {
    /// A degenerate result: no hits and no document set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// An empty `doc_set` makes the result degenerate, like [`MatchedResult::empty`].
    pub fn new(docs: Vec<RankedDoc>, doc_set: HashSet<DocAddress>) -> Self {
        Self {
            docs,
            doc_set: (!doc_set.is_empty()).then_some(doc_set),
        }
    }

    pub fn docs(&self) -> &[RankedDoc] {
        &self.docs
    }

    pub fn doc_set(&self) -> Option<&HashSet<DocAddress>> {
        self.doc_set.as_ref()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Total matches, which may exceed the ranked list.
    pub fn num_found(&self) -> u64 {
        self.doc_set
            .as_ref()
            .map_or(self.docs.len() as u64, |set| set.len() as u64)
    }

    /// The `[start, start + rows)` slice; empty when `start` is past the end.
    pub fn window(&self, start: usize, rows: usize) -> &[RankedDoc] {
        if start >= self.docs.len() {
            return &[];
        }
        let end = start.saturating_add(rows).min(self.docs.len());
        &self.docs[start..end]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cache registry
// ─────────────────────────────────────────────────────────────────────────────

pub type NamedCache = Cache<CacheKey, Arc<MatchedResult>>;

/// Named caches, looked up by handlers at construction.
#[derive(Default)]
pub struct CacheRegistry {
    caches: RwLock<HashMap<String, NamedCache>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding only the similarity cache.
    pub fn with_similarity_cache(capacity: u64) -> Self {
        let registry = Self::new();
        registry.register(SIMILARITY_CACHE_NAME, capacity);
        registry
    }

    /// Create (or replace) a cache bounded to `capacity` entries.
    pub fn register(&self, name: &str, capacity: u64) -> NamedCache {
        let cache = Cache::builder().max_capacity(capacity).build();
        self.caches.write().insert(name.to_string(), cache.clone());
        cache
    }

    pub fn get(&self, name: &str) -> Option<NamedCache> {
        self.caches.read().get(name).cloned()
    }

    /// Drop every entry of every cache.
    pub fn invalidate_all(&self) {
        for cache in self.caches.read().values() {
            cache.invalidate_all();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Result cache
// ─────────────────────────────────────────────────────────────────────────────

/// True when the window must be recomputed regardless of cache contents.
pub fn bypasses_cache(start: usize, rows: usize) -> bool {
    start.saturating_add(rows) > CACHE_WINDOW_LIMIT
}

/// Handle on the similarity cache. Without one, every request recomputes.
#[derive(Clone)]
pub struct ResultCache {
    cache: Option<NamedCache>,
}

impl ResultCache {
    pub fn from_registry(registry: &CacheRegistry) -> Self {
        let cache = registry.get(SIMILARITY_CACHE_NAME);
        if cache.is_none() {
            DEGRADED_WARNING.call_once(|| {
                warn!(
                    cache = SIMILARITY_CACHE_NAME,
                    "similarity cache not defined, results will not be cached"
                );
            });
        }
        Self { cache }
    }

    pub fn is_degraded(&self) -> bool {
        self.cache.is_none()
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<MatchedResult>> {
        self.cache.as_ref()?.get(key)
    }

    /// Cached result for the request, unless its window bypasses the cache.
    pub fn lookup(&self, key: &CacheKey, start: usize, rows: usize) -> Option<Arc<MatchedResult>> {
        if bypasses_cache(start, rows) {
            return None;
        }
        self.get(key)
    }

    /// Store `result`, replacing any entry under `key`.
    pub fn put(&self, key: CacheKey, result: Arc<MatchedResult>) {
        if let Some(cache) = &self.cache {
            cache.insert(key, result);
        }
    }
}
