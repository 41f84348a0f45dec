//! Cumulative handler statistics.
//!
//! Counters are plain atomics updated with relaxed ordering from every request;
//! snapshots are approximate under concurrency.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug)]
pub struct HandlerStats {
    started_at: DateTime<Utc>,
    requests: AtomicU64,
    errors: AtomicU64,
    empty: AtomicU64,
    cache_hits: AtomicU64,
    filtered: AtomicU64,
    subset: AtomicU64,
    terms_considered: AtomicU64,
    terms_used: AtomicU64,
    total_time_ms: AtomicU64,
}

impl Default for HandlerStats {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerStats {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            empty: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            subset: AtomicU64::new(0),
            terms_considered: AtomicU64::new(0),
            terms_used: AtomicU64::new(0),
            total_time_ms: AtomicU64::new(0),
        }
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_empty(&self) {
        self.empty.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reduction(&self, filtered: u64, subset: u64, terms_considered: u64, terms_used: u64) {
        self.filtered.fetch_add(filtered, Ordering::Relaxed);
        self.subset.fetch_add(subset, Ordering::Relaxed);
        self.terms_considered.fetch_add(terms_considered, Ordering::Relaxed);
        self.terms_used.fetch_add(terms_used, Ordering::Relaxed);
    }

    pub fn record_elapsed(&self, elapsed: Duration) {
        self.total_time_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let requests = self.requests.load(Ordering::Relaxed);
        let filtered = self.filtered.load(Ordering::Relaxed);
        let subset = self.subset.load(Ordering::Relaxed);
        let terms_considered = self.terms_considered.load(Ordering::Relaxed);
        let terms_used = self.terms_used.load(Ordering::Relaxed);
        let total_time_ms = self.total_time_ms.load(Ordering::Relaxed);

        let per_request = |total: u64| {
            if requests == 0 {
                0.0
            } else {
                total as f64 / requests as f64
            }
        };
        let requests_per_second = if total_time_ms == 0 {
            0.0
        } else {
            requests as f64 / (total_time_ms as f64 * 0.001)
        };

        StatsSnapshot {
            since: self.started_at,
            requests,
            errors: self.errors.load(Ordering::Relaxed),
            empty: self.empty.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            total_time_ms,
            total_filtered: filtered,
            total_subset: subset,
            average_filtered: per_request(filtered),
            average_subset: per_request(subset),
            total_terms_considered: terms_considered,
            avg_terms_considered: per_request(terms_considered),
            total_terms_used: terms_used,
            avg_terms_used: per_request(terms_used),
            avg_time_per_request_ms: per_request(total_time_ms),
            avg_requests_per_second: requests_per_second,
        }
    }
}

/// Read-only view of [`HandlerStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub since: DateTime<Utc>,
    pub requests: u64,
    pub errors: u64,
    pub empty: u64,
    pub cache_hits: u64,
    pub total_time_ms: u64,
    pub total_filtered: u64,
    pub total_subset: u64,
    pub average_filtered: f64,
    pub average_subset: f64,
    pub total_terms_considered: u64,
    pub avg_terms_considered: f64,
    pub total_terms_used: u64,
    pub avg_terms_used: f64,
    pub avg_time_per_request_ms: f64,
    pub avg_requests_per_second: f64,
}
