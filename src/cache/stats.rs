//! `recordStats()` counters (spec.md §4.8), enumerated per SPEC_FULL.md §3.

use std::sync::atomic::{AtomicU64, Ordering};

/// A point-in-time snapshot of a cache's counters. Derived rates are
/// computed on read, as in Guava's `com.google.common.cache.CacheStats`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hit_count: u64,
    pub miss_count: u64,
    pub load_success_count: u64,
    pub load_exception_count: u64,
    pub total_load_time_nanos: u64,
    pub eviction_count: u64,
}

impl CacheStats {
    pub fn request_count(&self) -> u64 {
        self.hit_count + self.miss_count
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.request_count();
        if total == 0 {
            1.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }

    pub fn miss_rate(&self) -> f64 {
        let total = self.request_count();
        if total == 0 {
            0.0
        } else {
            self.miss_count as f64 / total as f64
        }
    }

    pub fn load_count(&self) -> u64 {
        self.load_success_count + self.load_exception_count
    }

    pub fn average_load_penalty(&self) -> f64 {
        let loads = self.load_count();
        if loads == 0 {
            0.0
        } else {
            self.total_load_time_nanos as f64 / loads as f64
        }
    }
}

/// Live, concurrently-updated counters backing a built cache.
///
/// `recordStats()` not being set leaves a cache with no `StatsCounter` at
/// all rather than one nobody reads, avoiding the cost of atomics on the hot
/// path for callers who don't want them (same rationale as Guava's
/// `NULL_STATS_COUNTER` vs `SimpleStatsCounter`).
#[derive(Debug, Default)]
pub(crate) struct StatsCounter {
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    load_success_count: AtomicU64,
    load_exception_count: AtomicU64,
    total_load_time_nanos: AtomicU64,
    eviction_count: AtomicU64,
}

impl StatsCounter {
    pub(crate) fn record_hit(&self) {
        self.hit_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.miss_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_load_success(&self, nanos: u64) {
        self.load_success_count.fetch_add(1, Ordering::Relaxed);
        self.total_load_time_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub(crate) fn record_load_exception(&self, nanos: u64) {
        self.load_exception_count.fetch_add(1, Ordering::Relaxed);
        self.total_load_time_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.eviction_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            load_success_count: self.load_success_count.load(Ordering::Relaxed),
            load_exception_count: self.load_exception_count.load(Ordering::Relaxed),
            total_load_time_nanos: self.total_load_time_nanos.load(Ordering::Relaxed),
            eviction_count: self.eviction_count.load(Ordering::Relaxed),
        }
    }
}
