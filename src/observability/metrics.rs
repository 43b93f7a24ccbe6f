//! Optimizer counters
//!
//! - Counters only, monotonic
//! - Relaxed atomics; exactness across threads is not required

use std::sync::atomic::{AtomicU64, Ordering};

/// Registry of operational counters
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    plans_built: AtomicU64,
    estimations_degraded: AtomicU64,
    rewrites_applied: AtomicU64,
    rewrites_missed: AtomicU64,
    rewrites_fallback: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_evictions: AtomicU64,
    materializations_created: AtomicU64,
    materializations_failed: AtomicU64,
    materializations_dropped: AtomicU64,
    chunks_processed: AtomicU64,
    executions_ok: AtomicU64,
    executions_failed: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_plans_built(&self) {
        self.plans_built.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_estimations_degraded(&self) {
        self.estimations_degraded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rewrites_applied(&self) {
        self.rewrites_applied.fetch_add(1, Ordering::Relaxed);
    }

    /// Pattern detected but malformed
    pub fn increment_rewrites_missed(&self) {
        self.rewrites_missed.fetch_add(1, Ordering::Relaxed);
    }

    /// No pattern detected
    pub fn increment_rewrites_fallback(&self) {
        self.rewrites_fallback.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_misses(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_evictions(&self) {
        self.cache_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_materializations_created(&self) {
        self.materializations_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_materializations_failed(&self) {
        self.materializations_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_materializations_dropped(&self, count: u64) {
        self.materializations_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_chunks_processed(&self, count: u64) {
        self.chunks_processed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_executions_ok(&self) {
        self.executions_ok.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_executions_failed(&self) {
        self.executions_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            plans_built: self.plans_built.load(Ordering::Relaxed),
            estimations_degraded: self.estimations_degraded.load(Ordering::Relaxed),
            rewrites_applied: self.rewrites_applied.load(Ordering::Relaxed),
            rewrites_missed: self.rewrites_missed.load(Ordering::Relaxed),
            rewrites_fallback: self.rewrites_fallback.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_evictions: self.cache_evictions.load(Ordering::Relaxed),
            materializations_created: self.materializations_created.load(Ordering::Relaxed),
            materializations_failed: self.materializations_failed.load(Ordering::Relaxed),
            materializations_dropped: self.materializations_dropped.load(Ordering::Relaxed),
            chunks_processed: self.chunks_processed.load(Ordering::Relaxed),
            executions_ok: self.executions_ok.load(Ordering::Relaxed),
            executions_failed: self.executions_failed.load(Ordering::Relaxed),
        }
    }

    pub fn to_json(&self) -> String {
        // MetricsSnapshot holds only integers; serialization cannot fail
        serde_json::to_string(&self.snapshot()).unwrap_or_default()
    }
}

/// A point-in-time snapshot of all counters
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub plans_built: u64,
    pub estimations_degraded: u64,
    pub rewrites_applied: u64,
    pub rewrites_missed: u64,
    pub rewrites_fallback: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_evictions: u64,
    pub materializations_created: u64,
    pub materializations_failed: u64,
    pub materializations_dropped: u64,
    pub chunks_processed: u64,
    pub executions_ok: u64,
    pub executions_failed: u64,
}
