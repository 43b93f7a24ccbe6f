//! LRU cache of built filter expressions
//!
//! One coarse lock guards the whole cache. Builders run outside the lock,
//! so a slow builder never blocks readers of other keys.

use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;

use super::key::CacheKey;
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};

/// A built expression and when it was built
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub expression: String,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            created_at: Utc::now(),
        }
    }
}

/// Bounded expression cache shared across worker threads
pub struct ExpressionCache {
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
    metrics: Arc<MetricsRegistry>,
}

impl ExpressionCache {
    /// A zero capacity is raised to one
    pub fn new(capacity: usize, metrics: Arc<MetricsRegistry>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            metrics,
        }
    }

    /// Cached expression for `key`, marking it most recently used
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let found = self.entries.lock().get(key).cloned();
        match &found {
            Some(_) => {
                self.metrics.increment_cache_hits();
                log_event_with_fields(Event::CacheHit, &[("dataset", key.dataset_id())]);
            }
            None => {
                self.metrics.increment_cache_misses();
                log_event_with_fields(Event::CacheMiss, &[("dataset", key.dataset_id())]);
            }
        }
        found
    }

    /// Store an expression, evicting the least recently used entry if full
    pub fn insert(&self, key: CacheKey, expression: impl Into<String>) {
        let evicted = self.entries.lock().push(key.clone(), CacheEntry::new(expression));
        if let Some((evicted_key, _)) = evicted {
            if evicted_key != key {
                self.metrics.increment_cache_evictions();
                log_event_with_fields(Event::CacheEvicted, &[("dataset", evicted_key.dataset_id())]);
            }
        }
    }

    /// Cached expression, or the builder's output stored under `key`.
    ///
    /// The builder runs at most once per cached key; if another thread
    /// stored the key while this one was building, the stored value wins.
    pub fn get_or_build_expression<F>(&self, key: &CacheKey, builder: F) -> String
    where
        F: FnOnce() -> String,
    {
        if let Some(entry) = self.get(key) {
            return entry.expression;
        }
        let built = builder();
        self.store_if_absent(key, built)
    }

    /// Like [`get_or_build_expression`](Self::get_or_build_expression) with a
    /// fallible builder; errors are returned and nothing is cached
    pub fn try_get_or_build<F, E>(&self, key: &CacheKey, builder: F) -> Result<String, E>
    where
        F: FnOnce() -> Result<String, E>,
    {
        if let Some(entry) = self.get(key) {
            return Ok(entry.expression);
        }
        let built = builder()?;
        Ok(self.store_if_absent(key, built))
    }

    fn store_if_absent(&self, key: &CacheKey, built: String) -> String {
        let evicted = {
            let mut entries = self.entries.lock();
            if let Some(existing) = entries.get(key) {
                return existing.expression.clone();
            }
            entries.push(key.clone(), CacheEntry::new(built.clone()))
        };
        if let Some((evicted_key, _)) = evicted {
            self.metrics.increment_cache_evictions();
            log_event_with_fields(Event::CacheEvicted, &[("dataset", evicted_key.dataset_id())]);
        }
        built
    }

    /// Remove every entry for one dataset; returns how many were removed
    pub fn invalidate_dataset(&self, dataset_id: &str) -> usize {
        let removed = {
            let mut entries = self.entries.lock();
            let doomed: Vec<CacheKey> = entries
                .iter()
                .filter(|(k, _)| k.dataset_id() == dataset_id)
                .map(|(k, _)| k.clone())
                .collect();
            for key in &doomed {
                entries.pop(key);
            }
            doomed.len()
        };
        log_event_with_fields(
            Event::CacheInvalidated,
            &[("dataset", dataset_id), ("removed", &removed.to_string())],
        );
        removed
    }

    /// Presence check that does not touch recency
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.lock().peek(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SourceFingerprint;
    use crate::dataset::BackendKind;
    use std::cell::Cell;

    fn key(dataset: &str, predicate: &str) -> CacheKey {
        CacheKey::new(
            dataset,
            [predicate],
            None,
            SourceFingerprint::none(),
            BackendKind::EmbeddedSql,
        )
    }

    fn cache(capacity: usize) -> ExpressionCache {
        ExpressionCache::new(capacity, Arc::new(MetricsRegistry::new()))
    }

    #[test]
    fn test_builder_runs_once() {
        let c = cache(10);
        let calls = Cell::new(0);
        let k = key("roads", "intersects");
        for _ in 0..3 {
            let expr = c.get_or_build_expression(&k, || {
                calls.set(calls.get() + 1);
                "x = 1".to_string()
            });
            assert_eq!(expr, "x = 1");
        }
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_lru_eviction() {
        let c = cache(2);
        c.insert(key("a", "p"), "a");
        c.insert(key("b", "p"), "b");
        assert!(c.get(&key("a", "p")).is_some());
        c.insert(key("c", "p"), "c");
        assert!(c.contains(&key("a", "p")));
        assert!(!c.contains(&key("b", "p")));
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn test_invalidate_dataset_is_exact() {
        let c = cache(10);
        c.insert(key("roads", "intersects"), "1");
        c.insert(key("roads", "within"), "2");
        c.insert(key("rivers", "intersects"), "3");
        assert_eq!(c.invalidate_dataset("roads"), 2);
        assert!(!c.contains(&key("roads", "intersects")));
        assert!(c.contains(&key("rivers", "intersects")));
        assert_eq!(c.invalidate_dataset("roads"), 0);
    }

    #[test]
    fn test_failed_builder_not_cached() {
        let c = cache(10);
        let k = key("roads", "intersects");
        let r: Result<String, String> = c.try_get_or_build(&k, || Err("boom".into()));
        assert!(r.is_err());
        assert!(c.is_empty());
        let r: Result<String, String> = c.try_get_or_build(&k, || Ok("ok".into()));
        assert_eq!(r.unwrap(), "ok");
    }

    #[test]
    fn test_zero_capacity_raised() {
        assert_eq!(cache(0).capacity(), 1);
    }
}
