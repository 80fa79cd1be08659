//! Content-addressed memoization of expensive, repeatable lookups.
//!
//! Two levels of keying:
//!
//! 1. **Outer key** (for example a site id) → fingerprint of the computed value
//! 2. **Fingerprint** (SHA-256 of the value's canonical JSON) → the value
//!
//! Entries are only ever added. Computation is single-flight per outer key:
//! concurrent callers for the same key wait on the key's slot and reuse the
//! first caller's result.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use crate::model::ComponentDescriptor;

/// Hex SHA-256 over the canonical serialization of a value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Canonical form is compact JSON with object keys in sorted order
    pub fn of<T: Serialize>(value: &T) -> Result<Self, CacheError> {
        let canonical = serde_json::to_value(value)?;
        let bytes = serde_json::to_vec(&canonical)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(Fingerprint(format!("{:x}", hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache's own bookkeeping disagrees with itself. Never expected.
    #[error("Cache is inconsistent for key '{key}': {detail}")]
    Internal { key: String, detail: String },

    #[error("Failed to fingerprint value: {0}")]
    Fingerprint(#[from] serde_json::Error),
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub computations: AtomicU64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

type Slot = Arc<Mutex<()>>;

/// Append-only, thread-safe cache shared by reference between pipeline runs
pub struct CacheManager<V> {
    /// Held only while a key is being computed
    slots: Mutex<HashMap<String, Slot>>,
    /// Outer key → fingerprint, written once per key after the entry exists
    committed: RwLock<HashMap<String, Fingerprint>>,
    entries: RwLock<HashMap<Fingerprint, Arc<V>>>,
    stats: CacheStats,
}

/// Cache of target-side component catalogues, keyed by site id
pub type ComponentCache = CacheManager<Vec<ComponentDescriptor>>;

impl<V> Default for CacheManager<V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            committed: RwLock::new(HashMap::new()),
            entries: RwLock::new(HashMap::new()),
            stats: CacheStats::default(),
        }
    }
}

impl<V: Serialize> CacheManager<V> {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Slot {
        self.slots
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn entry(&self, key: &str, fingerprint: &Fingerprint) -> Result<Arc<V>, CacheError> {
        self.entries
            .read()
            .get(fingerprint)
            .cloned()
            .ok_or_else(|| CacheError::Internal {
                key: key.to_string(),
                detail: format!("fingerprint {} has no entry", fingerprint),
            })
    }

    fn hit(&self, key: &str) -> Option<Result<Arc<V>, CacheError>> {
        let fingerprint = self.fingerprint_for(key)?;
        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        Some(self.entry(key, &fingerprint))
    }

    /// Return the cached value for `key`, computing it at most once.
    ///
    /// A failed computation leaves nothing behind; the next caller retries.
    pub fn get_or_compute<E, F>(&self, key: &str, compute: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Result<V, E>,
        E: From<CacheError>,
    {
        if let Some(found) = self.hit(key) {
            return Ok(found?);
        }

        let slot = self.slot(key);
        let _computing = slot.lock();

        // Another caller may have finished while we waited on the slot
        if let Some(found) = self.hit(key) {
            return Ok(found?);
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        self.stats.computations.fetch_add(1, Ordering::Relaxed);
        let value = compute()?;
        let fingerprint = Fingerprint::of(&value)?;

        let canonical = self
            .entries
            .write()
            .entry(fingerprint.clone())
            .or_insert_with(|| Arc::new(value))
            .clone();
        self.committed.write().insert(key.to_string(), fingerprint);

        Ok(canonical)
    }

    /// Read without computing. `Ok(None)` means not cached yet (or the first
    /// computation for the key is still running).
    pub fn lookup(&self, key: &str) -> Result<Option<Arc<V>>, CacheError> {
        match self.fingerprint_for(key) {
            Some(fingerprint) => self.entry(key, &fingerprint).map(Some),
            None => Ok(None),
        }
    }

    pub fn fingerprint_for(&self, key: &str) -> Option<Fingerprint> {
        self.committed.read().get(key).cloned()
    }

    /// Number of distinct values stored
    pub fn entry_count(&self) -> usize {
        self.entries.read().len()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[derive(Debug, Error)]
    enum TestError {
        #[error("cache: {0}")]
        Cache(#[from] CacheError),
        #[error("lookup failed")]
        Lookup,
    }

    #[test]
    fn test_single_flight_under_contention() {
        let cache: Arc<CacheManager<Vec<String>>> = Arc::new(CacheManager::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_compute::<TestError, _>("site-a", || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(50));
                            Ok(vec!["Text".to_string(), "Image".to_string()])
                        })
                        .unwrap()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in &results {
            assert!(Arc::ptr_eq(result, &results[0]));
        }
        assert_eq!(cache.stats().computations.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_identical_values_share_one_entry() {
        let cache: CacheManager<Vec<String>> = CacheManager::new();

        let a = cache
            .get_or_compute::<TestError, _>("site-a", || Ok(vec!["Text".to_string()]))
            .unwrap();
        let b = cache
            .get_or_compute::<TestError, _>("site-b", || Ok(vec!["Text".to_string()]))
            .unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.entry_count(), 1);
        assert_eq!(cache.fingerprint_for("site-a"), cache.fingerprint_for("site-b"));
    }

    #[test]
    fn test_hit_does_not_recompute() {
        let cache: CacheManager<u32> = CacheManager::new();
        cache.get_or_compute::<TestError, _>("k", || Ok(1)).unwrap();
        let again = cache
            .get_or_compute::<TestError, _>("k", || panic!("should not recompute"))
            .unwrap();

        assert_eq!(*again, 1);
        assert_eq!(cache.stats().hits.load(Ordering::Relaxed), 1);
        assert!((cache.stats().hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_failed_compute_is_not_cached() {
        let cache: CacheManager<u32> = CacheManager::new();
        let first = cache.get_or_compute("k", || Err(TestError::Lookup));
        assert!(matches!(first, Err(TestError::Lookup)));
        assert!(cache.lookup("k").unwrap().is_none());

        let second = cache.get_or_compute::<TestError, _>("k", || Ok(7)).unwrap();
        assert_eq!(*second, 7);
        assert_eq!(*cache.lookup("k").unwrap().unwrap(), 7);
    }

    #[test]
    fn test_miss_is_distinct_from_broken_state() {
        let cache: CacheManager<u32> = CacheManager::new();
        assert!(cache.lookup("absent").unwrap().is_none());

        // A committed key pointing at a fingerprint with no entry is corruption
        let dangling = Fingerprint::of(&42u32).unwrap();
        cache.committed.write().insert("broken".to_string(), dangling);

        assert!(matches!(cache.lookup("broken"), Err(CacheError::Internal { .. })));
        let result = cache.get_or_compute::<TestError, _>("broken", || Ok(1));
        assert!(matches!(result, Err(TestError::Cache(CacheError::Internal { .. }))));
    }

    #[test]
    fn test_lookup_sees_committed_entry_during_concurrent_hits() {
        let cache: Arc<CacheManager<Vec<String>>> = Arc::new(CacheManager::new());
        cache
            .get_or_compute::<TestError, _>("site-a", || Ok(vec!["Text".to_string()]))
            .unwrap();

        let reader = {
            let cache = cache.clone();
            thread::spawn(move || {
                for _ in 0..20_000 {
                    cache
                        .get_or_compute::<TestError, _>("site-a", || panic!("should not recompute"))
                        .unwrap();
                }
            })
        };

        for _ in 0..20_000 {
            assert!(cache.lookup("site-a").unwrap().is_some());
            assert!(cache.fingerprint_for("site-a").is_some());
        }
        reader.join().unwrap();

        assert_eq!(cache.stats().computations.load(Ordering::Relaxed), 1);
        assert_eq!(cache.stats().hits.load(Ordering::Relaxed), 20_000);
    }

    #[test]
    fn test_fingerprint_ignores_map_insertion_order() {
        use std::collections::HashMap;
        let mut a = HashMap::new();
        a.insert("x", 1);
        a.insert("y", 2);
        let mut b = HashMap::new();
        b.insert("y", 2);
        b.insert("x", 1);

        assert_eq!(Fingerprint::of(&a).unwrap(), Fingerprint::of(&b).unwrap());
        assert_ne!(Fingerprint::of(&1u8).unwrap(), Fingerprint::of(&2u8).unwrap());
    }
}
