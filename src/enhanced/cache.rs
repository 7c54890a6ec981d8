//! Caching Layer
//!
//! Time- and size-bounded result cache owned by one enhanced producer.
//!
//! The store is either a plain map (no capacity limit) or an [`LruCache`]
//! (capacity > 0). A lookup is a hit only while the entry is younger than the
//! TTL. Expired entries are also dropped by an amortized sweep: at most one
//! sweep timer is pending per layer, so a burst of calls costs one sweep.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_call_enhancer::enhanced::CacheLayer;
//! # #[tokio::main]
//! # async fn main() {
//! let cache = Arc::new(CacheLayer::<String>::new(Some(Duration::from_secs(60)), Some(1000)));
//!
//! cache.schedule_sweep();
//! if let Some(result) = cache.lookup("key") {
//!     println!("{result}");
//! }
//! cache.write("key", "value".to_string());
//! # }
//! ```

use super::lru::LruCache;
use crate::metrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// A cached producer result and the instant it was written.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    /// When the value was written.
    pub timestamp: Instant,
    /// The cached value.
    pub data: T,
}

enum CacheStore<T> {
    Unbounded(HashMap<String, CacheEntry<T>>),
    Bounded(LruCache<CacheEntry<T>>),
}

impl<T> CacheStore<T> {
    fn get(&mut self, key: &str) -> Option<&CacheEntry<T>> {
        match self {
            CacheStore::Unbounded(map) => map.get(key),
            CacheStore::Bounded(lru) => lru.get(key),
        }
    }

    fn insert(&mut self, key: String, entry: CacheEntry<T>) {
        match self {
            CacheStore::Unbounded(map) => {
                map.insert(key, entry);
            }
            CacheStore::Bounded(lru) => {
                if let Some((evicted, _)) = lru.insert(key, entry) {
                    debug!(key = %evicted, "evicted least recently used entry");
                }
            }
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        match self {
            CacheStore::Unbounded(map) => map.remove(key).is_some(),
            CacheStore::Bounded(lru) => lru.remove(key).is_some(),
        }
    }

    fn retain(&mut self, mut keep: impl FnMut(&CacheEntry<T>) -> bool) -> usize {
        match self {
            CacheStore::Unbounded(map) => {
                let before = map.len();
                map.retain(|_, entry| keep(entry));
                before - map.len()
            }
            CacheStore::Bounded(lru) => lru.retain(|_, entry| keep(entry)),
        }
    }

    fn clear(&mut self) {
        match self {
            CacheStore::Unbounded(map) => map.clear(),
            CacheStore::Bounded(lru) => lru.clear(),
        }
    }

    fn len(&self) -> usize {
        match self {
            CacheStore::Unbounded(map) => map.len(),
            CacheStore::Bounded(lru) => lru.len(),
        }
    }

    fn capacity(&self) -> Option<usize> {
        match self {
            CacheStore::Unbounded(_) => None,
            CacheStore::Bounded(lru) => Some(lru.capacity()),
        }
    }
}

/// Cache layer with freshness checks and amortized expiry sweeping.
pub struct CacheLayer<T> {
    store: Mutex<CacheStore<T>>,
    ttl: Option<Duration>,
    sweep_pending: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T: Clone> CacheLayer<T> {
    /// Create a cache layer.
    ///
    /// - `ttl`: freshness window, `None` keeps entries until evicted or cleared
    /// - `capacity`: LRU bound, `None` or `Some(0)` means unbounded
    pub fn new(ttl: Option<Duration>, capacity: Option<usize>) -> Self {
        let store = match capacity {
            Some(capacity) if capacity > 0 => CacheStore::Bounded(LruCache::new(capacity)),
            _ => CacheStore::Unbounded(HashMap::new()),
        };
        Self {
            store: Mutex::new(store),
            ttl,
            sweep_pending: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Return the cached value for `key` if present and fresh.
    ///
    /// A present but expired entry counts as a miss and is dropped.
    pub fn lookup(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        let mut store = self.store.lock();

        let state = store
            .get(key)
            .map(|entry| self.is_fresh(entry, now).then(|| entry.data.clone()));
        let fresh = match state {
            Some(Some(data)) => Some(data),
            Some(None) => {
                store.remove(key);
                debug!(key = key, "cache entry expired");
                None
            }
            None => None,
        };
        drop(store);

        match fresh {
            Some(data) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::inc_cache_lookup("hit");
                debug!(key = key, "cache hit");
                Some(data)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::inc_cache_lookup("miss");
                debug!(key = key, "cache miss");
                None
            }
        }
    }

    /// Store `data` under `key` with the current time.
    pub fn write(&self, key: &str, data: T) {
        let entry = CacheEntry {
            timestamp: Instant::now(),
            data,
        };
        self.store.lock().insert(key.to_string(), entry);
        debug!(key = key, "cached");
    }

    /// Remove the entry for `key`. Returns whether one existed.
    pub fn remove(&self, key: &str) -> bool {
        let removed = self.store.lock().remove(key);
        debug!(key = key, removed = removed, "cache entry cleared");
        removed
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.store.lock().clear();
        debug!("cache cleared");
    }

    /// Drop every expired entry now. Returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        if self.ttl.is_none() {
            return 0;
        }
        let now = Instant::now();
        let removed = self.store.lock().retain(|entry| self.is_fresh(entry, now));
        if removed > 0 {
            debug!(removed = removed, "swept expired cache entries");
        }
        removed
    }

    /// Number of stored entries, fresh or not yet swept.
    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let store = self.store.lock();
        CacheStats {
            entries: store.len(),
            capacity: store.capacity(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn is_fresh(&self, entry: &CacheEntry<T>, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.saturating_duration_since(entry.timestamp) < ttl,
            None => true,
        }
    }
}

impl<T: Clone + Send + 'static> CacheLayer<T> {
    /// Arrange for expired entries to be swept one TTL from now.
    ///
    /// No-op without a TTL or while a sweep is already pending. Must be
    /// called from within a Tokio runtime. The pending sweep does not keep
    /// the layer alive.
    pub fn schedule_sweep(self: &Arc<Self>) {
        let Some(ttl) = self.ttl else {
            return;
        };
        if self.sweep_pending.swap(true, Ordering::AcqRel) {
            return;
        }

        let layer = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Some(layer) = layer.upgrade() {
                layer.sweep_pending.store(false, Ordering::Release);
                layer.sweep_expired();
            }
        });
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    /// Number of entries currently held in the store.
    pub entries: usize,
    /// LRU bound, `None` when unbounded.
    pub capacity: Option<usize>,
    /// Fresh lookups served from the cache.
    pub hits: u64,
    /// Lookups that found nothing fresh.
    pub misses: u64,
}

impl CacheStats {
    /// Hit rate as a percentage (0.0 to 100.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}
