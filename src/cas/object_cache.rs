//! LRU cache of decompressed objects, bounded by entry and byte counts.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;

use super::ObjectType;

/// Cache metrics snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectCacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_ratio: f64,
    pub entry_count: usize,
    pub max_entries: usize,
    pub max_bytes: usize,
}

struct Inner {
    entries: LruCache<String, (ObjectType, Bytes)>,
    bytes: usize,
}

/// Decompressed-object LRU keyed by hash.
pub struct ObjectCache {
    inner: Mutex<Inner>,
    max_entries: usize,
    max_bytes: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ObjectCache {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner { entries: LruCache::unbounded(), bytes: 0 }),
            max_entries: max_entries.max(1),
            max_bytes,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Cached object, counting the probe as hit or miss.
    pub fn get(&self, hash: &str) -> Option<(ObjectType, Bytes)> {
        let mut inner = self.inner.lock();
        match inner.entries.get(hash) {
            Some(found) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(found.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert an object, evicting LRU entries past either bound.
    /// Objects larger than the byte budget are not cached at all.
    pub fn insert(&self, hash: &str, object_type: ObjectType, bytes: Bytes) {
        if bytes.len() > self.max_bytes {
            return;
        }
        let mut inner = self.inner.lock();
        if let Some((_, old)) = inner.entries.pop_entry(hash) {
            inner.bytes -= old.1.len();
        }
        inner.bytes += bytes.len();
        inner.entries.push(hash.to_string(), (object_type, bytes));
        while inner.entries.len() > self.max_entries || inner.bytes > self.max_bytes {
            match inner.entries.pop_lru() {
                Some((_, evicted)) => {
                    inner.bytes -= evicted.1.len();
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }
    }

    /// Drop a cached object, if present.
    pub fn invalidate(&self, hash: &str) {
        let mut inner = self.inner.lock();
        if let Some((_, old)) = inner.entries.pop_entry(hash) {
            inner.bytes -= old.1.len();
        }
    }

    pub fn metrics(&self) -> ObjectCacheMetrics {
        let inner = self.inner.lock();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let probes = hits + misses;
        ObjectCacheMetrics {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_ratio: if probes == 0 { 0.0 } else { hits as f64 / probes as f64 },
            entry_count: inner.entries.len(),
            max_entries: self.max_entries,
            max_bytes: self.max_bytes,
        }
    }
}
