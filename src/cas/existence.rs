//! Existence cache: bloom filter plus a TTL-bounded positive cache.

use std::time::Duration;

use parking_lot::Mutex;

use crate::config::CasConfig;

use super::bloom::BloomFilter;

/// Tri-state answer from the cache.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExistenceHint {
    /// Confirmed present within the TTL window.
    Positive,
    /// Bloom rejection: definitely absent.
    Negative,
    /// Storage must be consulted.
    Unknown,
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistenceStats {
    pub bloom_bits_set: usize,
    pub bloom_inserted: usize,
    pub positive_entries: u64,
}

/// Bloom + TTL positive cache over object hashes.
pub struct ExistenceCache {
    bloom: Mutex<BloomFilter>,
    positives: moka::sync::Cache<String, ()>,
}

impl ExistenceCache {
    pub fn new(config: &CasConfig) -> Self {
        Self {
            bloom: Mutex::new(BloomFilter::new(
                config.expected_items,
                config.false_positive_rate,
            )),
            positives: moka::sync::Cache::builder()
                .max_capacity(config.positive_max_entries)
                .time_to_live(Duration::from_secs(config.positive_ttl_secs))
                .build(),
        }
    }

    /// Answer for a hash without touching storage.
    pub fn check(&self, hash: &str) -> ExistenceHint {
        if self.positives.contains_key(hash) {
            return ExistenceHint::Positive;
        }
        if !self.bloom.lock().contains(hash) {
            return ExistenceHint::Negative;
        }
        ExistenceHint::Unknown
    }

    /// Record a storage-confirmed existence answer.
    pub fn record(&self, hash: &str, exists: bool) {
        if exists {
            self.bloom.lock().insert(hash);
            self.positives.insert(hash.to_string(), ());
        } else {
            self.positives.invalidate(hash);
        }
    }

    /// Keep the caches coherent after a successful put.
    pub fn record_put(&self, hash: &str) {
        self.record(hash, true);
    }

    /// Keep the caches coherent after a physical delete.
    ///
    /// Bloom bits cannot be cleared; only the positive cache drops the
    /// entry, so the bloom may keep answering "possibly present".
    pub fn record_delete(&self, hash: &str) {
        self.positives.invalidate(hash);
    }

    pub fn stats(&self) -> ExistenceStats {
        self.positives.run_pending_tasks();
        let bloom = self.bloom.lock();
        ExistenceStats {
            bloom_bits_set: bloom.bits_set(),
            bloom_inserted: bloom.inserted(),
            positive_entries: self.positives.entry_count(),
        }
    }
}
