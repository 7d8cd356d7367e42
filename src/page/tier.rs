//! Hot/warm/cold page tiering.
//!
//! Warm pages live in the hot store; cold pages live only in the
//! remote object store. Access counting drives threshold promotion,
//! and promotion never loses data: bytes are copied hot-ward before
//! any delete, and the cold copy is retained as backup.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use dashmap::DashSet;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::config::TierConfig;
use crate::store::{HotStore, ObjectMeta, RemoteStore};
use crate::vfs::Tier;

use super::{meta_key, now_ms, page_key, PageError, PageMeta, PageResult};

/// Promotion latencies averaged over this many samples.
const LATENCY_WINDOW: usize = 100;

/// Remote-store key of a page's cold copy.
pub fn remote_key(blob_id: &str, index: usize) -> String {
    format!("pages/{blob_id}/{index}")
}

/// Counter snapshot for observability.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub total_promotion_attempts: u64,
    pub successful_promotions: u64,
    pub failed_promotions: u64,
    pub blocked_by_capacity: u64,
    pub evicted_for_promotion: u64,
    pub avg_promotion_latency_ms: f64,
}

/// Result of an explicit promotion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionOutcome {
    pub promoted: bool,
    /// Page evicted to make room, when capacity was reclaimed.
    pub evicted: Option<String>,
    /// True when the request was refused for lack of capacity.
    pub blocked: bool,
}

impl PromotionOutcome {
    fn noop() -> Self {
        Self { promoted: false, evicted: None, blocked: false }
    }

    fn blocked() -> Self {
        Self { promoted: false, evicted: None, blocked: true }
    }
}

/// Tier manager over a hot store and a remote object store.
pub struct TierManager {
    hot: Arc<dyn HotStore>,
    remote: Arc<dyn RemoteStore>,
    config: TierConfig,
    /// Pages with a promotion in flight; re-entrants no-op.
    promoting: DashSet<String>,
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    blocked: AtomicU64,
    evictions: AtomicU64,
    latencies: Mutex<VecDeque<f64>>,
}

impl TierManager {
    pub fn new(hot: Arc<dyn HotStore>, remote: Arc<dyn RemoteStore>, config: TierConfig) -> Self {
        Self {
            hot,
            remote,
            config,
            promoting: DashSet::new(),
            attempts: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            latencies: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW)),
        }
    }

    /// Read a page's metadata record.
    pub async fn get_page_meta(&self, page_id: &str) -> PageResult<Option<PageMeta>> {
        match self.hot.get(&meta_key(page_id)).await? {
            Some(raw) => {
                let meta = serde_json::from_slice(&raw)
                    .map_err(|_| PageError::UnknownPage(page_id.to_string()))?;
                Ok(Some(meta))
            }
            None => Ok(None),
        }
    }

    /// Replace a page's metadata record.
    pub async fn update_page_meta(&self, meta: &PageMeta) -> PageResult<()> {
        let raw = serde_json::to_vec(meta)
            .map_err(|_| PageError::UnknownPage(meta.page_id.clone()))?;
        self.hot.put(&meta_key(&meta.page_id), Bytes::from(raw)).await?;
        Ok(())
    }

    /// Metrics counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        let latencies = self.latencies.lock();
        let avg = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        };
        MetricsSnapshot {
            total_promotion_attempts: self.attempts.load(Ordering::Relaxed),
            successful_promotions: self.successes.load(Ordering::Relaxed),
            failed_promotions: self.failures.load(Ordering::Relaxed),
            blocked_by_capacity: self.blocked.load(Ordering::Relaxed),
            evicted_for_promotion: self.evictions.load(Ordering::Relaxed),
            avg_promotion_latency_ms: avg,
        }
    }

    /// Number of pages currently resident in the warm tier.
    pub async fn warm_page_count(&self) -> PageResult<usize> {
        Ok(self.warm_metas().await?.len())
    }

    async fn warm_metas(&self) -> PageResult<Vec<PageMeta>> {
        let mut warm = Vec::new();
        for key in self.hot.keys("__page_meta__").await? {
            if let Some(raw) = self.hot.get(&key).await? {
                if let Ok(meta) = serde_json::from_slice::<PageMeta>(&raw) {
                    if meta.tier == Tier::Warm {
                        warm.push(meta);
                    }
                }
            }
        }
        Ok(warm)
    }

    /// Read a page, bumping its access statistics. Cold reads that
    /// cross the access threshold trigger a best-effort promotion when
    /// capacity allows; a full hot tier is recorded, never evicted
    /// from here.
    pub async fn access_page(&self, page_id: &str) -> PageResult<Bytes> {
        let mut meta = self
            .get_page_meta(page_id)
            .await?
            .ok_or_else(|| PageError::UnknownPage(page_id.to_string()))?;
        meta.access_count += 1;
        meta.last_access_at = now_ms();
        self.update_page_meta(&meta).await?;

        let data = match meta.tier {
            Tier::Warm => self
                .hot
                .get(&page_key(&meta.blob_id, meta.page_index))
                .await?
                .ok_or_else(|| PageError::MissingPayload(page_id.to_string()))?,
            Tier::Cold => {
                let data = self
                    .remote
                    .get(&remote_key(&meta.blob_id, meta.page_index))
                    .await?
                    .ok_or_else(|| PageError::MissingPayload(page_id.to_string()))?;
                if self.config.enabled && meta.access_count >= self.config.access_threshold {
                    if self.warm_page_count().await? < self.config.max_hot_pages {
                        // Best-effort: a failed promotion must not
                        // invalidate the bytes already read.
                        if let Err(err) = self.promote_page(page_id).await {
                            warn!(page = page_id, %err, "threshold promotion failed");
                        }
                    } else {
                        self.blocked.fetch_add(1, Ordering::Relaxed);
                    }
                }
                data
            }
        };
        Ok(data)
    }

    /// Promote a cold page into the warm tier, evicting the LRU warm
    /// page if the hot tier is full.
    pub async fn promote_page(&self, page_id: &str) -> PageResult<PromotionOutcome> {
        if !self.config.enabled {
            return Ok(PromotionOutcome::noop());
        }
        if !self.promoting.insert(page_id.to_string()) {
            return Ok(PromotionOutcome::noop());
        }
        let outcome = self.promote_locked(page_id).await;
        self.promoting.remove(page_id);
        outcome
    }

    async fn promote_locked(&self, page_id: &str) -> PageResult<PromotionOutcome> {
        let mut meta = self
            .get_page_meta(page_id)
            .await?
            .ok_or_else(|| PageError::UnknownPage(page_id.to_string()))?;
        if meta.tier == Tier::Warm {
            return Ok(PromotionOutcome::noop());
        }

        self.attempts.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let mut evicted = None;
        if self.warm_page_count().await? >= self.config.max_hot_pages {
            match self.select_lru_warm().await? {
                Some(victim) => {
                    self.evict(&victim).await?;
                    evicted = Some(victim.page_id);
                }
                None => {
                    self.blocked.fetch_add(1, Ordering::Relaxed);
                    return Ok(PromotionOutcome::blocked());
                }
            }
        }

        let data = match self.remote.get(&remote_key(&meta.blob_id, meta.page_index)).await? {
            Some(data) => data,
            None => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                return Err(PageError::MissingPayload(page_id.to_string()));
            }
        };

        if let Err(err) = self.hot.put(&page_key(&meta.blob_id, meta.page_index), data).await {
            self.failures.fetch_add(1, Ordering::Relaxed);
            return Err(err.into());
        }

        meta.tier = Tier::Warm;
        if let Err(err) = self.update_page_meta(&meta).await {
            // Metadata-last ordering: roll the hot copy back so the
            // cold copy stays authoritative.
            error!(page = page_id, "promotion metadata flip failed, rolling back");
            let _ = self.hot.delete(&page_key(&meta.blob_id, meta.page_index)).await;
            self.failures.fetch_add(1, Ordering::Relaxed);
            return Err(err);
        }

        // The object-store copy is retained as backup.
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.record_latency(started.elapsed().as_secs_f64() * 1000.0);
        debug!(page = page_id, evicted = evicted.as_deref(), "page promoted");
        Ok(PromotionOutcome { promoted: true, evicted, blocked: false })
    }

    /// Oldest warm page by `last_access_at`, page id as tie-break.
    async fn select_lru_warm(&self) -> PageResult<Option<PageMeta>> {
        let mut warm = self.warm_metas().await?;
        warm.sort_by(|a, b| {
            a.last_access_at
                .cmp(&b.last_access_at)
                .then_with(|| a.page_id.cmp(&b.page_id))
        });
        Ok(warm.into_iter().next())
    }

    /// Copy a warm page to the object store, then drop the hot copy.
    async fn evict(&self, victim: &PageMeta) -> PageResult<()> {
        let key = page_key(&victim.blob_id, victim.page_index);
        let data = self
            .hot
            .get(&key)
            .await?
            .ok_or_else(|| PageError::MissingPayload(victim.page_id.clone()))?;
        let mut metadata = ObjectMeta::new();
        metadata.insert("pageId".to_string(), victim.page_id.clone());
        metadata.insert("blobId".to_string(), victim.blob_id.clone());
        metadata.insert("pageIndex".to_string(), victim.page_index.to_string());
        self.remote.put(&remote_key(&victim.blob_id, victim.page_index), data, metadata).await?;
        self.hot.delete(&key).await?;
        let mut flipped = victim.clone();
        flipped.tier = Tier::Cold;
        self.update_page_meta(&flipped).await?;
        self.evictions.fetch_add(1, Ordering::Relaxed);
        debug!(page = victim.page_id.as_str(), "page evicted");
        Ok(())
    }

    fn record_latency(&self, elapsed_ms: f64) {
        let mut latencies = self.latencies.lock();
        if latencies.len() == LATENCY_WINDOW {
            latencies.pop_front();
        }
        latencies.push_back(elapsed_ms);
    }
}
