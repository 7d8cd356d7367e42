#![cfg(test)]

use std::sync::Arc;

use bytes::Bytes;

use crate::config::TierConfig;
use crate::store::{HotStore, MemoryHotStore, MemoryRemoteStore, ObjectMeta, RemoteStore};
use crate::vfs::Tier;

use super::tier::remote_key;
use super::*;

fn pattern_bytes(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_add(seed)).collect()
}

#[tokio::test]
async fn small_blob_packs_into_one_page() {
    let hot = Arc::new(MemoryHotStore::new());
    let store = PageStore::new(hot.clone());

    let data = b"hello pages".to_vec();
    let pages = store.write_blob("blob-a", &data).await.expect("write succeeds");
    assert_eq!(pages, 1);
    assert_eq!(store.cached_size("blob-a"), Some(data.len() as u64));
    assert_eq!(store.read_blob("blob-a").await.unwrap(), Bytes::from(data));
}

#[tokio::test]
async fn large_blob_spans_pages_with_short_tail() {
    let hot = Arc::new(MemoryHotStore::new());
    let store = PageStore::new(hot.clone());

    let len = 2 * PAGE_SIZE + 1234;
    let data = pattern_bytes(len, 3);
    let pages = store.write_blob("blob-b", &data).await.unwrap();
    assert_eq!(pages, 3);

    let first = hot.get(&page_key("blob-b", 0)).await.unwrap().unwrap();
    let tail = hot.get(&page_key("blob-b", 2)).await.unwrap().unwrap();
    assert_eq!(first.len(), PAGE_SIZE);
    assert_eq!(tail.len(), 1234);
    assert_eq!(store.read_blob("blob-b").await.unwrap(), Bytes::from(data));
}

#[tokio::test]
async fn empty_blob_leaves_zero_pages() {
    let hot = Arc::new(MemoryHotStore::new());
    let store = PageStore::new(hot.clone());

    let pages = store.write_blob("empty", b"").await.unwrap();
    assert_eq!(pages, 0);
    assert_eq!(store.cached_size("empty"), Some(0));
    assert_eq!(store.read_blob("empty").await.unwrap(), Bytes::new());
    assert!(hot.keys("__page__empty:").await.unwrap().is_empty());
}

#[tokio::test]
async fn rewrite_drops_stale_pages() {
    let hot = Arc::new(MemoryHotStore::new());
    let store = PageStore::new(hot.clone());

    store.write_blob("shrink", &pattern_bytes(3 * PAGE_SIZE, 1)).await.unwrap();
    store.write_blob("shrink", &pattern_bytes(PAGE_SIZE / 2, 2)).await.unwrap();

    let keys = hot.keys("__page__shrink:").await.unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(store.cached_size("shrink"), Some((PAGE_SIZE / 2) as u64));
}

#[tokio::test]
async fn read_range_loads_only_spanned_pages() {
    let hot = Arc::new(MemoryHotStore::new());
    let store = PageStore::new(hot.clone());

    let data = pattern_bytes(3 * PAGE_SIZE, 9);
    store.write_blob("ranged", &data).await.unwrap();

    // Window fully inside page 1.
    let offset = PAGE_SIZE + 100;
    let window = store.read_range("ranged", offset, 500).await.unwrap();
    assert_eq!(&window[..], &data[offset..offset + 500]);

    // Window straddling the page 0/1 boundary.
    let offset = PAGE_SIZE - 50;
    let window = store.read_range("ranged", offset, 100).await.unwrap();
    assert_eq!(&window[..], &data[offset..offset + 100]);
}

#[tokio::test]
async fn read_past_eof_is_out_of_bounds() {
    let hot = Arc::new(MemoryHotStore::new());
    let store = PageStore::new(hot.clone());
    store.write_blob("short", b"0123456789", ).await.unwrap();

    let err = store.read_range("short", 5, 10).await.expect_err("past EOF");
    assert_eq!(err.to_string(), "range out of bounds");
}

#[tokio::test]
async fn update_range_rewrites_only_touched_pages() {
    let hot = Arc::new(MemoryHotStore::new());
    let store = PageStore::new(hot.clone());

    let mut data = pattern_bytes(2 * PAGE_SIZE + 64, 0);
    store.write_blob("patched", &data).await.unwrap();

    let offset = PAGE_SIZE - 8;
    let patch = [0xAAu8; 16];
    store.update_range("patched", offset, &patch).await.unwrap();
    data[offset..offset + 16].copy_from_slice(&patch);

    assert_eq!(store.read_blob("patched").await.unwrap(), Bytes::from(data));
}

#[tokio::test]
async fn update_past_eof_is_out_of_bounds() {
    let hot = Arc::new(MemoryHotStore::new());
    let store = PageStore::new(hot.clone());
    store.write_blob("fixed", b"abcdef").await.unwrap();

    let err = store.update_range("fixed", 4, b"xyz").await.expect_err("past EOF");
    assert!(matches!(err, PageError::OutOfBounds));
}

#[tokio::test]
async fn size_cache_rebuilds_from_metadata() {
    let hot = Arc::new(MemoryHotStore::new());
    let writer = PageStore::new(hot.clone());
    writer.write_blob("persisted", &pattern_bytes(PAGE_SIZE + 10, 5)).await.unwrap();

    // A fresh store instance has a cold cache and must derive the size.
    let reader = PageStore::new(hot.clone());
    assert_eq!(reader.cached_size("persisted"), None);
    assert_eq!(reader.blob_size("persisted").await.unwrap(), (PAGE_SIZE + 10) as u64);
    assert_eq!(reader.cached_size("persisted"), Some((PAGE_SIZE + 10) as u64));
}

// --- tiering -----------------------------------------------------------

struct TierFixture {
    hot: Arc<MemoryHotStore>,
    remote: Arc<MemoryRemoteStore>,
    manager: TierManager,
}

impl TierFixture {
    fn new(config: TierConfig) -> Self {
        let hot = Arc::new(MemoryHotStore::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let manager = TierManager::new(hot.clone(), remote.clone(), config);
        Self { hot, remote, manager }
    }

    async fn seed_cold(&self, blob: &str, index: usize, data: &[u8], last_access: i64) {
        let id = page_id(blob, index);
        let meta = PageMeta {
            page_id: id.clone(),
            blob_id: blob.to_string(),
            page_index: index,
            size: data.len(),
            tier: Tier::Cold,
            last_access_at: last_access,
            access_count: 0,
            created_at: last_access,
        };
        self.manager.update_page_meta(&meta).await.unwrap();
        self.remote
            .put(&remote_key(blob, index), Bytes::copy_from_slice(data), ObjectMeta::new())
            .await
            .unwrap();
    }

    async fn seed_warm(&self, blob: &str, index: usize, data: &[u8], last_access: i64) {
        let id = page_id(blob, index);
        let meta = PageMeta {
            page_id: id.clone(),
            blob_id: blob.to_string(),
            page_index: index,
            size: data.len(),
            tier: Tier::Warm,
            last_access_at: last_access,
            access_count: 1,
            created_at: last_access,
        };
        self.manager.update_page_meta(&meta).await.unwrap();
        self.hot.put(&page_key(blob, index), Bytes::copy_from_slice(data)).await.unwrap();
    }

    async fn tier_of(&self, page: &str) -> Tier {
        self.manager.get_page_meta(page).await.unwrap().expect("meta exists").tier
    }
}

#[tokio::test]
async fn access_counts_and_timestamps_advance() {
    let fixture = TierFixture::new(TierConfig::default());
    fixture.seed_warm("b", 0, b"warm bytes", 1000).await;

    let data = fixture.manager.access_page("b:0").await.unwrap();
    assert_eq!(data, Bytes::from_static(b"warm bytes"));
    let meta = fixture.manager.get_page_meta("b:0").await.unwrap().unwrap();
    assert_eq!(meta.access_count, 2);
    assert!(meta.last_access_at > 1000);
}

#[tokio::test]
async fn threshold_crossing_promotes_all_pages() {
    let config = TierConfig { enabled: true, access_threshold: 3, max_hot_pages: 256 };
    let fixture = TierFixture::new(config);
    for index in 0..4 {
        fixture.seed_cold("blob", index, format!("page-{index}").as_bytes(), 100).await;
    }

    for index in 0..4 {
        let id = page_id("blob", index);
        for _ in 0..3 {
            let data = fixture.manager.access_page(&id).await.unwrap();
            assert_eq!(data, Bytes::from(format!("page-{index}")));
        }
    }

    for index in 0..4 {
        assert_eq!(fixture.tier_of(&page_id("blob", index)).await, Tier::Warm);
    }
    let metrics = fixture.manager.metrics();
    assert_eq!(metrics.successful_promotions, 4);
    assert_eq!(metrics.failed_promotions, 0);
    assert!(metrics.avg_promotion_latency_ms >= 0.0);
}

#[tokio::test]
async fn full_hot_tier_blocks_implicit_promotion() {
    let config = TierConfig { enabled: true, access_threshold: 3, max_hot_pages: 3 };
    let fixture = TierFixture::new(config);
    fixture.seed_warm("w", 0, b"w0", 10).await;
    fixture.seed_warm("w", 1, b"w1", 20).await;
    fixture.seed_warm("w", 2, b"w2", 30).await;
    fixture.seed_cold("c", 0, b"cold page", 5).await;

    for _ in 0..3 {
        let data = fixture.manager.access_page("c:0").await.unwrap();
        assert_eq!(data, Bytes::from_static(b"cold page"));
    }

    assert_eq!(fixture.tier_of("c:0").await, Tier::Cold);
    let metrics = fixture.manager.metrics();
    assert!(metrics.blocked_by_capacity >= 1);
    assert_eq!(metrics.successful_promotions, 0);

    // An explicit promotion evicts the LRU warm page (w:0) instead.
    let outcome = fixture.manager.promote_page("c:0").await.unwrap();
    assert!(outcome.promoted);
    assert_eq!(outcome.evicted.as_deref(), Some("w:0"));
    assert_eq!(fixture.tier_of("c:0").await, Tier::Warm);
    assert_eq!(fixture.tier_of("w:0").await, Tier::Cold);
    // The evicted page's bytes moved to the object store.
    assert_eq!(
        fixture.remote.get(&remote_key("w", 0)).await.unwrap().unwrap(),
        Bytes::from_static(b"w0")
    );
    assert!(fixture.hot.get(&page_key("w", 0)).await.unwrap().is_none());
    assert_eq!(fixture.manager.metrics().evicted_for_promotion, 1);
}

#[tokio::test]
async fn promotion_keeps_cold_copy_as_backup() {
    let config = TierConfig { enabled: true, access_threshold: 1, max_hot_pages: 16 };
    let fixture = TierFixture::new(config);
    fixture.seed_cold("backup", 0, b"survives", 50).await;

    let outcome = fixture.manager.promote_page("backup:0").await.unwrap();
    assert!(outcome.promoted);
    let hot_copy = fixture.hot.get(&page_key("backup", 0)).await.unwrap().unwrap();
    let cold_copy = fixture.remote.get(&remote_key("backup", 0)).await.unwrap().unwrap();
    assert_eq!(hot_copy, cold_copy);
    assert_eq!(fixture.tier_of("backup:0").await, Tier::Warm);
}

#[tokio::test]
async fn promoting_warm_page_is_a_noop() {
    let fixture = TierFixture::new(TierConfig::default());
    fixture.seed_warm("nw", 0, b"already warm", 10).await;

    let outcome = fixture.manager.promote_page("nw:0").await.unwrap();
    assert!(!outcome.promoted);
    assert!(!outcome.blocked);
    assert_eq!(fixture.manager.metrics().total_promotion_attempts, 0);
}

#[tokio::test]
async fn missing_remote_payload_fails_promotion() {
    let fixture = TierFixture::new(TierConfig::default());
    let meta = PageMeta {
        page_id: "lost:0".to_string(),
        blob_id: "lost".to_string(),
        page_index: 0,
        size: 4,
        tier: Tier::Cold,
        last_access_at: 1,
        access_count: 0,
        created_at: 1,
    };
    fixture.manager.update_page_meta(&meta).await.unwrap();

    let err = fixture.manager.promote_page("lost:0").await.expect_err("payload missing");
    assert!(matches!(err, PageError::MissingPayload(_)));
    assert_eq!(fixture.manager.metrics().failed_promotions, 1);
}

#[tokio::test]
async fn disabled_manager_reads_without_promoting() {
    let config = TierConfig { enabled: false, access_threshold: 1, max_hot_pages: 16 };
    let fixture = TierFixture::new(config);
    fixture.seed_cold("off", 0, b"still cold", 10).await;

    for _ in 0..5 {
        fixture.manager.access_page("off:0").await.unwrap();
    }
    assert_eq!(fixture.tier_of("off:0").await, Tier::Cold);

    let outcome = fixture.manager.promote_page("off:0").await.unwrap();
    assert!(!outcome.promoted);
    assert_eq!(fixture.manager.metrics().successful_promotions, 0);
}

#[tokio::test]
async fn unknown_page_access_fails() {
    let fixture = TierFixture::new(TierConfig::default());
    let err = fixture.manager.access_page("ghost:0").await.expect_err("no meta");
    assert!(matches!(err, PageError::UnknownPage(_)));
}
