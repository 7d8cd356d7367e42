//! Fixed-size page packing over the hot store.
//!
//! A blob of length `L` packs into `ceil(L / PAGE_SIZE)` pages; every
//! page is `PAGE_SIZE` bytes except the last. Range reads load only the
//! pages spanning the requested window; range updates rewrite only the
//! touched pages. A cached size map avoids recomputing blob sizes.

pub mod tier;

#[cfg(test)]
mod tests;

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errno::FsError;
use crate::store::HotStore;
use crate::vfs::Tier;

pub use tier::{MetricsSnapshot, PromotionOutcome, TierManager};

/// Page payload size: 2 MiB.
pub const PAGE_SIZE: usize = 2 * 1024 * 1024;

/// Hot-store key of a page's data.
pub fn page_key(blob_id: &str, index: usize) -> String {
    format!("__page__{blob_id}:{index}")
}

/// Hot-store key of a page's metadata record.
pub fn meta_key(page_id: &str) -> String {
    format!("__page_meta__{page_id}")
}

/// Canonical page identifier.
pub fn page_id(blob_id: &str, index: usize) -> String {
    format!("{blob_id}:{index}")
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

/// Metadata record stored beside every page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    pub page_id: String,
    pub blob_id: String,
    pub page_index: usize,
    pub size: usize,
    pub tier: Tier,
    pub last_access_at: i64,
    pub access_count: u64,
    pub created_at: i64,
}

/// Page-layer failure.
#[derive(Debug)]
pub enum PageError {
    /// A read or update reached past the end of the blob.
    OutOfBounds,
    /// No metadata exists for the page.
    UnknownPage(String),
    /// A page's payload is missing from the store that should hold it.
    MissingPayload(String),
    /// Underlying store failure.
    Store(FsError),
}

impl fmt::Display for PageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageError::OutOfBounds => write!(f, "range out of bounds"),
            PageError::UnknownPage(page_id) => write!(f, "unknown page '{page_id}'"),
            PageError::MissingPayload(page_id) => {
                write!(f, "missing payload for page '{page_id}'")
            }
            PageError::Store(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for PageError {}

impl From<FsError> for PageError {
    fn from(err: FsError) -> Self {
        PageError::Store(err)
    }
}

pub type PageResult<T> = Result<T, PageError>;

/// Page-packing store over a hot store.
pub struct PageStore {
    hot: Arc<dyn HotStore>,
    sizes: DashMap<String, u64>,
}

impl PageStore {
    pub fn new(hot: Arc<dyn HotStore>) -> Self {
        Self { hot, sizes: DashMap::new() }
    }

    /// Cached total size of a blob, if known.
    pub fn cached_size(&self, blob_id: &str) -> Option<u64> {
        self.sizes.get(blob_id).map(|size| *size)
    }

    /// Number of pages a blob of `len` bytes packs into.
    pub fn page_count_for(len: usize) -> usize {
        len.div_ceil(PAGE_SIZE)
    }

    /// Number of pages currently stored for a blob.
    pub async fn page_count(&self, blob_id: &str) -> PageResult<usize> {
        Ok(self.page_indexes(blob_id).await?.len())
    }

    /// Write a blob as a full set of pages, replacing any previous set.
    pub async fn write_blob(&self, blob_id: &str, data: &[u8]) -> PageResult<usize> {
        let pages = Self::page_count_for(data.len());
        debug!(blob = blob_id, bytes = data.len(), pages, "write pages");

        // Drop pages from any longer previous incarnation.
        let stale_prefix = format!("__page__{blob_id}:");
        for key in self.hot.keys(&stale_prefix).await? {
            let index: Option<usize> = key[stale_prefix.len()..].parse().ok();
            if let Some(index) = index {
                if index >= pages {
                    self.hot.delete(&key).await?;
                    self.hot.delete(&meta_key(&page_id(blob_id, index))).await?;
                }
            }
        }

        let now = now_ms();
        for index in 0..pages {
            let start = index * PAGE_SIZE;
            let end = (start + PAGE_SIZE).min(data.len());
            let chunk = Bytes::copy_from_slice(&data[start..end]);
            let id = page_id(blob_id, index);
            let meta = PageMeta {
                page_id: id.clone(),
                blob_id: blob_id.to_string(),
                page_index: index,
                size: chunk.len(),
                tier: Tier::Warm,
                last_access_at: now,
                access_count: 0,
                created_at: now,
            };
            self.hot.put(&page_key(blob_id, index), chunk).await?;
            self.put_meta(&meta).await?;
        }
        self.sizes.insert(blob_id.to_string(), data.len() as u64);
        Ok(pages)
    }

    /// Read a whole blob, repopulating the size cache.
    pub async fn read_blob(&self, blob_id: &str) -> PageResult<Bytes> {
        let pages = self.page_indexes(blob_id).await?;
        if pages.is_empty() {
            if self.cached_size(blob_id) == Some(0) {
                return Ok(Bytes::new());
            }
            return Err(PageError::UnknownPage(page_id(blob_id, 0)));
        }
        let mut out = Vec::new();
        for index in pages {
            let key = page_key(blob_id, index);
            let chunk = self
                .hot
                .get(&key)
                .await?
                .ok_or_else(|| PageError::MissingPayload(page_id(blob_id, index)))?;
            out.extend_from_slice(&chunk);
        }
        self.sizes.insert(blob_id.to_string(), out.len() as u64);
        Ok(Bytes::from(out))
    }

    /// Read `len` bytes at `offset`, touching only the spanned pages.
    pub async fn read_range(&self, blob_id: &str, offset: usize, len: usize) -> PageResult<Bytes> {
        let total = self.blob_size(blob_id).await?;
        if offset + len > total as usize {
            return Err(PageError::OutOfBounds);
        }
        if len == 0 {
            return Ok(Bytes::new());
        }
        let first = offset / PAGE_SIZE;
        let last = (offset + len - 1) / PAGE_SIZE;
        let mut window = Vec::with_capacity(len);
        for index in first..=last {
            let key = page_key(blob_id, index);
            let chunk = self
                .hot
                .get(&key)
                .await?
                .ok_or_else(|| PageError::MissingPayload(page_id(blob_id, index)))?;
            window.extend_from_slice(&chunk);
        }
        let start = offset - first * PAGE_SIZE;
        Ok(Bytes::copy_from_slice(&window[start..start + len]))
    }

    /// Overwrite `data.len()` bytes at `offset`, rewriting only the
    /// affected pages.
    pub async fn update_range(&self, blob_id: &str, offset: usize, data: &[u8]) -> PageResult<()> {
        let total = self.blob_size(blob_id).await? as usize;
        if offset + data.len() > total {
            return Err(PageError::OutOfBounds);
        }
        if data.is_empty() {
            return Ok(());
        }
        let first = offset / PAGE_SIZE;
        let last = (offset + data.len() - 1) / PAGE_SIZE;
        let mut window = Vec::new();
        for index in first..=last {
            let key = page_key(blob_id, index);
            let chunk = self
                .hot
                .get(&key)
                .await?
                .ok_or_else(|| PageError::MissingPayload(page_id(blob_id, index)))?;
            window.extend_from_slice(&chunk);
        }
        let start = offset - first * PAGE_SIZE;
        window[start..start + data.len()].copy_from_slice(data);
        for index in first..=last {
            let lo = (index - first) * PAGE_SIZE;
            let hi = (lo + PAGE_SIZE).min(window.len());
            self.hot.put(&page_key(blob_id, index), Bytes::copy_from_slice(&window[lo..hi])).await?;
        }
        Ok(())
    }

    /// Total blob size, from the cache or the metadata records.
    pub async fn blob_size(&self, blob_id: &str) -> PageResult<u64> {
        if let Some(size) = self.cached_size(blob_id) {
            return Ok(size);
        }
        let mut total = 0u64;
        let mut any = false;
        for index in self.page_indexes(blob_id).await? {
            any = true;
            let raw = self
                .hot
                .get(&meta_key(&page_id(blob_id, index)))
                .await?
                .ok_or_else(|| PageError::UnknownPage(page_id(blob_id, index)))?;
            let meta: PageMeta = serde_json::from_slice(&raw)
                .map_err(|_| PageError::UnknownPage(page_id(blob_id, index)))?;
            total += meta.size as u64;
        }
        if !any {
            return Err(PageError::UnknownPage(page_id(blob_id, 0)));
        }
        self.sizes.insert(blob_id.to_string(), total);
        Ok(total)
    }

    /// Sorted page indexes currently present for a blob.
    async fn page_indexes(&self, blob_id: &str) -> PageResult<Vec<usize>> {
        let prefix = format!("__page__{blob_id}:");
        let mut indexes: Vec<usize> = self
            .hot
            .keys(&prefix)
            .await?
            .into_iter()
            .filter_map(|key| key[prefix.len()..].parse().ok())
            .collect();
        indexes.sort_unstable();
        Ok(indexes)
    }

    async fn put_meta(&self, meta: &PageMeta) -> PageResult<()> {
        let raw = serde_json::to_vec(meta)
            .map_err(|_| PageError::UnknownPage(meta.page_id.clone()))?;
        self.hot.put(&meta_key(&meta.page_id), Bytes::from(raw)).await?;
        Ok(())
    }
}
