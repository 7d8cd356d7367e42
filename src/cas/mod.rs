//! Content-addressable store with refcounting and deduplication.
//!
//! Objects are immutable `(type, bytes)` pairs keyed by the hash of
//! `"<type> <length>\0"` followed by the bytes. The stored payload is
//! that framed form, zlib-compressed, at
//! `<base>/<hash[..prefix]>/<hash[prefix..]>`. A decimal refcount
//! sidecar rides next to each object; physical removal happens only on
//! the transition to zero.

pub mod bloom;
pub mod existence;
pub mod object_cache;


use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

use bytes::Bytes;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use futures::stream::{self, StreamExt};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::{CasConfig, HashAlgorithm};
use crate::errno::FsError;
use crate::store::HotStore;

pub use existence::{ExistenceCache, ExistenceHint, ExistenceStats};
pub use object_cache::{ObjectCache, ObjectCacheMetrics};

/// Object types the store accepts.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Blob,
    Tree,
    Commit,
    Tag,
}

impl ObjectType {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectType::Blob => "blob",
            ObjectType::Tree => "tree",
            ObjectType::Commit => "commit",
            ObjectType::Tag => "tag",
        }
    }

    /// Parse a type label; unknown labels are invalid input.
    pub fn parse(label: &str) -> CasResult<Self> {
        match label {
            "blob" => Ok(ObjectType::Blob),
            "tree" => Ok(ObjectType::Tree),
            "commit" => Ok(ObjectType::Commit),
            "tag" => Ok(ObjectType::Tag),
            other => Err(CasError::InvalidType(other.to_string())),
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CAS failure.
#[derive(Debug)]
pub enum CasError {
    InvalidHash(String),
    InvalidType(String),
    /// Stored payload failed decompression or header validation.
    Corrupt(String),
    Store(FsError),
}

impl fmt::Display for CasError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CasError::InvalidHash(hash) => write!(f, "invalid hash: '{hash}'"),
            CasError::InvalidType(label) => write!(f, "invalid object type: '{label}'"),
            CasError::Corrupt(hash) => write!(f, "corrupt object '{hash}'"),
            CasError::Store(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for CasError {}

impl From<FsError> for CasError {
    fn from(err: FsError) -> Self {
        CasError::Store(err)
    }
}

pub type CasResult<T> = Result<T, CasError>;

/// Validate a 40- or 64-digit hex hash and lowercase it.
pub fn validate_hash(hash: &str) -> CasResult<String> {
    let valid = (hash.len() == 40 || hash.len() == 64)
        && hash.chars().all(|c| c.is_ascii_hexdigit());
    if !valid {
        return Err(CasError::InvalidHash(hash.to_string()));
    }
    Ok(hash.to_ascii_lowercase())
}

/// Storage path for a hash: `<base>/<hash[..P]>/<hash[P..]>`.
pub fn hash_to_path(hash: &str, config: &CasConfig) -> CasResult<String> {
    let hash = validate_hash(hash)?;
    let split = config.prefix_len.clamp(1, 8);
    Ok(format!("{}/{}/{}", config.base, &hash[..split], &hash[split..]))
}

/// Recover the lowercase hash from a storage path.
pub fn path_to_hash(path: &str, config: &CasConfig) -> CasResult<String> {
    let relative = path
        .strip_prefix(&config.base)
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or_else(|| CasError::InvalidHash(path.to_string()))?;
    validate_hash(&relative.replace('/', ""))
}

fn frame(object_type: ObjectType, bytes: &[u8]) -> Vec<u8> {
    let mut framed = format!("{} {}\0", object_type.as_str(), bytes.len()).into_bytes();
    framed.extend_from_slice(bytes);
    framed
}

fn digest_hex(algorithm: HashAlgorithm, payload: &[u8]) -> String {
    match algorithm {
        HashAlgorithm::Sha1 => {
            let mut hasher = Sha1::new();
            hasher.update(payload);
            hex::encode(hasher.finalize())
        }
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(payload);
            hex::encode(hasher.finalize())
        }
    }
}

fn compress(payload: &[u8]) -> CasResult<Bytes> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(payload)
        .and_then(|_| encoder.finish())
        .map(Bytes::from)
        .map_err(|_| CasError::Corrupt("compression failed".to_string()))
}

fn decompress(payload: &[u8], hash: &str) -> CasResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(payload);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|_| CasError::Corrupt(hash.to_string()))?;
    Ok(out)
}

fn parse_frame(raw: &[u8], hash: &str) -> CasResult<(ObjectType, Bytes)> {
    let null_at = raw
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| CasError::Corrupt(hash.to_string()))?;
    let header = std::str::from_utf8(&raw[..null_at])
        .map_err(|_| CasError::Corrupt(hash.to_string()))?;
    let (label, len_text) = header
        .split_once(' ')
        .ok_or_else(|| CasError::Corrupt(hash.to_string()))?;
    let object_type = ObjectType::parse(label)?;
    let declared: usize =
        len_text.parse().map_err(|_| CasError::Corrupt(hash.to_string()))?;
    let body = &raw[null_at + 1..];
    if declared != body.len() {
        return Err(CasError::Corrupt(hash.to_string()));
    }
    Ok((object_type, Bytes::copy_from_slice(body)))
}

/// Input to [`Cas::put_batch`].
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub bytes: Bytes,
    pub object_type: ObjectType,
}

/// Per-item batch outcome, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub index: usize,
    pub hash: String,
    /// False on a dedup hit.
    pub written: bool,
}

/// Progress callback: `(completed, total)`.
pub type BatchProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Options for [`Cas::put_batch`].
#[derive(Clone, Default)]
pub struct BatchOptions {
    /// `0` and `1` both mean sequential.
    pub concurrency: usize,
    pub on_progress: Option<BatchProgressFn>,
}

/// Activity counters for one store instance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CasStats {
    pub puts: u64,
    pub dedup_hits: u64,
    pub deletes: u64,
}

/// The content-addressable store.
pub struct Cas {
    store: Arc<dyn HotStore>,
    config: CasConfig,
    existence: ExistenceCache,
    objects: Option<ObjectCache>,
    /// Serialises refcount read-modify-write cycles.
    refcount_lock: tokio::sync::Mutex<()>,
    stats: parking_lot::Mutex<CasStats>,
}

impl Cas {
    pub fn new(store: Arc<dyn HotStore>, config: CasConfig) -> CasResult<Self> {
        config.validate().map_err(CasError::Store)?;
        let objects = if config.object_cache {
            Some(ObjectCache::new(
                config.object_cache_max_entries,
                config.object_cache_max_bytes,
            ))
        } else {
            None
        };
        let existence = ExistenceCache::new(&config);
        Ok(Self {
            store,
            config,
            existence,
            objects,
            refcount_lock: tokio::sync::Mutex::new(()),
            stats: parking_lot::Mutex::new(CasStats::default()),
        })
    }

    fn ref_key(path: &str) -> String {
        format!("{path}.ref")
    }

    /// Hash the framed form of `(bytes, type)` without storing it.
    pub fn hash_object(&self, bytes: &[u8], object_type: ObjectType) -> String {
        digest_hex(self.config.algorithm, &frame(object_type, bytes))
    }

    /// Store an object, deduplicating on content. Returns its hash.
    pub async fn put(&self, bytes: &[u8], object_type: ObjectType) -> CasResult<String> {
        self.put_inner(bytes, object_type).await.map(|(hash, _)| hash)
    }

    async fn put_inner(&self, bytes: &[u8], object_type: ObjectType) -> CasResult<(String, bool)> {
        let framed = frame(object_type, bytes);
        let hash = digest_hex(self.config.algorithm, &framed);
        let path = hash_to_path(&hash, &self.config)?;

        let _guard = self.refcount_lock.lock().await;
        if self.store.has(&path).await? {
            let count = self.read_refcount(&path).await?;
            self.write_refcount(&path, count + 1).await?;
            self.existence.record_put(&hash);
            self.stats.lock().dedup_hits += 1;
            debug!(hash = hash.as_str(), refcount = count + 1, "cas dedup hit");
            return Ok((hash, false));
        }

        let compressed = compress(&framed)?;
        self.store.put(&path, compressed).await?;
        self.write_refcount(&path, 1).await?;
        self.existence.record_put(&hash);
        self.stats.lock().puts += 1;
        debug!(hash = hash.as_str(), bytes = bytes.len(), "cas object written");
        Ok((hash, true))
    }

    /// Fetch and decode an object; `None` when absent.
    pub async fn get(&self, hash: &str) -> CasResult<Option<(ObjectType, Bytes)>> {
        let hash = validate_hash(hash)?;
        if let Some(cache) = &self.objects {
            if let Some(found) = cache.get(&hash) {
                return Ok(Some(found));
            }
        }
        if self.existence.check(&hash) == ExistenceHint::Negative {
            return Ok(None);
        }
        let path = hash_to_path(&hash, &self.config)?;
        let compressed = match self.store.get(&path).await? {
            Some(compressed) => compressed,
            None => {
                self.existence.record(&hash, false);
                return Ok(None);
            }
        };
        let raw = decompress(&compressed, &hash)?;
        let (object_type, body) = parse_frame(&raw, &hash)?;
        self.existence.record(&hash, true);
        if let Some(cache) = &self.objects {
            cache.insert(&hash, object_type, body.clone());
        }
        Ok(Some((object_type, body)))
    }

    /// Existence probe through the cache hierarchy.
    pub async fn has(&self, hash: &str) -> CasResult<bool> {
        let hash = validate_hash(hash)?;
        match self.existence.check(&hash) {
            ExistenceHint::Positive => Ok(true),
            ExistenceHint::Negative => Ok(false),
            ExistenceHint::Unknown => {
                let path = hash_to_path(&hash, &self.config)?;
                let exists = self.store.has(&path).await?;
                self.existence.record(&hash, exists);
                Ok(exists)
            }
        }
    }

    /// Current refcount; zero when the object is absent.
    pub async fn ref_count(&self, hash: &str) -> CasResult<u64> {
        let hash = validate_hash(hash)?;
        let path = hash_to_path(&hash, &self.config)?;
        self.read_refcount(&path).await
    }

    /// Decrement the refcount; physically remove on the zero
    /// transition. Deleting an absent object is a no-op.
    pub async fn delete(&self, hash: &str) -> CasResult<()> {
        let hash = validate_hash(hash)?;
        let path = hash_to_path(&hash, &self.config)?;

        let _guard = self.refcount_lock.lock().await;
        if !self.store.has(&path).await? {
            return Ok(());
        }
        let count = self.read_refcount(&path).await?;
        if count > 1 {
            self.write_refcount(&path, count - 1).await?;
            return Ok(());
        }
        self.store.delete(&path).await?;
        self.store.delete(&Self::ref_key(&path)).await?;
        self.existence.record_delete(&hash);
        if let Some(cache) = &self.objects {
            cache.invalidate(&hash);
        }
        self.stats.lock().deletes += 1;
        debug!(hash = hash.as_str(), "cas object removed");
        Ok(())
    }

    /// Remove the object and zero its refcount regardless of holders.
    pub async fn force_delete(&self, hash: &str) -> CasResult<()> {
        let hash = validate_hash(hash)?;
        let path = hash_to_path(&hash, &self.config)?;

        let _guard = self.refcount_lock.lock().await;
        self.store.delete(&path).await?;
        self.store.delete(&Self::ref_key(&path)).await?;
        self.existence.record_delete(&hash);
        if let Some(cache) = &self.objects {
            cache.invalidate(&hash);
        }
        self.stats.lock().deletes += 1;
        Ok(())
    }

    /// Store many objects with bounded concurrency. Results preserve
    /// input order; `written=false` marks dedup hits.
    pub async fn put_batch(
        &self,
        items: Vec<BatchItem>,
        options: BatchOptions,
    ) -> CasResult<Vec<BatchOutcome>> {
        let total = items.len();
        let concurrency = options.concurrency.max(1);
        let progress = options.on_progress.clone();

        if concurrency == 1 {
            let mut outcomes = Vec::with_capacity(total);
            for (index, item) in items.into_iter().enumerate() {
                let (hash, written) = self.put_inner(&item.bytes, item.object_type).await?;
                outcomes.push(BatchOutcome { index, hash, written });
                if let Some(report) = &progress {
                    report(index + 1, total);
                }
            }
            return Ok(outcomes);
        }

        let completed = std::sync::atomic::AtomicUsize::new(0);
        let outcomes: Vec<CasResult<BatchOutcome>> = stream::iter(
            items.into_iter().enumerate().map(|(index, item)| {
                let progress = progress.clone();
                let completed = &completed;
                async move {
                    let (hash, written) =
                        self.put_inner(&item.bytes, item.object_type).await?;
                    let done =
                        completed.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
                    if let Some(report) = &progress {
                        report(done, total);
                    }
                    Ok(BatchOutcome { index, hash, written })
                }
            }),
        )
        .buffered(concurrency)
        .collect()
        .await;
        outcomes.into_iter().collect()
    }

    /// Instance activity counters.
    pub fn stats(&self) -> CasStats {
        self.stats.lock().clone()
    }

    /// Existence-cache statistics.
    pub fn existence_stats(&self) -> ExistenceStats {
        self.existence.stats()
    }

    /// Object-cache metrics, when the cache is enabled.
    pub fn object_cache_metrics(&self) -> Option<ObjectCacheMetrics> {
        self.objects.as_ref().map(|cache| cache.metrics())
    }

    async fn read_refcount(&self, path: &str) -> CasResult<u64> {
        match self.store.get(&Self::ref_key(path)).await? {
            Some(raw) => {
                let text = std::str::from_utf8(&raw)
                    .map_err(|_| CasError::Corrupt(path.to_string()))?;
                text.trim().parse().map_err(|_| CasError::Corrupt(path.to_string()))
            }
            None => Ok(0),
        }
    }

    async fn write_refcount(&self, path: &str, count: u64) -> CasResult<()> {
        self.store
            .put(&Self::ref_key(path), Bytes::from(count.to_string()))
            .await?;
        Ok(())
    }
}
