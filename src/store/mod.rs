//! Storage substrate traits the tiered engine runs over.
//!
//! The hot store is the local durable row store holding warm pages,
//! page metadata, and CAS objects. The remote store is the warm/cold
//! object store the spec treats as an interface; tests run against the
//! in-memory implementations.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::errno::FsResult;

/// Custom metadata attached to remote objects.
pub type ObjectMeta = HashMap<String, String>;

/// Local durable key-value store (the hot tier).
#[async_trait]
pub trait HotStore: Send + Sync {
    async fn get(&self, key: &str) -> FsResult<Option<Bytes>>;

    async fn put(&self, key: &str, value: Bytes) -> FsResult<()>;

    /// Deleting an absent key is a no-op.
    async fn delete(&self, key: &str) -> FsResult<()>;

    async fn has(&self, key: &str) -> FsResult<bool>;

    /// Keys beginning with `prefix`, in unspecified order.
    async fn keys(&self, prefix: &str) -> FsResult<Vec<String>>;
}

/// Remote object store (cold backing and eviction target).
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, key: &str) -> FsResult<Option<Bytes>>;

    async fn put(&self, key: &str, value: Bytes, metadata: ObjectMeta) -> FsResult<()>;

    /// Deleting an absent key is a no-op.
    async fn delete(&self, key: &str) -> FsResult<()>;

    async fn has(&self, key: &str) -> FsResult<bool>;

    /// Metadata only, without the payload.
    async fn head(&self, key: &str) -> FsResult<Option<ObjectMeta>>;
}

/// In-memory hot store over a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryHotStore {
    rows: DashMap<String, Bytes>,
}

impl MemoryHotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently stored.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl HotStore for MemoryHotStore {
    async fn get(&self, key: &str) -> FsResult<Option<Bytes>> {
        Ok(self.rows.get(key).map(|row| row.clone()))
    }

    async fn put(&self, key: &str, value: Bytes) -> FsResult<()> {
        self.rows.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> FsResult<()> {
        self.rows.remove(key);
        Ok(())
    }

    async fn has(&self, key: &str) -> FsResult<bool> {
        Ok(self.rows.contains_key(key))
    }

    async fn keys(&self, prefix: &str) -> FsResult<Vec<String>> {
        Ok(self
            .rows
            .iter()
            .filter(|row| row.key().starts_with(prefix))
            .map(|row| row.key().clone())
            .collect())
    }
}

/// In-memory remote store retaining object metadata.
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    objects: DashMap<String, (Bytes, ObjectMeta)>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get(&self, key: &str) -> FsResult<Option<Bytes>> {
        Ok(self.objects.get(key).map(|object| object.0.clone()))
    }

    async fn put(&self, key: &str, value: Bytes, metadata: ObjectMeta) -> FsResult<()> {
        self.objects.insert(key.to_string(), (value, metadata));
        Ok(())
    }

    async fn delete(&self, key: &str) -> FsResult<()> {
        self.objects.remove(key);
        Ok(())
    }

    async fn has(&self, key: &str) -> FsResult<bool> {
        Ok(self.objects.contains_key(key))
    }

    async fn head(&self, key: &str) -> FsResult<Option<ObjectMeta>> {
        Ok(self.objects.get(key).map(|object| object.1.clone()))
    }
}
