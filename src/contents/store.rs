//! Content store implementation.

use crate::backend::{ObjectBackend, ObjectKind};
use crate::error::{Result, StoreError};
use crate::types::ContentHash;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::trace;

/// Write-once, content-addressed payload storage.
pub struct ContentStore {
    backend: Arc<dyn ObjectBackend>,

    /// LRU cache for recently accessed payloads.
    cache: Mutex<LruCache<ContentHash, Arc<Vec<u8>>>>,
}

impl ContentStore {
    pub fn new(backend: Arc<dyn ObjectBackend>, cache_size: usize) -> Self {
        let cache_size = NonZeroUsize::new(cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            backend,
            cache: Mutex::new(LruCache::new(cache_size)),
        }
    }

    /// Store a payload, returning its hash.
    ///
    /// If the payload already exists, this is a no-op and returns the existing hash.
    pub fn put(&self, payload: &[u8]) -> Result<ContentHash> {
        let hash = ContentHash::of(payload);

        if self.cache.lock().contains(&hash) {
            return Ok(hash);
        }

        let written = self.backend.put_object(ObjectKind::Content, &hash.0, payload)?;
        trace!(%hash, written, size = payload.len(), "stored content");

        self.cache.lock().put(hash, Arc::new(payload.to_vec()));
        Ok(hash)
    }

    /// Get a payload by its hash.
    pub fn get(&self, hash: &ContentHash) -> Result<Arc<Vec<u8>>> {
        if let Some(cached) = self.cache.lock().get(hash).cloned() {
            return Ok(cached);
        }

        let payload = self
            .backend
            .get_object(ObjectKind::Content, &hash.0)?
            .ok_or(StoreError::ContentNotFound(*hash))?;

        let payload = Arc::new(payload);
        self.cache.lock().put(*hash, Arc::clone(&payload));
        Ok(payload)
    }

    /// Check if a payload exists.
    pub fn contains(&self, hash: &ContentHash) -> Result<bool> {
        if self.cache.lock().contains(hash) {
            return Ok(true);
        }
        self.backend.contains_object(ObjectKind::Content, &hash.0)
    }
}
