//! Response cache for idempotent reads.
//!
//! Entries are keyed by [`Fingerprint`] and live until explicitly
//! invalidated; there is no TTL. The cache is an explicit object injected
//! into the [`ApiClient`](crate::api_client::ApiClient) so tests can run
//! against an isolated instance.
//!
//! Cache failures are never fatal to a request. Callers log them and fall
//! through to a live fetch.

use bytes::Bytes;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use veriscan_core::{Fingerprint, Timestamp};

/// A completed GET response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: Fingerprint,
    /// Request URL, kept for prefix invalidation.
    pub url: String,
    pub payload: Bytes,
    pub created_at: Timestamp,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache lock poisoned")]
    LockPoisoned,
    #[error("Cache backend error: {0}")]
    Backend(String),
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entries: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Pluggable cache backend.
///
/// Concurrent writes to the same key are last-write-wins.
pub trait RequestCache: Send + Sync {
    fn get(&self, key: &Fingerprint) -> Result<Option<CacheEntry>, CacheError>;

    fn set(&self, key: Fingerprint, url: &str, payload: Bytes) -> Result<(), CacheError>;

    /// Returns whether an entry was removed.
    fn invalidate(&self, key: &Fingerprint) -> Result<bool, CacheError>;

    /// Remove every entry whose URL starts with `url_prefix`.
    fn invalidate_prefix(&self, url_prefix: &str) -> Result<u64, CacheError>;

    fn clear(&self) -> Result<u64, CacheError>;

    fn stats(&self) -> Result<CacheStats, CacheError>;
}

/// Process-lifetime in-memory cache.
#[derive(Debug, Default)]
pub struct MemoryRequestCache {
    entries: RwLock<HashMap<Fingerprint, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryRequestCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RequestCache for MemoryRequestCache {
    fn get(&self, key: &Fingerprint) -> Result<Option<CacheEntry>, CacheError> {
        let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
        let entry = entries.get(key).cloned();
        match entry {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        Ok(entry)
    }

    fn set(&self, key: Fingerprint, url: &str, payload: Bytes) -> Result<(), CacheError> {
        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        entries.insert(
            key.clone(),
            CacheEntry {
                key,
                url: url.to_string(),
                payload,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    fn invalidate(&self, key: &Fingerprint) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        Ok(entries.remove(key).is_some())
    }

    fn invalidate_prefix(&self, url_prefix: &str) -> Result<u64, CacheError> {
        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        let before = entries.len();
        entries.retain(|_, entry| !entry.url.starts_with(url_prefix));
        Ok((before - entries.len()) as u64)
    }

    fn clear(&self) -> Result<u64, CacheError> {
        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        let removed = entries.len() as u64;
        entries.clear();
        Ok(removed)
    }

    fn stats(&self) -> Result<CacheStats, CacheError> {
        let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: entries.len() as u64,
        })
    }
}
