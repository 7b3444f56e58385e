//! In-memory LRU caches.
//!
//! The derivative cache tracks the total size of cached bytes and evicts
//! least-recently-used entries when the capacity is exceeded. A secondary
//! index from identifier to fingerprints makes purging one source cheap.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use tokio::sync::Mutex;

use super::{CacheStats, DerivativeCache, InfoCache};
use crate::codec::Info;
use crate::operation::Fingerprint;

/// Default derivative cache capacity: 256MB
pub const DEFAULT_DERIVATIVE_CACHE_CAPACITY: usize = 256 * 1024 * 1024;

/// Default maximum number of derivative entries (to bound LRU overhead)
const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Default number of cached info documents
pub const DEFAULT_INFO_CACHE_ENTRIES: usize = 1_000;

// =============================================================================
// Derivative Cache
// =============================================================================

struct Entry {
    identifier: Arc<str>,
    bytes: Bytes,
}

struct DerivativeState {
    lru: LruCache<Fingerprint, Entry>,
    by_identifier: HashMap<Arc<str>, HashSet<Fingerprint>>,
    size: usize,
}

impl DerivativeState {
    fn unindex(&mut self, fingerprint: &Fingerprint, identifier: &Arc<str>) {
        if let Some(set) = self.by_identifier.get_mut(identifier) {
            set.remove(fingerprint);
            if set.is_empty() {
                self.by_identifier.remove(identifier);
            }
        }
    }
}

/// Size-bounded LRU cache of encoded derivatives.
pub struct MemoryDerivativeCache {
    state: Mutex<DerivativeState>,
    max_size: usize,
}

impl MemoryDerivativeCache {
    /// Create a cache with the default capacity (256MB).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_DERIVATIVE_CACHE_CAPACITY)
    }

    /// Create a cache holding at most `max_size` bytes.
    pub fn with_capacity(max_size: usize) -> Self {
        Self::with_capacity_and_entries(max_size, DEFAULT_MAX_ENTRIES)
    }

    /// Create a cache bounded both in bytes and in entry count.
    pub fn with_capacity_and_entries(max_size: usize, max_entries: usize) -> Self {
        let entries = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(DerivativeState {
                lru: LruCache::new(entries),
                by_identifier: HashMap::new(),
                size: 0,
            }),
            max_size,
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.lru.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.lru.is_empty()
    }

    /// Total size of cached bytes.
    pub async fn size(&self) -> usize {
        self.state.lock().await.size
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    pub async fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.state.lock().await.lru.contains(fingerprint)
    }
}

impl Default for MemoryDerivativeCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DerivativeCache for MemoryDerivativeCache {
    async fn get(&self, fingerprint: &Fingerprint) -> Option<Bytes> {
        let mut state = self.state.lock().await;
        state.lru.get(fingerprint).map(|entry| entry.bytes.clone())
    }

    async fn put(&self, fingerprint: &Fingerprint, identifier: &str, bytes: Bytes) {
        // Never cache something that would evict everything else and still not fit.
        if bytes.len() > self.max_size {
            return;
        }

        let mut state = self.state.lock().await;
        let identifier: Arc<str> = Arc::from(identifier);
        let size = bytes.len();

        let previous = state.lru.push(
            fingerprint.clone(),
            Entry {
                identifier: identifier.clone(),
                bytes,
            },
        );
        // Either the replaced value for this fingerprint or an entry-count eviction
        if let Some((old_fingerprint, old)) = previous {
            state.size = state.size.saturating_sub(old.bytes.len());
            if old_fingerprint != *fingerprint || old.identifier != identifier {
                state.unindex(&old_fingerprint, &old.identifier);
            }
        }
        state.size += size;
        state
            .by_identifier
            .entry(identifier)
            .or_default()
            .insert(fingerprint.clone());

        while state.size > self.max_size {
            let Some((evicted, entry)) = state.lru.pop_lru() else {
                break;
            };
            state.size = state.size.saturating_sub(entry.bytes.len());
            state.unindex(&evicted, &entry.identifier);
        }
    }

    async fn purge(&self, identifier: &str) -> usize {
        let mut state = self.state.lock().await;
        let Some(fingerprints) = state.by_identifier.remove(identifier) else {
            return 0;
        };
        let mut removed = 0;
        for fingerprint in fingerprints {
            if let Some(entry) = state.lru.pop(&fingerprint) {
                state.size = state.size.saturating_sub(entry.bytes.len());
                removed += 1;
            }
        }
        removed
    }

    async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        CacheStats {
            entries: state.lru.len(),
            size_bytes: state.size,
            capacity_bytes: self.max_size,
        }
    }
}

// =============================================================================
// Info Cache
// =============================================================================

/// Entry-bounded LRU cache of source info.
pub struct MemoryInfoCache {
    cache: Mutex<LruCache<String, Arc<Info>>>,
}

impl MemoryInfoCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_INFO_CACHE_ENTRIES)
    }

    pub fn with_capacity(entries: usize) -> Self {
        let entries = NonZeroUsize::new(entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(entries)),
        }
    }
}

impl Default for MemoryInfoCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InfoCache for MemoryInfoCache {
    async fn get(&self, identifier: &str) -> Option<Arc<Info>> {
        self.cache.lock().await.get(identifier).cloned()
    }

    async fn put(&self, identifier: &str, info: Arc<Info>) {
        self.cache.lock().await.put(identifier.to_string(), info);
    }

    async fn purge(&self, identifier: &str) -> bool {
        self.cache.lock().await.pop(identifier).is_some()
    }

    async fn stats(&self) -> CacheStats {
        let cache = self.cache.lock().await;
        CacheStats {
            entries: cache.len(),
            size_bytes: 0,
            capacity_bytes: 0,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
