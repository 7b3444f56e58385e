//! Derivative and info caches.
//!
//! - [`DerivativeCache`]: encoded output bytes keyed by [`Fingerprint`]
//! - [`InfoCache`]: parsed source metadata keyed by identifier
//! - [`SingleFlight`]: per-key deduplication of concurrent computations
//!
//! Both caches are traits so that out-of-process stores can be plugged in.
//! Derivatives go to the in-memory LRU from [`memory`] or, when a cache
//! directory is configured, to [`filesystem`]; info is always held in memory.

pub mod filesystem;
pub mod flight;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

use crate::codec::Info;
use crate::operation::Fingerprint;

pub use filesystem::FilesystemDerivativeCache;
pub use flight::{Role, SingleFlight};
pub use memory::{MemoryDerivativeCache, MemoryInfoCache};

/// Occupancy figures reported by the health endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub size_bytes: usize,
    pub capacity_bytes: usize,
}

/// Store of encoded derivatives.
#[async_trait]
pub trait DerivativeCache: Send + Sync {
    async fn get(&self, fingerprint: &Fingerprint) -> Option<Bytes>;

    /// Store `bytes`, replacing any previous entry for `fingerprint`.
    async fn put(&self, fingerprint: &Fingerprint, identifier: &str, bytes: Bytes);

    /// Drop every derivative of `identifier`; returns how many were removed.
    async fn purge(&self, identifier: &str) -> usize;

    async fn stats(&self) -> CacheStats;
}

/// Store of source metadata.
#[async_trait]
pub trait InfoCache: Send + Sync {
    async fn get(&self, identifier: &str) -> Option<Arc<Info>>;

    async fn put(&self, identifier: &str, info: Arc<Info>);

    /// Drop the entry for `identifier`; returns whether one existed.
    async fn purge(&self, identifier: &str) -> bool;

    async fn stats(&self) -> CacheStats;
}
