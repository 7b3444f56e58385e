use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use lru::LruCache;
use tokio::sync::{Mutex, Notify, RwLock};

use super::range_reader::check_range;
use super::RangeReader;
use crate::error::IoError;

/// Default block size: 256KB, large enough to amortize S3 round trips.
pub const DEFAULT_BLOCK_SIZE: usize = 256 * 1024;

/// Default number of blocks kept per source (25.6MB at the default size).
pub const DEFAULT_BLOCK_CAPACITY: usize = 100;

/// Fixed-size block cache in front of another [`RangeReader`].
///
/// TIFF directory walking issues many tiny reads at scattered offsets;
/// rounding them to whole blocks turns those into a handful of requests.
/// Concurrent readers of the same block share a single fetch.
pub struct BlockCache {
    inner: Arc<dyn RangeReader>,
    block_size: u64,
    blocks: RwLock<LruCache<u64, Bytes>>,
    in_flight: Mutex<HashMap<u64, Arc<Notify>>>,
}

impl BlockCache {
    pub fn new(inner: Arc<dyn RangeReader>) -> Self {
        Self::with_capacity(inner, DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_CAPACITY)
    }

    /// Zero sizes are bumped to one byte / one block.
    pub fn with_capacity(inner: Arc<dyn RangeReader>, block_size: usize, capacity: usize) -> Self {
        Self {
            inner,
            block_size: block_size.max(1) as u64,
            blocks: RwLock::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size as usize
    }

    async fn block(&self, index: u64) -> Result<Bytes, IoError> {
        loop {
            if let Some(data) = self.blocks.read().await.peek(&index) {
                return Ok(data.clone());
            }

            let notify = {
                let mut in_flight = self.in_flight.lock().await;
                if let Some(existing) = in_flight.get(&index) {
                    let existing = existing.clone();
                    let notified = existing.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();
                    drop(in_flight);
                    notified.await;
                    continue;
                }
                let notify = Arc::new(Notify::new());
                in_flight.insert(index, notify.clone());
                notify
            };

            let result = self.fetch(index).await;
            {
                let mut blocks = self.blocks.write().await;
                let mut in_flight = self.in_flight.lock().await;
                if let Ok(data) = &result {
                    blocks.put(index, data.clone());
                }
                in_flight.remove(&index);
            }
            notify.notify_waiters();
            return result;
        }
    }

    async fn fetch(&self, index: u64) -> Result<Bytes, IoError> {
        let offset = index * self.block_size;
        let size = self.inner.size();
        let remaining = size.saturating_sub(offset);
        if remaining == 0 {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: self.block_size,
                size,
            });
        }
        let len = self.block_size.min(remaining) as usize;
        self.inner.read_exact_at(offset, len).await
    }
}

#[async_trait]
impl RangeReader for BlockCache {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.inner.size())?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        let first = offset / self.block_size;
        let last = (offset + len as u64 - 1) / self.block_size;

        if first == last {
            let block = self.block(first).await?;
            let start = (offset % self.block_size) as usize;
            return Ok(block.slice(start..start + len));
        }

        let mut out = BytesMut::with_capacity(len);
        let mut position = offset;
        for index in first..=last {
            let block = self.block(index).await?;
            let start = (position % self.block_size) as usize;
            let take = (block.len() - start).min(len - out.len());
            out.extend_from_slice(&block[start..start + take]);
            position += take as u64;
        }
        Ok(out.freeze())
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }
}
