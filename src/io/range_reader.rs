use async_trait::async_trait;
use bytes::Bytes;

use crate::error::IoError;

/// Random access to the bytes of one stored object.
///
/// Pyramidal codecs only ever touch the header, the directory chain and the
/// tiles covering a request, so sources are read by range rather than
/// downloaded whole.
#[async_trait]
pub trait RangeReader: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Returns an error if the range is out of bounds or if the read fails.
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError>;

    /// Total size of the object in bytes.
    fn size(&self) -> u64;

    /// Location of the object for logs, e.g. `s3://bucket/key` or a path.
    fn identifier(&self) -> &str;

    /// Read the whole object.
    async fn read_all(&self) -> Result<Bytes, IoError> {
        let size = usize::try_from(self.size()).map_err(|_| IoError::RangeOutOfBounds {
            offset: 0,
            requested: self.size(),
            size: self.size(),
        })?;
        self.read_exact_at(0, size).await
    }
}

/// Check a range request against an object size.
pub(crate) fn check_range(offset: u64, len: usize, size: u64) -> Result<(), IoError> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(IoError::RangeOutOfBounds {
            offset,
            requested: len as u64,
            size,
        }),
    }
}

// =============================================================================
// MemoryReader
// =============================================================================

/// A reader over bytes already in memory.
#[derive(Debug, Clone)]
pub struct MemoryReader {
    data: Bytes,
    identifier: String,
}

impl MemoryReader {
    pub fn new(data: impl Into<Bytes>, identifier: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            identifier: identifier.into(),
        }
    }
}

#[async_trait]
impl RangeReader for MemoryReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.size())?;
        let start = offset as usize;
        Ok(self.data.slice(start..start + len))
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn read_all(&self) -> Result<Bytes, IoError> {
        Ok(self.data.clone())
    }
}
