//! Where source images live.
//!
//! An [`ImageSource`] turns an identifier into a [`RangeReader`] over the
//! stored bytes. The codec layer never sees paths or buckets.

mod filesystem;
mod s3;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::IoError;
use crate::io::RangeReader;

pub use filesystem::FilesystemSource;
pub use s3::S3Source;

/// Resolves identifiers to readable objects.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Open the object for `identifier`. Unknown identifiers are
    /// [`IoError::NotFound`].
    async fn create_reader(&self, identifier: &str) -> Result<Arc<dyn RangeReader>, IoError>;

    /// Whether reads cross the network and deserve a block cache.
    fn is_remote(&self) -> bool {
        false
    }
}

/// Reject identifiers that could escape the source root.
///
/// Returns the identifier split into path segments.
pub(crate) fn safe_segments(identifier: &str) -> Result<Vec<&str>, IoError> {
    let not_found = || IoError::NotFound(identifier.to_string());
    if identifier.is_empty() || identifier.contains('\0') || identifier.contains('\\') {
        return Err(not_found());
    }
    if identifier.starts_with('/') {
        return Err(not_found());
    }
    let segments: Vec<&str> = identifier.split('/').collect();
    if segments
        .iter()
        .any(|segment| segment.is_empty() || *segment == "." || *segment == "..")
    {
        return Err(not_found());
    }
    Ok(segments)
}
