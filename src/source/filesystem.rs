use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use super::{safe_segments, ImageSource};
use crate::error::IoError;
use crate::io::{FileRangeReader, RangeReader};

/// Serves identifiers as paths relative to a root directory.
#[derive(Debug, Clone)]
pub struct FilesystemSource {
    root: PathBuf,
}

impl FilesystemSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of `identifier` under the root, if it is a safe relative path.
    pub fn resolve(&self, identifier: &str) -> Result<PathBuf, IoError> {
        let mut path = self.root.clone();
        for segment in safe_segments(identifier)? {
            path.push(segment);
        }
        Ok(path)
    }
}

#[async_trait]
impl ImageSource for FilesystemSource {
    async fn create_reader(&self, identifier: &str) -> Result<Arc<dyn RangeReader>, IoError> {
        let path = self.resolve(identifier)?;
        let reader = FileRangeReader::open(&path).await.map_err(|e| match e {
            IoError::NotFound(_) => IoError::NotFound(identifier.to_string()),
            other => other,
        })?;
        Ok(Arc::new(reader))
    }
}
