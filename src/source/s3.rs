use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::Client;

use super::{safe_segments, ImageSource};
use crate::error::IoError;
use crate::io::{RangeReader, S3RangeReader};

/// Serves identifiers as object keys in one bucket, under an optional prefix.
#[derive(Clone)]
pub struct S3Source {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Source {
    pub fn new(client: Client, bucket: impl Into<String>, prefix: Option<&str>) -> Self {
        let prefix = prefix
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
            .map(|p| format!("{}/", p))
            .unwrap_or_default();
        Self {
            client,
            bucket: bucket.into(),
            prefix,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Object key for `identifier`.
    pub fn key_for(&self, identifier: &str) -> Result<String, IoError> {
        safe_segments(identifier)?;
        Ok(format!("{}{}", self.prefix, identifier))
    }
}

#[async_trait]
impl ImageSource for S3Source {
    async fn create_reader(&self, identifier: &str) -> Result<Arc<dyn RangeReader>, IoError> {
        let key = self.key_for(identifier)?;
        let reader = S3RangeReader::new(self.client.clone(), self.bucket.clone(), key)
            .await
            .map_err(|e| match e {
                IoError::NotFound(_) => IoError::NotFound(identifier.to_string()),
                other => other,
            })?;
        Ok(Arc::new(reader))
    }

    fn is_remote(&self) -> bool {
        true
    }
}
