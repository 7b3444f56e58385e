use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::Client;
use bytes::Bytes;

use super::range_reader::check_range;
use super::RangeReader;
use crate::error::IoError;

/// S3 implementation of [`RangeReader`].
///
/// Works with AWS S3 and S3-compatible stores (MinIO, R2, ...). The object
/// size comes from a HEAD request made once at construction; every read is
/// a ranged GET.
#[derive(Clone)]
pub struct S3RangeReader {
    client: Client,
    bucket: String,
    key: String,
    size: u64,
    identifier: String,
}

impl S3RangeReader {
    /// HEAD `bucket/key` and build a reader for it.
    ///
    /// A missing object is [`IoError::NotFound`].
    pub async fn new(client: Client, bucket: String, key: String) -> Result<Self, IoError> {
        let identifier = format!("s3://{}/{}", bucket, key);

        let head = client
            .head_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| classify_error(e, &identifier))?;

        let size = head
            .content_length()
            .and_then(|len| u64::try_from(len).ok())
            .unwrap_or(0);

        Ok(Self {
            client,
            bucket,
            key,
            size,
            identifier,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Map an SDK error to [`IoError`], recognizing missing objects.
fn classify_error<E>(err: SdkError<E, HttpResponse>, identifier: &str) -> IoError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let status_404 = err
        .raw_response()
        .map(|response| response.status().as_u16() == 404)
        .unwrap_or(false);
    let code_not_found = matches!(err.code(), Some("NotFound" | "NoSuchKey"));

    if status_404 || code_not_found {
        return IoError::NotFound(identifier.to_string());
    }
    match err {
        SdkError::DispatchFailure(e) => IoError::Connection(format!("{}: {:?}", identifier, e)),
        SdkError::TimeoutError(_) => IoError::Connection(format!("timeout reading {}", identifier)),
        other => IoError::S3(format!("{}: {}", identifier, other)),
    }
}

#[async_trait]
impl RangeReader for S3RangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.size)?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        // HTTP ranges are inclusive on both ends
        let range = format!("bytes={}-{}", offset, offset + len as u64 - 1);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .range(range)
            .send()
            .await
            .map_err(|e| classify_error(e, &self.identifier))?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| IoError::Connection(e.to_string()))?
            .into_bytes();

        if data.len() != len {
            return Err(IoError::S3(format!(
                "{}: short read, expected {} bytes at {}, got {}",
                self.identifier,
                len,
                offset,
                data.len()
            )));
        }
        Ok(data)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Build an S3 client for `region`, optionally against a custom endpoint.
///
/// Custom endpoints (MinIO and friends) get path-style addressing.
pub async fn create_s3_client(endpoint_url: Option<&str>, region: &str) -> Client {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(region.to_string()));
    if let Some(endpoint) = endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }
    let sdk_config = loader.load().await;

    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(endpoint_url.is_some())
        .build();
    Client::from_conf(s3_config)
}
