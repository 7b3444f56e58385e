//! Request orchestration.
//!
//! [`ImageService::image`] is the main entry point for image requests:
//!
//! ```text
//! authorize -> info -> parse -> policy overlays -> canonicalize
//!     -> cache lookup / single flight
//!         -> select tier -> decode region -> render -> cache
//! ```

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, info};

use crate::codec::{ImageCodec, Info};
use crate::error::ImageError;
use crate::iiif::{parse, ImageRequest};
use crate::operation::{
    canonicalize, CanonicalOperationList, Crop, Encode, Limits, Overlay, DEFAULT_JPEG_QUALITY,
};
use crate::pipeline;
use crate::policy::{Policy, RequestContext};
use crate::selector::select_tier;

use super::coordinator::{CoordinatorStats, Derivative, DerivativeCoordinator, PurgeReport};

/// Settings of the image service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub limits: Limits,

    /// Quality of JPEG derivatives (1-100)
    pub jpeg_quality: u8,

    /// Separator between an identifier and its scale constraint suffix
    pub delimiter: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            delimiter: "-".to_string(),
        }
    }
}

/// A derivative with the canonical operations that produced it.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub canonical: CanonicalOperationList,
    pub derivative: Derivative,
}

/// Serves info and derivatives for the identifiers behind one codec.
pub struct ImageService {
    codec: Arc<dyn ImageCodec>,
    coordinator: Arc<DerivativeCoordinator>,
    policy: Arc<dyn Policy>,
    config: ServiceConfig,
}

impl ImageService {
    pub fn new(
        codec: Arc<dyn ImageCodec>,
        coordinator: Arc<DerivativeCoordinator>,
        policy: Arc<dyn Policy>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            codec,
            coordinator,
            policy,
            config,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Source info for `identifier`, read once and cached.
    pub async fn info(&self, identifier: &str) -> Result<Arc<Info>, ImageError> {
        let codec = self.codec.clone();
        let key = identifier.to_string();
        self.coordinator
            .get_or_read_info(identifier, move || async move {
                codec
                    .read_info(&key)
                    .await
                    .map_err(|e| ImageError::from_codec(&key, e))
            })
            .await
    }

    /// Like [`info`](Self::info), but subject to the policy.
    pub async fn authorized_info(
        &self,
        identifier: &str,
        context: &RequestContext,
    ) -> Result<Arc<Info>, ImageError> {
        self.authorize(identifier, context)?;
        self.info(identifier).await
    }

    /// Produce the derivative for `request`.
    pub async fn image(
        &self,
        request: &ImageRequest,
        context: &RequestContext,
    ) -> Result<Rendered, ImageError> {
        let started = Instant::now();
        let identifier = request.identifier.as_str();
        self.authorize(identifier, context)?;

        let info = self.info(identifier).await?;
        let canonical = self.canonical(request, &info, context)?;

        let codec = self.codec.clone();
        let job_info = info.clone();
        let job = canonical.clone();
        let derivative = self
            .coordinator
            .get_or_compute(&canonical, move || compute(codec, job_info, job))
            .await?;

        info!(
            identifier,
            fingerprint = %derivative.fingerprint,
            size = %canonical.resulting_size(),
            bytes = derivative.bytes.len(),
            cache = derivative.status.as_str(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Served image"
        );
        Ok(Rendered {
            canonical,
            derivative,
        })
    }

    /// Build the canonical operation list for `request` without rendering it.
    pub fn canonical(
        &self,
        request: &ImageRequest,
        info: &Info,
        context: &RequestContext,
    ) -> Result<CanonicalOperationList, ImageError> {
        let identifier = request.identifier.as_str();
        let list = parse(request, info.size)?;

        let mut builder = list.to_builder();
        if let Some(encode) = list.encode() {
            builder = builder.encode(Encode {
                quality: self.config.jpeg_quality,
                ..*encode
            });
        }
        for rect in self.policy.redactions_for(identifier, context) {
            builder = builder.overlay(Overlay::Redaction(rect));
        }
        if let Some(watermark) = self.policy.watermark_for(identifier, context) {
            builder = builder.overlay(Overlay::Watermark(watermark));
        }

        canonicalize(&builder.build(), info.size, &self.config.limits)
    }

    /// Drop everything cached for `identifier`.
    pub async fn purge(&self, identifier: &str) -> PurgeReport {
        self.codec.purge(identifier).await;
        self.coordinator.purge(identifier).await
    }

    pub async fn stats(&self) -> CoordinatorStats {
        self.coordinator.stats().await
    }

    fn authorize(&self, identifier: &str, context: &RequestContext) -> Result<(), ImageError> {
        if self.policy.is_authorized(identifier, context) {
            Ok(())
        } else {
            Err(ImageError::Forbidden {
                identifier: identifier.to_string(),
            })
        }
    }
}

/// Decode the smallest sufficient tier and render the derivative.
async fn compute(
    codec: Arc<dyn ImageCodec>,
    info: Arc<Info>,
    canonical: CanonicalOperationList,
) -> Result<Bytes, ImageError> {
    let identifier = canonical.identifier().to_string();
    let list = canonical.list();
    let crop = list.crop().copied().unwrap_or(Crop::Full);
    let selection = select_tier(
        info.size,
        info.tiers(),
        &crop,
        list.scale(),
        &list.scale_constraint(),
    )?;
    debug!(
        identifier = %identifier,
        tier = selection.tier_index,
        region = %selection.region,
        "Decoding region"
    );

    let decoded = codec
        .decode(&identifier, selection.tier_index, selection.region)
        .await
        .map_err(|e| ImageError::from_codec(&identifier, e))?;

    tokio::task::spawn_blocking(move || pipeline::render(decoded, &canonical))
        .await
        .map_err(|e| ImageError::ComputationFailure {
            message: format!("render task failed: {}", e),
        })?
        .map_err(ImageError::Source)
}
