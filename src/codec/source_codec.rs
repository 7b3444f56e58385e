use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use image::DynamicImage;
use lru::LruCache;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::detect::{detect_format, SNIFF_LEN};
use super::raster::RasterImage;
use super::tiff::TiffPyramid;
use super::{ImageCodec, Info};
use crate::cache::SingleFlight;
use crate::error::{CodecError, ImageError};
use crate::format::Format;
use crate::geometry::Rectangle;
use crate::io::{BlockCache, RangeReader, DEFAULT_BLOCK_CAPACITY, DEFAULT_BLOCK_SIZE};
use crate::source::ImageSource;

/// Default number of opened sources kept.
pub const DEFAULT_OPEN_SOURCES: usize = 100;

/// A source with its container structure parsed.
enum Opened {
    Pyramid {
        reader: Arc<dyn RangeReader>,
        pyramid: TiffPyramid,
    },
    Raster(RasterImage),
}

/// [`ImageCodec`] over an [`ImageSource`].
///
/// Opening a source (format sniffing, TIFF directory walk or raster read)
/// happens once per identifier: results are kept in an LRU and concurrent
/// opens of one identifier share a single attempt.
pub struct SourceCodec {
    source: Arc<dyn ImageSource>,
    opened: Mutex<LruCache<String, Arc<Opened>>>,
    opening: Arc<SingleFlight<String, Arc<Opened>>>,
    block_size: usize,
    block_capacity: usize,
}

impl SourceCodec {
    pub fn new(source: Arc<dyn ImageSource>) -> Self {
        Self::with_capacity(
            source,
            DEFAULT_OPEN_SOURCES,
            DEFAULT_BLOCK_SIZE,
            DEFAULT_BLOCK_CAPACITY,
        )
    }

    /// `sources` opened sources kept; remote sources get a block cache of
    /// `block_capacity` blocks of `block_size` bytes each.
    pub fn with_capacity(
        source: Arc<dyn ImageSource>,
        sources: usize,
        block_size: usize,
        block_capacity: usize,
    ) -> Self {
        Self {
            source,
            opened: Mutex::new(LruCache::new(
                NonZeroUsize::new(sources).unwrap_or(NonZeroUsize::MIN),
            )),
            opening: Arc::new(SingleFlight::new()),
            block_size,
            block_capacity,
        }
    }

    /// Number of sources currently held open.
    pub async fn open_count(&self) -> usize {
        self.opened.lock().await.len()
    }

    async fn open(&self, identifier: &str) -> Result<Arc<Opened>, CodecError> {
        if let Some(opened) = self.opened.lock().await.get(identifier) {
            return Ok(opened.clone());
        }

        let source = self.source.clone();
        let key = identifier.to_string();
        let (block_size, block_capacity) = (self.block_size, self.block_capacity);
        let (result, _) = self
            .opening
            .run(identifier.to_string(), move || async move {
                open_source(source.as_ref(), &key, block_size, block_capacity)
                    .await
                    .map(Arc::new)
                    .map_err(ImageError::Source)
            })
            .await;

        let opened = result.map_err(|e| match e {
            ImageError::Source(codec) => codec,
            other => CodecError::Decode(other.to_string()),
        })?;
        self.opened
            .lock()
            .await
            .put(identifier.to_string(), opened.clone());
        Ok(opened)
    }
}

async fn open_source(
    source: &dyn ImageSource,
    identifier: &str,
    block_size: usize,
    block_capacity: usize,
) -> Result<Opened, CodecError> {
    let mut reader = source.create_reader(identifier).await?;
    if source.is_remote() {
        reader = Arc::new(BlockCache::with_capacity(reader, block_size, block_capacity));
    }

    let sniff = SNIFF_LEN.min(reader.size() as usize);
    let head = reader.read_exact_at(0, sniff).await?;
    let format = detect_format(&head)?;

    if format == Format::Tif {
        let pyramid = TiffPyramid::open(reader.as_ref()).await?;
        if !pyramid.is_empty() {
            info!(
                identifier,
                tiers = pyramid.levels().len(),
                "Opened tiled TIFF source"
            );
            return Ok(Opened::Pyramid { reader, pyramid });
        }
        debug!(identifier, "TIFF has no tiled tiers, decoding as raster");
    }

    let bytes = reader.read_all().await?;
    let raster = RasterImage::probe(bytes, format)?;
    info!(identifier, format = %format, size = %raster.size(), "Opened raster source");
    Ok(Opened::Raster(raster))
}

fn join_failure(e: tokio::task::JoinError) -> CodecError {
    CodecError::Decode(format!("decode task failed: {}", e))
}

#[async_trait]
impl ImageCodec for SourceCodec {
    async fn read_info(&self, identifier: &str) -> Result<Info, CodecError> {
        let opened = self.open(identifier).await?;
        Ok(match opened.as_ref() {
            Opened::Pyramid { pyramid, .. } => {
                let tiers = pyramid.tier_sizes();
                let base = &pyramid.levels()[0];
                Info {
                    size: base.size,
                    tiers,
                    tile_size: Some(base.tile_size),
                    format: Format::Tif,
                }
            }
            Opened::Raster(raster) => Info::single_tier(raster.size(), raster.format()),
        })
    }

    async fn decode(
        &self,
        identifier: &str,
        tier: usize,
        region: Rectangle,
    ) -> Result<DynamicImage, CodecError> {
        let opened = self.open(identifier).await?;
        match opened.as_ref() {
            Opened::Pyramid { reader, pyramid } => {
                let tiles = pyramid.fetch_tiles(reader.as_ref(), tier, region).await?;
                tokio::task::spawn_blocking(move || tiles.composite())
                    .await
                    .map_err(join_failure)?
            }
            Opened::Raster(raster) => {
                if tier != 0 {
                    return Err(CodecError::InvalidTier { tier, count: 1 });
                }
                let raster = raster.clone();
                tokio::task::spawn_blocking(move || raster.decode_region(region))
                    .await
                    .map_err(join_failure)?
            }
        }
    }

    async fn purge(&self, identifier: &str) {
        if self.opened.lock().await.pop(identifier).is_some() {
            debug!(identifier, "Closed source");
        }
    }
}
