//! Reading source images.
//!
//! [`ImageCodec`] is the seam between the request pipeline and the bytes:
//! it reports the resolution tiers of a source and decodes a tier-local
//! region. [`SourceCodec`] implements it over any [`ImageSource`] by
//! sniffing the format and dispatching to the tiled TIFF reader or to a
//! whole-image raster decode.
//!
//! [`ImageSource`]: crate::source::ImageSource

pub mod detect;
pub mod jpeg;
pub mod raster;
mod source_codec;
pub mod tiff;

use async_trait::async_trait;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::format::Format;
use crate::geometry::{Dimension, Rectangle};

pub use detect::detect_format;
pub use source_codec::{SourceCodec, DEFAULT_OPEN_SOURCES};

/// What a codec knows about a source without decoding it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    /// Full-resolution size
    pub size: Dimension,

    /// Available resolutions, largest first; `tiers[0] == size`
    pub tiers: Vec<Dimension>,

    /// Native tile size, for sources stored in tiles
    pub tile_size: Option<Dimension>,

    /// Detected source format
    pub format: Format,
}

impl Info {
    pub fn single_tier(size: Dimension, format: Format) -> Self {
        Self {
            size,
            tiers: vec![size],
            tile_size: None,
            format,
        }
    }

    pub fn tiers(&self) -> &[Dimension] {
        &self.tiers
    }

    pub fn is_pyramidal(&self) -> bool {
        self.tiers.len() > 1
    }
}

/// Decoder for the sources behind identifiers.
#[async_trait]
pub trait ImageCodec: Send + Sync {
    async fn read_info(&self, identifier: &str) -> Result<Info, CodecError>;

    /// Decode `region`, given in the pixel space of tier `tier`.
    async fn decode(
        &self,
        identifier: &str,
        tier: usize,
        region: Rectangle,
    ) -> Result<DynamicImage, CodecError>;

    /// Forget anything held open for `identifier`.
    async fn purge(&self, _identifier: &str) {}
}
