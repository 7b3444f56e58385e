//! Single-tier sources decoded whole by the `image` crate.

use std::io::Cursor;

use bytes::Bytes;
use image::{DynamicImage, ImageReader};

use crate::error::CodecError;
use crate::format::Format;
use crate::geometry::{Dimension, Rectangle};

/// Encoded bytes of a raster source plus its header-derived size.
#[derive(Debug, Clone)]
pub struct RasterImage {
    bytes: Bytes,
    format: Format,
    size: Dimension,
}

impl RasterImage {
    /// Read the image header without decoding pixels.
    pub fn probe(bytes: Bytes, format: Format) -> Result<Self, CodecError> {
        let image_format = format
            .image_format()
            .ok_or_else(|| CodecError::UnsupportedFormat(format!("{} sources", format)))?;
        let (width, height) = ImageReader::with_format(Cursor::new(&bytes[..]), image_format)
            .into_dimensions()
            .map_err(|e| CodecError::Malformed(format!("{} header: {}", format, e)))?;
        if width == 0 || height == 0 {
            return Err(CodecError::Malformed(format!("{} has no pixels", format)));
        }
        Ok(Self {
            bytes,
            format,
            size: Dimension::new(width, height),
        })
    }

    pub fn size(&self) -> Dimension {
        self.size
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Decode the whole image and cut out `region`.
    pub fn decode_region(&self, region: Rectangle) -> Result<DynamicImage, CodecError> {
        let region = region
            .clamp_to(self.size)
            .ok_or_else(|| CodecError::Decode(format!("region {:?} outside image", region)))?;
        let image_format = self
            .format
            .image_format()
            .ok_or_else(|| CodecError::UnsupportedFormat(format!("{} sources", self.format)))?;

        let image = image::load_from_memory_with_format(&self.bytes, image_format)
            .map_err(|e| CodecError::Decode(format!("{}: {}", self.format, e)))?;
        if region == Rectangle::from_size(self.size) {
            return Ok(image);
        }
        Ok(image.crop_imm(region.x, region.y, region.width, region.height))
    }
}
