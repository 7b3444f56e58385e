//! Tiled multi-resolution TIFFs.
//!
//! Every tiled directory whose size is a power-of-two reduction of the
//! largest one (and whose aspect ratio matches it) becomes a tier. Label,
//! macro and thumbnail directories fail one of those tests and are ignored.

use bytes::Bytes;
use image::{imageops, DynamicImage, RgbImage};
use tracing::debug;

use super::header::{TiffHeader, BIGTIFF_HEADER_SIZE};
use super::ifd::*;
use crate::codec::jpeg::prepare_tile_jpeg;
use crate::error::CodecError;
use crate::geometry::{Dimension, Rectangle};
use crate::io::RangeReader;

/// Safety limit on the directory chain.
const MAX_IFDS: usize = 256;

/// Allowed relative deviation from an exact power-of-two downsample.
const DOWNSAMPLE_TOLERANCE: f64 = 0.2;

/// Allowed relative deviation between horizontal and vertical downsample.
const ASPECT_TOLERANCE: f64 = 0.05;

// =============================================================================
// TiffLevel
// =============================================================================

/// One tier of the pyramid with its tile index loaded.
#[derive(Debug, Clone)]
pub struct TiffLevel {
    pub size: Dimension,
    pub tile_size: Dimension,
    pub tiles_across: u32,
    pub tiles_down: u32,
    compression: u16,
    offsets: Vec<u64>,
    byte_counts: Vec<u64>,
    jpeg_tables: Option<Bytes>,
}

impl TiffLevel {
    /// Tile grid rectangle, in level pixels, of tile `(column, row)`.
    fn tile_rect(&self, column: u32, row: u32) -> Rectangle {
        Rectangle::new(
            column * self.tile_size.width,
            row * self.tile_size.height,
            self.tile_size.width,
            self.tile_size.height,
        )
    }

    fn tile_location(&self, column: u32, row: u32) -> Option<(u64, usize)> {
        let index = (row as usize) * (self.tiles_across as usize) + column as usize;
        let offset = *self.offsets.get(index)?;
        let count = usize::try_from(*self.byte_counts.get(index)?).ok()?;
        Some((offset, count))
    }
}

/// Candidate directory before its arrays are loaded.
struct Candidate {
    ifd: Ifd,
    size: Dimension,
    tile_size: Dimension,
    compression: u16,
}

impl Candidate {
    fn from_ifd(ifd: Ifd, header: &TiffHeader) -> Option<Self> {
        let size = Dimension::new(
            ifd.dimension(TAG_IMAGE_WIDTH, header)?,
            ifd.dimension(TAG_IMAGE_LENGTH, header)?,
        );
        let tile_size = Dimension::new(
            ifd.dimension(TAG_TILE_WIDTH, header)?,
            ifd.dimension(TAG_TILE_LENGTH, header)?,
        );
        ifd.entry(TAG_TILE_OFFSETS)?;
        ifd.entry(TAG_TILE_BYTE_COUNTS)?;

        let compression = ifd
            .integer(TAG_COMPRESSION, header)
            .and_then(|value| u16::try_from(value).ok())
            .unwrap_or(COMPRESSION_NONE);
        let decodable = match compression {
            COMPRESSION_JPEG => true,
            // Uncompressed tiles are only understood as 8-bit RGB
            COMPRESSION_NONE => {
                ifd.integer(TAG_SAMPLES_PER_PIXEL, header).unwrap_or(1) == 3
                    && ifd.integer(TAG_BITS_PER_SAMPLE, header).unwrap_or(1) == 8
            }
            _ => false,
        };
        decodable.then_some(Self {
            ifd,
            size,
            tile_size,
            compression,
        })
    }
}

fn is_power_of_two_reduction(base: Dimension, level: Dimension) -> bool {
    let dx = base.width as f64 / level.width as f64;
    let dy = base.height as f64 / level.height as f64;
    if ((dx - dy) / dx).abs() > ASPECT_TOLERANCE {
        return false;
    }
    let expected = 2f64.powf(dx.log2().round());
    (dx / expected - 1.0).abs() < DOWNSAMPLE_TOLERANCE
}

// =============================================================================
// TiffPyramid
// =============================================================================

/// The tiers of a tiled TIFF, largest first.
#[derive(Debug, Clone)]
pub struct TiffPyramid {
    header: TiffHeader,
    levels: Vec<TiffLevel>,
}

impl TiffPyramid {
    /// Walk the directory chain and load the tile index of every tier.
    ///
    /// A TIFF without decodable tiled directories yields an empty pyramid;
    /// the caller decides how to fall back.
    pub async fn open(reader: &dyn RangeReader) -> Result<Self, CodecError> {
        let head_len = BIGTIFF_HEADER_SIZE.min(reader.size() as usize);
        let head = reader.read_exact_at(0, head_len).await?;
        let header = TiffHeader::parse(&head, reader.size())?;

        let mut candidates = Vec::new();
        let mut offset = header.first_ifd_offset;
        let mut seen = 0;
        while offset != 0 && seen < MAX_IFDS {
            let ifd = Ifd::read(reader, &header, offset).await?;
            offset = ifd.next_offset;
            seen += 1;
            if let Some(candidate) = Candidate::from_ifd(ifd, &header) {
                candidates.push(candidate);
            }
        }

        candidates.sort_by_key(|c| std::cmp::Reverse(c.size.area()));
        let mut levels: Vec<TiffLevel> = Vec::new();
        for candidate in candidates {
            if let Some(base) = levels.first() {
                let previous = levels.last().map(|l| l.size).unwrap_or(base.size);
                if candidate.size == previous
                    || !is_power_of_two_reduction(base.size, candidate.size)
                {
                    continue;
                }
            }
            levels.push(Self::load_level(reader, &header, candidate).await?);
        }

        debug!(
            source = reader.identifier(),
            tiers = levels.len(),
            bigtiff = header.is_bigtiff,
            "Parsed TIFF pyramid"
        );
        Ok(Self { header, levels })
    }

    async fn load_level(
        reader: &dyn RangeReader,
        header: &TiffHeader,
        candidate: Candidate,
    ) -> Result<TiffLevel, CodecError> {
        let Candidate {
            ifd,
            size,
            tile_size,
            compression,
        } = candidate;
        let tiles_across = size.width.div_ceil(tile_size.width);
        let tiles_down = size.height.div_ceil(tile_size.height);
        let tile_count = tiles_across as usize * tiles_down as usize;

        let mut arrays = Vec::with_capacity(2);
        for tag in [TAG_TILE_OFFSETS, TAG_TILE_BYTE_COUNTS] {
            let entry = ifd
                .entry(tag)
                .ok_or_else(|| CodecError::Malformed(format!("missing tag {}", tag)))?;
            let values = entry.read_integers(reader, header).await?;
            if values.len() < tile_count {
                return Err(CodecError::Malformed(format!(
                    "tag {} has {} values for {} tiles",
                    tag,
                    values.len(),
                    tile_count
                )));
            }
            arrays.push(values);
        }
        let byte_counts = arrays.pop().unwrap_or_default();
        let offsets = arrays.pop().unwrap_or_default();

        let jpeg_tables = match ifd.entry(TAG_JPEG_TABLES) {
            Some(entry) if compression == COMPRESSION_JPEG => {
                Some(entry.read_bytes(reader, header).await?)
            }
            _ => None,
        };

        Ok(TiffLevel {
            size,
            tile_size,
            tiles_across,
            tiles_down,
            compression,
            offsets,
            byte_counts,
            jpeg_tables,
        })
    }

    pub fn header(&self) -> &TiffHeader {
        &self.header
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn levels(&self) -> &[TiffLevel] {
        &self.levels
    }

    pub fn tier_sizes(&self) -> Vec<Dimension> {
        self.levels.iter().map(|level| level.size).collect()
    }

    pub fn level(&self, tier: usize) -> Result<&TiffLevel, CodecError> {
        self.levels.get(tier).ok_or(CodecError::InvalidTier {
            tier,
            count: self.levels.len(),
        })
    }

    /// Fetch the compressed tiles covering `region` (tier-local pixels).
    pub async fn fetch_tiles(
        &self,
        reader: &dyn RangeReader,
        tier: usize,
        region: Rectangle,
    ) -> Result<TileSet, CodecError> {
        let level = self.level(tier)?;
        let region = region
            .clamp_to(level.size)
            .ok_or_else(|| CodecError::Decode(format!("region {:?} outside tier {}", region, tier)))?;

        let tw = level.tile_size.width;
        let th = level.tile_size.height;
        let columns = region.x / tw..=(region.x + region.width - 1) / tw;
        let rows = region.y / th..=(region.y + region.height - 1) / th;

        let mut tiles = Vec::new();
        for row in rows {
            for column in columns.clone() {
                let (offset, len) = level.tile_location(column, row).ok_or_else(|| {
                    CodecError::Malformed(format!("no tile {},{} in tier {}", column, row, tier))
                })?;
                let data = reader.read_exact_at(offset, len).await?;
                tiles.push((level.tile_rect(column, row), data));
            }
        }

        debug!(
            source = reader.identifier(),
            tier,
            tiles = tiles.len(),
            "Fetched covering tiles"
        );
        Ok(TileSet {
            region,
            tile_size: level.tile_size,
            compression: level.compression,
            jpeg_tables: level.jpeg_tables.clone(),
            tiles,
        })
    }
}

// =============================================================================
// TileSet
// =============================================================================

/// Compressed tiles covering a region, ready to be decoded off the runtime.
#[derive(Debug, Clone)]
pub struct TileSet {
    region: Rectangle,
    tile_size: Dimension,
    compression: u16,
    jpeg_tables: Option<Bytes>,
    tiles: Vec<(Rectangle, Bytes)>,
}

impl TileSet {
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Decode every tile and paste its overlap with the region into one image.
    pub fn composite(&self) -> Result<DynamicImage, CodecError> {
        let mut canvas = RgbImage::new(self.region.width, self.region.height);

        for (rect, data) in &self.tiles {
            let tile = self.decode_tile(data)?;
            // Decoded edge tiles may be smaller than the nominal tile size
            let actual = Rectangle::new(rect.x, rect.y, tile.width(), tile.height());
            let Some(overlap) = actual.intersection(&self.region) else {
                continue;
            };
            let piece = imageops::crop_imm(
                &tile,
                overlap.x - rect.x,
                overlap.y - rect.y,
                overlap.width,
                overlap.height,
            )
            .to_image();
            imageops::replace(
                &mut canvas,
                &piece,
                i64::from(overlap.x - self.region.x),
                i64::from(overlap.y - self.region.y),
            );
        }

        Ok(DynamicImage::ImageRgb8(canvas))
    }

    fn decode_tile(&self, data: &[u8]) -> Result<RgbImage, CodecError> {
        match self.compression {
            COMPRESSION_JPEG => {
                let stream = prepare_tile_jpeg(self.jpeg_tables.as_deref(), data);
                image::load_from_memory_with_format(&stream, image::ImageFormat::Jpeg)
                    .map(|image| image.to_rgb8())
                    .map_err(|e| CodecError::Decode(format!("JPEG tile: {}", e)))
            }
            _ => RgbImage::from_raw(self.tile_size.width, self.tile_size.height, data.to_vec())
                .ok_or_else(|| {
                    CodecError::Decode(format!(
                        "uncompressed tile holds {} bytes, expected {}",
                        data.len(),
                        self.tile_size.area() * 3
                    ))
                }),
        }
    }
}
