//! TIFF and BigTIFF containers read over a [`RangeReader`](crate::io::RangeReader).
//!
//! Only the header, the directory chain, the tile index arrays and the
//! tiles covering a request are ever fetched.

mod header;
mod ifd;
mod pyramid;

pub use header::{ByteOrder, TiffHeader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE};
pub use ifd::{FieldType, Ifd, IfdEntry, COMPRESSION_JPEG, COMPRESSION_NONE};
pub use pyramid::{TiffLevel, TiffPyramid, TileSet};

#[cfg(test)]
pub(crate) use pyramid::fixture;
