//! Abbreviated JPEG streams inside TIFF tiles.
//!
//! Tiled TIFFs often store the quantization and Huffman tables once, in the
//! `JPEGTables` tag, and write each tile as an abbreviated stream that starts
//! scanning right after SOI. Such a tile only decodes once the shared tables
//! are spliced in:
//!
//! ```text
//! tables: SOI DQT DHT ... EOI
//! tile:   SOI SOF SOS <scan> EOI
//! merged: SOI DQT DHT ... SOF SOS <scan> EOI
//! ```

use bytes::{Bytes, BytesMut};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];
const DHT: u8 = 0xC4;
const DQT: u8 = 0xDB;
const SOS: u8 = 0xDA;

/// Whether a stream defines its own quantization or Huffman tables before
/// the first scan. `None` if the data is not a JPEG stream at all.
fn defines_tables(data: &[u8]) -> Option<bool> {
    if data.len() < 4 || data[..2] != SOI {
        return None;
    }
    let mut pos = 2;
    while pos + 3 < data.len() {
        if data[pos] != 0xFF {
            pos += 1;
            continue;
        }
        match data[pos + 1] {
            DQT | DHT => return Some(true),
            SOS => return Some(false),
            // Fill bytes and standalone markers have no length field
            0xFF | 0x00 | 0x01 | 0xD0..=0xD9 => pos += 2,
            _ => {
                let len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
                pos += 2 + len;
            }
        }
    }
    Some(false)
}

/// Splice `tables` into an abbreviated `tile` stream.
pub fn merge_jpeg_tables(tables: &[u8], tile: &[u8]) -> Bytes {
    if tables.is_empty() {
        return Bytes::copy_from_slice(tile);
    }
    let tables = tables.strip_suffix(&EOI).unwrap_or(tables);
    let tile = tile.strip_prefix(&SOI).unwrap_or(tile);

    let mut merged = BytesMut::with_capacity(tables.len() + tile.len());
    merged.extend_from_slice(tables);
    merged.extend_from_slice(tile);
    merged.freeze()
}

/// Return a self-contained JPEG stream for a tile, merging the level's
/// shared tables only when the tile lacks its own.
pub fn prepare_tile_jpeg(tables: Option<&[u8]>, tile: &[u8]) -> Bytes {
    match (tables, defines_tables(tile)) {
        (Some(tables), Some(false)) => merge_jpeg_tables(tables, tile),
        _ => Bytes::copy_from_slice(tile),
    }
}
