//! TIFF and BigTIFF file headers.
//!
//! ```text
//! Classic (8 bytes):  II|MM  42  first-IFD:u32
//! BigTIFF (16 bytes): II|MM  43  8  0  first-IFD:u64
//! ```

use crate::error::CodecError;

pub const TIFF_HEADER_SIZE: usize = 8;
pub const BIGTIFF_HEADER_SIZE: usize = 16;

const VERSION_TIFF: u16 = 42;
const VERSION_BIGTIFF: u16 = 43;

/// Endianness declared by the first two header bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

impl ByteOrder {
    /// Read a u16 from the first two bytes of `bytes`.
    pub fn read_u16(self, bytes: &[u8]) -> Result<u16, CodecError> {
        let raw: [u8; 2] = take(bytes)?;
        Ok(match self {
            ByteOrder::LittleEndian => u16::from_le_bytes(raw),
            ByteOrder::BigEndian => u16::from_be_bytes(raw),
        })
    }

    pub fn read_u32(self, bytes: &[u8]) -> Result<u32, CodecError> {
        let raw: [u8; 4] = take(bytes)?;
        Ok(match self {
            ByteOrder::LittleEndian => u32::from_le_bytes(raw),
            ByteOrder::BigEndian => u32::from_be_bytes(raw),
        })
    }

    pub fn read_u64(self, bytes: &[u8]) -> Result<u64, CodecError> {
        let raw: [u8; 8] = take(bytes)?;
        Ok(match self {
            ByteOrder::LittleEndian => u64::from_le_bytes(raw),
            ByteOrder::BigEndian => u64::from_be_bytes(raw),
        })
    }
}

fn take<const N: usize>(bytes: &[u8]) -> Result<[u8; N], CodecError> {
    bytes
        .get(..N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| CodecError::Malformed(format!("truncated TIFF value ({} bytes)", bytes.len())))
}

/// Parsed TIFF header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    pub byte_order: ByteOrder,
    pub is_bigtiff: bool,
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    /// Parse from at least 8 (classic) or 16 (BigTIFF) leading bytes.
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self, CodecError> {
        if bytes.len() < TIFF_HEADER_SIZE {
            return Err(CodecError::Malformed(format!(
                "file too small for a TIFF header: {} bytes",
                bytes.len()
            )));
        }

        let byte_order = match &bytes[0..2] {
            b"II" => ByteOrder::LittleEndian,
            b"MM" => ByteOrder::BigEndian,
            other => {
                return Err(CodecError::Malformed(format!(
                    "bad TIFF byte order marker {:02X}{:02X}",
                    other[0], other[1]
                )))
            }
        };

        let (is_bigtiff, first_ifd_offset) = match byte_order.read_u16(&bytes[2..])? {
            VERSION_TIFF => (false, u64::from(byte_order.read_u32(&bytes[4..])?)),
            VERSION_BIGTIFF => {
                if bytes.len() < BIGTIFF_HEADER_SIZE {
                    return Err(CodecError::Malformed("truncated BigTIFF header".to_string()));
                }
                let offset_size = byte_order.read_u16(&bytes[4..])?;
                if offset_size != 8 {
                    return Err(CodecError::Malformed(format!(
                        "BigTIFF offset size must be 8, got {}",
                        offset_size
                    )));
                }
                (true, byte_order.read_u64(&bytes[8..])?)
            }
            version => {
                return Err(CodecError::Malformed(format!(
                    "unknown TIFF version {}",
                    version
                )))
            }
        };

        if first_ifd_offset == 0 || first_ifd_offset >= file_size {
            return Err(CodecError::Malformed(format!(
                "first IFD offset {} outside file of {} bytes",
                first_ifd_offset, file_size
            )));
        }

        Ok(Self {
            byte_order,
            is_bigtiff,
            first_ifd_offset,
        })
    }

    /// Bytes per directory entry: 12 classic, 20 BigTIFF.
    pub const fn entry_size(&self) -> usize {
        if self.is_bigtiff {
            20
        } else {
            12
        }
    }

    /// Width of the entry-count field that opens a directory.
    pub const fn count_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            2
        }
    }

    /// Width of offsets, including the next-directory pointer and the
    /// value/offset field of an entry.
    pub const fn offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }

    pub fn read_offset(&self, bytes: &[u8]) -> Result<u64, CodecError> {
        if self.is_bigtiff {
            self.byte_order.read_u64(bytes)
        } else {
            self.byte_order.read_u32(bytes).map(u64::from)
        }
    }
}
