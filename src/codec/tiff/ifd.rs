//! Image File Directories and the values their entries point at.
//!
//! Small values live inline in the entry's value/offset field; larger ones
//! (tile offset arrays, `JPEGTables`) are fetched from the file in a single
//! range read.

use bytes::Bytes;

use super::header::TiffHeader;
use crate::error::CodecError;
use crate::io::RangeReader;

/// Upper bound on entries per directory; real files carry a few dozen.
const MAX_ENTRIES: u64 = 4096;

// =============================================================================
// Tags and field types
// =============================================================================

pub const TAG_IMAGE_WIDTH: u16 = 256;
pub const TAG_IMAGE_LENGTH: u16 = 257;
pub const TAG_BITS_PER_SAMPLE: u16 = 258;
pub const TAG_COMPRESSION: u16 = 259;
pub const TAG_PHOTOMETRIC: u16 = 262;
pub const TAG_SAMPLES_PER_PIXEL: u16 = 277;
pub const TAG_TILE_WIDTH: u16 = 322;
pub const TAG_TILE_LENGTH: u16 = 323;
pub const TAG_TILE_OFFSETS: u16 = 324;
pub const TAG_TILE_BYTE_COUNTS: u16 = 325;
pub const TAG_JPEG_TABLES: u16 = 347;

pub const COMPRESSION_NONE: u16 = 1;
pub const COMPRESSION_JPEG: u16 = 7;

/// Field types used by the tags above.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Byte,
    Ascii,
    Short,
    Long,
    Undefined,
    Long8,
}

impl FieldType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(FieldType::Byte),
            2 => Some(FieldType::Ascii),
            3 => Some(FieldType::Short),
            4 => Some(FieldType::Long),
            7 => Some(FieldType::Undefined),
            16 => Some(FieldType::Long8),
            _ => None,
        }
    }

    pub const fn size(self) -> usize {
        match self {
            FieldType::Byte | FieldType::Ascii | FieldType::Undefined => 1,
            FieldType::Short => 2,
            FieldType::Long => 4,
            FieldType::Long8 => 8,
        }
    }
}

// =============================================================================
// Entries
// =============================================================================

/// One directory entry. Unknown field types are kept so that the rest of the
/// directory still parses; reading them fails.
#[derive(Debug, Clone)]
pub struct IfdEntry {
    pub tag: u16,
    pub field_type: Option<FieldType>,
    pub count: u64,
    /// Raw value/offset field (4 or 8 bytes)
    pub value: [u8; 8],
}

impl IfdEntry {
    fn byte_len(&self) -> Result<usize, CodecError> {
        let field_type = self.field_type.ok_or_else(|| {
            CodecError::Malformed(format!("tag {} has an unknown field type", self.tag))
        })?;
        usize::try_from(self.count)
            .ok()
            .and_then(|count| count.checked_mul(field_type.size()))
            .ok_or_else(|| CodecError::Malformed(format!("tag {} count overflows", self.tag)))
    }

    /// Fetch the raw bytes of this entry's value.
    pub async fn read_bytes(
        &self,
        reader: &dyn RangeReader,
        header: &TiffHeader,
    ) -> Result<Bytes, CodecError> {
        let len = self.byte_len()?;
        if len <= header.offset_size() {
            return Ok(Bytes::copy_from_slice(&self.value[..len]));
        }
        let offset = header.read_offset(&self.value)?;
        Ok(reader.read_exact_at(offset, len).await?)
    }

    /// Read every value of an integer-typed entry, widened to u64.
    pub async fn read_integers(
        &self,
        reader: &dyn RangeReader,
        header: &TiffHeader,
    ) -> Result<Vec<u64>, CodecError> {
        let bytes = self.read_bytes(reader, header).await?;
        let order = header.byte_order;
        let width = match self.field_type {
            Some(FieldType::Byte) => 1,
            Some(FieldType::Short) => 2,
            Some(FieldType::Long) => 4,
            Some(FieldType::Long8) => 8,
            other => {
                return Err(CodecError::Malformed(format!(
                    "tag {} is not an integer ({:?})",
                    self.tag, other
                )))
            }
        };
        bytes
            .chunks_exact(width)
            .map(|chunk| match width {
                1 => Ok(u64::from(chunk[0])),
                2 => order.read_u16(chunk).map(u64::from),
                4 => order.read_u32(chunk).map(u64::from),
                _ => order.read_u64(chunk),
            })
            .collect()
    }

    /// First value of a single-valued integer entry stored inline.
    pub fn inline_integer(&self, header: &TiffHeader) -> Option<u64> {
        if self.count == 0 {
            return None;
        }
        let order = header.byte_order;
        match self.field_type? {
            FieldType::Byte => Some(u64::from(self.value[0])),
            FieldType::Short => order.read_u16(&self.value).ok().map(u64::from),
            FieldType::Long => order.read_u32(&self.value).ok().map(u64::from),
            FieldType::Long8 if header.is_bigtiff => order.read_u64(&self.value).ok(),
            _ => None,
        }
    }
}

// =============================================================================
// Directories
// =============================================================================

#[derive(Debug, Clone)]
pub struct Ifd {
    pub entries: Vec<IfdEntry>,
    pub next_offset: u64,
}

impl Ifd {
    /// Read the directory at `offset`.
    pub async fn read(
        reader: &dyn RangeReader,
        header: &TiffHeader,
        offset: u64,
    ) -> Result<Self, CodecError> {
        let count_bytes = reader.read_exact_at(offset, header.count_size()).await?;
        let count = if header.is_bigtiff {
            header.byte_order.read_u64(&count_bytes)?
        } else {
            u64::from(header.byte_order.read_u16(&count_bytes)?)
        };
        if count > MAX_ENTRIES {
            return Err(CodecError::Malformed(format!(
                "IFD at {} claims {} entries",
                offset, count
            )));
        }

        let body_len = count as usize * header.entry_size() + header.offset_size();
        let body = reader
            .read_exact_at(offset + header.count_size() as u64, body_len)
            .await?;
        Self::parse(&body, count as usize, header)
    }

    fn parse(body: &[u8], count: usize, header: &TiffHeader) -> Result<Self, CodecError> {
        let order = header.byte_order;
        let entry_size = header.entry_size();
        let mut entries = Vec::with_capacity(count);

        for raw in body.chunks_exact(entry_size).take(count) {
            let tag = order.read_u16(raw)?;
            let field_type = FieldType::from_u16(order.read_u16(&raw[2..])?);
            let (count, value_at) = if header.is_bigtiff {
                (order.read_u64(&raw[4..])?, 12)
            } else {
                (u64::from(order.read_u32(&raw[4..])?), 8)
            };
            let mut value = [0u8; 8];
            let field = &raw[value_at..value_at + header.offset_size()];
            value[..field.len()].copy_from_slice(field);
            entries.push(IfdEntry {
                tag,
                field_type,
                count,
                value,
            });
        }

        let next_offset = header.read_offset(&body[count * entry_size..])?;
        Ok(Self {
            entries,
            next_offset,
        })
    }

    pub fn entry(&self, tag: u16) -> Option<&IfdEntry> {
        self.entries.iter().find(|entry| entry.tag == tag)
    }

    /// Inline integer value of `tag`, if present.
    pub fn integer(&self, tag: u16, header: &TiffHeader) -> Option<u64> {
        self.entry(tag)?.inline_integer(header)
    }

    pub fn dimension(&self, tag: u16, header: &TiffHeader) -> Option<u32> {
        self.integer(tag, header)
            .and_then(|value| u32::try_from(value).ok())
            .filter(|value| *value > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tiff::header::ByteOrder;
    use crate::io::MemoryReader;

    fn classic_le() -> TiffHeader {
        TiffHeader {
            byte_order: ByteOrder::LittleEndian,
            is_bigtiff: false,
            first_ifd_offset: 8,
        }
    }

    fn entry_bytes(tag: u16, field_type: u16, count: u32, value: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&field_type.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&value.to_le_bytes());
        out
    }

    #[tokio::test]
    async fn test_read_directory_with_offset_array() {
        let mut file = b"II*\0\x08\0\0\0".to_vec();
        file.extend_from_slice(&3u16.to_le_bytes());
        file.extend(entry_bytes(TAG_IMAGE_WIDTH, 3, 1, 640));
        file.extend(entry_bytes(TAG_COMPRESSION, 3, 1, 7));
        // Four LONG offsets stored after the directory
        file.extend(entry_bytes(TAG_TILE_OFFSETS, 4, 4, 50));
        file.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(file.len(), 50);
        for value in [100u32, 200, 300, 400] {
            file.extend_from_slice(&value.to_le_bytes());
        }

        let reader = MemoryReader::new(file, "mem://dir.tif");
        let header = classic_le();
        let ifd = Ifd::read(&reader, &header, 8).await.unwrap();

        assert_eq!(ifd.entries.len(), 3);
        assert_eq!(ifd.next_offset, 0);
        assert_eq!(ifd.dimension(TAG_IMAGE_WIDTH, &header), Some(640));
        assert_eq!(ifd.integer(TAG_COMPRESSION, &header), Some(7));
        assert!(ifd.entry(TAG_JPEG_TABLES).is_none());

        let offsets = ifd
            .entry(TAG_TILE_OFFSETS)
            .unwrap()
            .read_integers(&reader, &header)
            .await
            .unwrap();
        assert_eq!(offsets, vec![100, 200, 300, 400]);
    }

    #[tokio::test]
    async fn test_inline_short_array() {
        let header = classic_le();
        let entry = IfdEntry {
            tag: TAG_BITS_PER_SAMPLE,
            field_type: Some(FieldType::Short),
            count: 2,
            value: [8, 0, 16, 0, 0, 0, 0, 0],
        };
        let reader = MemoryReader::new(Vec::new(), "mem://empty");
        assert_eq!(entry.read_integers(&reader, &header).await.unwrap(), vec![8, 16]);
    }

    #[test]
    fn test_unknown_field_type_is_kept() {
        let header = classic_le();
        let mut body = Vec::new();
        body.extend(entry_bytes(999, 12, 1, 0));
        body.extend_from_slice(&0u32.to_le_bytes());
        let ifd = Ifd::parse(&body, 1, &header).unwrap();
        assert!(ifd.entries[0].field_type.is_none());
        assert_eq!(ifd.integer(999, &header), None);
    }
}
