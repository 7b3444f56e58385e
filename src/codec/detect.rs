//! Source format detection by magic bytes.

use crate::error::CodecError;
use crate::format::Format;

/// Bytes needed to recognize every supported signature.
pub const SNIFF_LEN: usize = 16;

const JP2_SIGNATURE: [u8; 12] = [
    0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20, 0x0D, 0x0A, 0x87, 0x0A,
];
const J2K_CODESTREAM: [u8; 4] = [0xFF, 0x4F, 0xFF, 0x51];

/// Identify the format of a source from its leading bytes.
///
/// WebP and JPEG 2000 are recognized so that they can be rejected as
/// unsupported rather than unreadable.
pub fn detect_format(head: &[u8]) -> Result<Format, CodecError> {
    let format = if is_tiff(head) {
        Format::Tif
    } else if head.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Format::Jpg
    } else if head.starts_with(b"\x89PNG\r\n\x1a\n") {
        Format::Png
    } else if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
        Format::Gif
    } else if head.starts_with(b"BM") && head.len() >= 6 {
        Format::Bmp
    } else if head.len() >= 12 && &head[0..4] == b"RIFF" && &head[8..12] == b"WEBP" {
        Format::Webp
    } else if head.starts_with(&JP2_SIGNATURE) || head.starts_with(&J2K_CODESTREAM) {
        Format::Jp2
    } else {
        return Err(CodecError::UnsupportedFormat(
            "unrecognized source signature".to_string(),
        ));
    };

    match format {
        Format::Webp | Format::Jp2 => Err(CodecError::UnsupportedFormat(format!(
            "{} sources are not supported",
            format
        ))),
        supported => Ok(supported),
    }
}

/// Classic (`II*\0`, `MM\0*`) or BigTIFF (`II+\0`, `MM\0+`) header.
pub fn is_tiff(head: &[u8]) -> bool {
    matches!(
        head.get(..4),
        Some(b"II*\0") | Some(b"MM\0*") | Some(b"II+\0") | Some(b"MM\0+")
    )
}
