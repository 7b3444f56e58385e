//! Image formats known to the server, for sources and for output.

use serde::{Deserialize, Serialize};

/// An image format, identified by its IIIF extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Jpg,
    Png,
    Gif,
    Tif,
    Bmp,
    Webp,
    Jp2,
}

impl Format {
    /// Formats the pipeline can encode, in the order advertised by info.json.
    pub const OUTPUT: [Format; 5] = [
        Format::Jpg,
        Format::Png,
        Format::Gif,
        Format::Tif,
        Format::Bmp,
    ];

    /// Parse an output extension as it appears in a request URI.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Format::Jpg),
            "png" => Some(Format::Png),
            "gif" => Some(Format::Gif),
            "tif" | "tiff" => Some(Format::Tif),
            "bmp" => Some(Format::Bmp),
            "webp" => Some(Format::Webp),
            "jp2" => Some(Format::Jp2),
            _ => None,
        }
    }

    pub const fn extension(&self) -> &'static str {
        match self {
            Format::Jpg => "jpg",
            Format::Png => "png",
            Format::Gif => "gif",
            Format::Tif => "tif",
            Format::Bmp => "bmp",
            Format::Webp => "webp",
            Format::Jp2 => "jp2",
        }
    }

    pub const fn media_type(&self) -> &'static str {
        match self {
            Format::Jpg => "image/jpeg",
            Format::Png => "image/png",
            Format::Gif => "image/gif",
            Format::Tif => "image/tiff",
            Format::Bmp => "image/bmp",
            Format::Webp => "image/webp",
            Format::Jp2 => "image/jp2",
        }
    }

    /// True if the pipeline can encode this format.
    pub fn is_output_supported(&self) -> bool {
        Self::OUTPUT.contains(self)
    }

    /// True if the format carries an alpha channel.
    pub const fn supports_transparency(&self) -> bool {
        matches!(self, Format::Png | Format::Gif | Format::Tif)
    }

    /// The matching `image` crate encoder, if one is compiled in.
    pub fn image_format(&self) -> Option<image::ImageFormat> {
        match self {
            Format::Jpg => Some(image::ImageFormat::Jpeg),
            Format::Png => Some(image::ImageFormat::Png),
            Format::Gif => Some(image::ImageFormat::Gif),
            Format::Tif => Some(image::ImageFormat::Tiff),
            Format::Bmp => Some(image::ImageFormat::Bmp),
            Format::Webp | Format::Jp2 => None,
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}
