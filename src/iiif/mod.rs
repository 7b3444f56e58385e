//! IIIF Image API 2.x and 3.x surface: request grammar, info documents and
//! canonical URIs.

pub mod info;
pub mod request;
pub mod uri;

use serde::Serialize;

pub use info::{info_document, InfoOptions};
pub use request::{parse, ImageRequest};
pub use uri::{canonical_path, identifier_segment};

/// Major version of the IIIF Image API a request was made against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ApiVersion {
    V2,
    V3,
}

impl ApiVersion {
    /// Parse the version path segment (`2` or `3`).
    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "2" => Some(ApiVersion::V2),
            "3" => Some(ApiVersion::V3),
            _ => None,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            ApiVersion::V2 => "2",
            ApiVersion::V3 => "3",
        }
    }

    /// JSON-LD context of info documents.
    pub const fn context(&self) -> &'static str {
        match self {
            ApiVersion::V2 => "http://iiif.io/api/image/2/context.json",
            ApiVersion::V3 => "http://iiif.io/api/image/3/context.json",
        }
    }

    /// Media type of info documents.
    pub const fn info_media_type(&self) -> &'static str {
        match self {
            ApiVersion::V2 => "application/json",
            ApiVersion::V3 => "application/ld+json;profile=\"http://iiif.io/api/image/3/context.json\"",
        }
    }
}

impl std::fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
