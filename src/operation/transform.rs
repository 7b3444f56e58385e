use std::sync::Arc;

use image::RgbaImage;

use crate::format::Format;
use crate::geometry::{Dimension, Rectangle};

use super::format_number;

// =============================================================================
// Rotate
// =============================================================================

/// Clockwise rotation in degrees, with an optional horizontal mirror that is
/// applied before rotating.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rotate {
    degrees: f64,
    mirror: bool,
}

impl Rotate {
    /// Create a rotation; angles are normalized into `[0, 360)`.
    pub fn new(degrees: f64, mirror: bool) -> Self {
        let degrees = degrees.rem_euclid(360.0);
        Self { degrees, mirror }
    }

    pub const fn degrees(&self) -> f64 {
        self.degrees
    }

    pub const fn mirror(&self) -> bool {
        self.mirror
    }

    /// True for 0, 90, 180 and 270.
    pub fn is_right_angle(&self) -> bool {
        self.degrees % 90.0 == 0.0
    }

    pub fn has_effect(&self) -> bool {
        self.degrees != 0.0 || self.mirror
    }

    /// Bounding box of the rotated input.
    pub fn resulting_size(&self, input: Dimension) -> Dimension {
        if self.is_right_angle() {
            return if self.degrees == 90.0 || self.degrees == 270.0 {
                input.transposed()
            } else {
                input
            };
        }
        let radians = self.degrees.to_radians();
        let (sin, cos) = (radians.sin().abs(), radians.cos().abs());
        let w = input.width as f64;
        let h = input.height as f64;
        Dimension::new(
            (w * cos + h * sin).round() as u32,
            (w * sin + h * cos).round() as u32,
        )
    }
}

impl std::fmt::Display for Rotate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.mirror {
            f.write_str("!")?;
        }
        f.write_str(&format_number(self.degrees))
    }
}

// =============================================================================
// ColorTransform
// =============================================================================

/// Color reduction. Full color is represented by the absence of a transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorTransform {
    Gray,
    Bitonal,
}

impl ColorTransform {
    pub const fn name(&self) -> &'static str {
        match self {
            ColorTransform::Gray => "gray",
            ColorTransform::Bitonal => "bitonal",
        }
    }
}

impl std::fmt::Display for ColorTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Overlay
// =============================================================================

/// Anchor of a watermark inside the output image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Position {
    TopLeft,
    TopCenter,
    TopRight,
    LeftCenter,
    Center,
    RightCenter,
    BottomLeft,
    BottomCenter,
    #[default]
    BottomRight,
}

impl Position {
    /// Parse names such as `bottom-right`, `bottom right` or `center`.
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace([' ', '_'], "-");
        match normalized.as_str() {
            "top-left" => Some(Position::TopLeft),
            "top-center" | "top" => Some(Position::TopCenter),
            "top-right" => Some(Position::TopRight),
            "left-center" | "left" => Some(Position::LeftCenter),
            "center" => Some(Position::Center),
            "right-center" | "right" => Some(Position::RightCenter),
            "bottom-left" => Some(Position::BottomLeft),
            "bottom-center" | "bottom" => Some(Position::BottomCenter),
            "bottom-right" => Some(Position::BottomRight),
            _ => None,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Position::TopLeft => "top-left",
            Position::TopCenter => "top-center",
            Position::TopRight => "top-right",
            Position::LeftCenter => "left-center",
            Position::Center => "center",
            Position::RightCenter => "right-center",
            Position::BottomLeft => "bottom-left",
            Position::BottomCenter => "bottom-center",
            Position::BottomRight => "bottom-right",
        }
    }

    /// Top-left corner of an `overlay` placed inside `canvas`.
    ///
    /// The inset is clamped so the overlay never starts outside the canvas.
    pub fn origin(&self, canvas: Dimension, overlay: Dimension, inset: u32) -> (u32, u32) {
        let max_x = canvas.width.saturating_sub(overlay.width);
        let max_y = canvas.height.saturating_sub(overlay.height);
        let left = inset.min(max_x);
        let top = inset.min(max_y);
        let right = max_x.saturating_sub(inset);
        let bottom = max_y.saturating_sub(inset);
        let center_x = max_x / 2;
        let center_y = max_y / 2;

        match self {
            Position::TopLeft => (left, top),
            Position::TopCenter => (center_x, top),
            Position::TopRight => (right, top),
            Position::LeftCenter => (left, center_y),
            Position::Center => (center_x, center_y),
            Position::RightCenter => (right, center_y),
            Position::BottomLeft => (left, bottom),
            Position::BottomCenter => (center_x, bottom),
            Position::BottomRight => (right, bottom),
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A named image composited over the output.
///
/// Equality and the fingerprint go by name, position and inset; the pixels
/// behind a name are fixed for the lifetime of the server.
#[derive(Clone)]
pub struct Watermark {
    pub name: String,
    pub image: Arc<RgbaImage>,
    pub position: Position,
    pub inset: u32,
}

impl PartialEq for Watermark {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.position == other.position && self.inset == other.inset
    }
}

impl std::fmt::Debug for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watermark")
            .field("name", &self.name)
            .field("size", &(self.image.width(), self.image.height()))
            .field("position", &self.position)
            .field("inset", &self.inset)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Overlay {
    Watermark(Watermark),

    /// Region in full-image coordinates painted over in black
    Redaction(Rectangle),
}

impl Overlay {
    /// True if the overlay changes any pixel of the cropped `region`.
    pub fn has_effect(&self, region: &Rectangle) -> bool {
        match self {
            Overlay::Watermark(watermark) => {
                watermark.image.width() > 0 && watermark.image.height() > 0
            }
            Overlay::Redaction(rect) => region.intersection(rect).is_some(),
        }
    }
}

impl std::fmt::Display for Overlay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Overlay::Watermark(w) => write!(f, "watermark:{}@{}+{}", w.name, w.position, w.inset),
            Overlay::Redaction(rect) => write!(f, "redact:{}", rect),
        }
    }
}

// =============================================================================
// Encode
// =============================================================================

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Output encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Encode {
    pub format: Format,

    /// JPEG quality, ignored by other formats
    pub quality: u8,

    /// Fill for formats without alpha; white when unset
    pub background: Option<[u8; 3]>,
}

impl Encode {
    pub fn new(format: Format) -> Self {
        Self {
            format,
            quality: DEFAULT_JPEG_QUALITY,
            background: None,
        }
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    pub fn with_background(mut self, rgb: [u8; 3]) -> Self {
        self.background = Some(rgb);
        self
    }
}

impl std::fmt::Display for Encode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.format.extension())?;
        if self.format == Format::Jpg {
            write!(f, "@{}", self.quality)?;
        }
        if let Some([r, g, b]) = self.background {
            write!(f, "#{:02x}{:02x}{:02x}", r, g, b)?;
        }
        Ok(())
    }
}
