use crate::error::ImageError;
use crate::geometry::{Dimension, Rectangle, ScaleConstraint};

use super::format_number;

/// Region selection.
///
/// Pixel and percent crops keep their original form until they are resolved
/// against a concrete full size, because a scale-constrained virtual image
/// has a different coordinate space than its source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Crop {
    /// The whole image
    Full,

    /// The largest centered square
    Square,

    /// Pixel region in virtual image coordinates
    Pixels(Rectangle),

    /// Percent region; each value is a fraction (0..1) of the image size
    Percent {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
}

impl Crop {
    /// Region in full-resolution pixels, before clipping to the image.
    pub fn unclipped_rectangle(&self, full_size: Dimension, sc: &ScaleConstraint) -> Rectangle {
        match *self {
            Crop::Full => Rectangle::from_size(full_size),
            Crop::Square => {
                let side = full_size.width.min(full_size.height);
                Rectangle::new(
                    (full_size.width - side) / 2,
                    (full_size.height - side) / 2,
                    side,
                    side,
                )
            }
            Crop::Pixels(rect) => {
                if sc.has_effect() {
                    rect.scaled(1.0 / sc.ratio())
                } else {
                    rect
                }
            }
            Crop::Percent {
                x,
                y,
                width,
                height,
            } => {
                let fw = full_size.width as f64;
                let fh = full_size.height as f64;
                Rectangle::new(
                    (fw * x).floor() as u32,
                    (fh * y).floor() as u32,
                    (fw * width).round() as u32,
                    (fh * height).round() as u32,
                )
            }
        }
    }

    /// Region in full-resolution pixels, clipped to the image.
    ///
    /// A region that does not intersect the image is an
    /// [`ImageError::EmptyResult`].
    pub fn resolve(
        &self,
        full_size: Dimension,
        sc: &ScaleConstraint,
    ) -> Result<Rectangle, ImageError> {
        self.unclipped_rectangle(full_size, sc)
            .clamp_to(full_size)
            .ok_or(ImageError::EmptyResult)
    }

    /// Size of the resolved region; empty when the region misses the image.
    pub fn resulting_size(&self, full_size: Dimension, sc: &ScaleConstraint) -> Dimension {
        self.resolve(full_size, sc)
            .map(|rect| rect.size())
            .unwrap_or_default()
    }

    /// True unless the crop resolves to the whole image.
    pub fn has_effect(&self, full_size: Dimension, sc: &ScaleConstraint) -> bool {
        match self {
            Crop::Full => false,
            _ => self
                .resolve(full_size, sc)
                .map(|rect| rect != Rectangle::from_size(full_size))
                .unwrap_or(true),
        }
    }
}

impl std::fmt::Display for Crop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Crop::Full => f.write_str("full"),
            Crop::Square => f.write_str("square"),
            Crop::Pixels(rect) => write!(f, "{}", rect),
            Crop::Percent {
                x,
                y,
                width,
                height,
            } => write!(
                f,
                "pct:{},{},{},{}",
                format_number(x * 100.0),
                format_number(y * 100.0),
                format_number(width * 100.0),
                format_number(height * 100.0)
            ),
        }
    }
}
