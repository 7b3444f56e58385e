//! Pixel geometry value types.
//!
//! Everything here is a small `Copy` value with no interior mutability:
//! - [`Dimension`]: width and height of an image or tier
//! - [`Rectangle`]: a pixel region with a non-negative origin
//! - [`ScaleConstraint`]: a reduced rational `n:d` with `1 <= n <= d`
//! - [`ReductionFactor`]: the power-of-two tier reduction `2^-n`

use serde::{Deserialize, Serialize};

use crate::error::{Component, ParseError};

// =============================================================================
// Dimension
// =============================================================================

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimension {
    pub width: u32,
    pub height: u32,
}

impl Dimension {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True if either side is zero.
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Pixel count.
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Scale both sides by `factor`, rounding to the nearest pixel.
    ///
    /// A non-empty dimension never rounds down to zero.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            width: scale_side(self.width, factor),
            height: scale_side(self.height, factor),
        }
    }

    /// Swap width and height.
    pub const fn transposed(&self) -> Self {
        Self {
            width: self.height,
            height: self.width,
        }
    }
}

fn scale_side(side: u32, factor: f64) -> u32 {
    if side == 0 {
        return 0;
    }
    let scaled = (side as f64 * factor).round();
    scaled.clamp(1.0, u32::MAX as f64) as u32
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// =============================================================================
// Rectangle
// =============================================================================

/// A pixel region. The origin is always non-negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rectangle {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rectangle {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The rectangle covering a whole image.
    pub const fn from_size(size: Dimension) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    pub const fn size(&self) -> Dimension {
        Dimension::new(self.width, self.height)
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Exclusive right edge.
    pub const fn right(&self) -> u64 {
        self.x as u64 + self.width as u64
    }

    /// Exclusive bottom edge.
    pub const fn bottom(&self) -> u64 {
        self.y as u64 + self.height as u64
    }

    /// Clip to `bounds` by shrinking width and height. The origin never moves.
    ///
    /// Returns `None` when the origin lies outside `bounds` or the clipped
    /// region is empty.
    pub fn clamp_to(&self, bounds: Dimension) -> Option<Self> {
        if self.x >= bounds.width || self.y >= bounds.height {
            return None;
        }
        let width = self.width.min(bounds.width - self.x);
        let height = self.height.min(bounds.height - self.y);
        let clamped = Self::new(self.x, self.y, width, height);
        (!clamped.is_empty()).then_some(clamped)
    }

    /// The overlapping part of two rectangles, if any.
    pub fn intersection(&self, other: &Rectangle) -> Option<Self> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= x as u64 || bottom <= y as u64 {
            return None;
        }
        Some(Self::new(x, y, (right - x as u64) as u32, (bottom - y as u64) as u32))
    }

    /// Map into a coordinate space scaled by `factor`.
    ///
    /// The origin is floored and the size rounded, so a region covering a
    /// whole image maps to the whole scaled image.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            x: (self.x as f64 * factor).floor() as u32,
            y: (self.y as f64 * factor).floor() as u32,
            width: scale_side(self.width, factor),
            height: scale_side(self.height, factor),
        }
    }
}

impl std::fmt::Display for Rectangle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{},{},{}", self.x, self.y, self.width, self.height)
    }
}

// =============================================================================
// ScaleConstraint
// =============================================================================

/// Default delimiter between an identifier and its scale constraint suffix.
pub const DEFAULT_SCALE_CONSTRAINT_DELIMITER: &str = "-";

/// A server-imposed maximum scale for a virtual image.
///
/// A request for `cats.tif-1:2` addresses a virtual image half the size of
/// `cats.tif`. Stored reduced, so `2:4` and `1:2` compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScaleConstraint {
    numerator: u64,
    denominator: u64,
}

impl Default for ScaleConstraint {
    fn default() -> Self {
        Self::unconstrained()
    }
}

impl ScaleConstraint {
    pub const fn unconstrained() -> Self {
        Self {
            numerator: 1,
            denominator: 1,
        }
    }

    /// Create a constraint; requires `1 <= numerator <= denominator`.
    pub fn new(numerator: u64, denominator: u64) -> Result<Self, ParseError> {
        if numerator < 1 {
            return Err(ParseError::new(
                Component::Identifier,
                "scale constraint numerator must be positive",
            ));
        }
        if numerator > denominator {
            return Err(ParseError::new(
                Component::Identifier,
                "scale constraint numerator must not exceed its denominator",
            ));
        }
        let divisor = gcd(numerator, denominator);
        Ok(Self {
            numerator: numerator / divisor,
            denominator: denominator / divisor,
        })
    }

    pub const fn numerator(&self) -> u64 {
        self.numerator
    }

    pub const fn denominator(&self) -> u64 {
        self.denominator
    }

    pub fn ratio(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    pub const fn has_effect(&self) -> bool {
        self.numerator != self.denominator
    }

    /// Size of the virtual image this constraint describes.
    pub fn constrained_size(&self, full_size: Dimension) -> Dimension {
        if !self.has_effect() {
            return full_size;
        }
        full_size.scaled(self.ratio())
    }

    /// Split a raw path identifier into the source identifier and its
    /// constraint, e.g. `cats.tif-1:2` into `("cats.tif", 1:2)`.
    ///
    /// Identifiers without a well-formed suffix are returned unchanged with
    /// the unconstrained value.
    pub fn split_identifier(
        raw: &str,
        delimiter: &str,
    ) -> Result<(String, ScaleConstraint), ParseError> {
        let Some((base, suffix)) = raw.rsplit_once(delimiter) else {
            return Ok((raw.to_string(), Self::unconstrained()));
        };
        let Some((n, d)) = suffix.split_once(':') else {
            return Ok((raw.to_string(), Self::unconstrained()));
        };
        if base.is_empty() || !is_digits(n) || !is_digits(d) {
            return Ok((raw.to_string(), Self::unconstrained()));
        }
        let numerator = n.parse::<u64>().map_err(|_| {
            ParseError::new(Component::Identifier, "scale constraint is too large")
        })?;
        let denominator = d.parse::<u64>().map_err(|_| {
            ParseError::new(Component::Identifier, "scale constraint is too large")
        })?;
        Ok((base.to_string(), Self::new(numerator, denominator)?))
    }

    /// The suffix that re-creates this constraint on an identifier.
    pub fn to_identifier_suffix(&self, delimiter: &str) -> String {
        format!("{}{}", delimiter, self)
    }
}

impl std::fmt::Display for ScaleConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.numerator, self.denominator)
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a.max(1)
}

// =============================================================================
// ReductionFactor
// =============================================================================

/// Power-of-two reduction: tier `n` is roughly `full / 2^n` on each side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReductionFactor(pub u32);

impl ReductionFactor {
    /// Linear scale of this factor, `1 / 2^n`.
    pub fn scale(&self) -> f64 {
        1.0 / 2f64.powi(self.0 as i32)
    }

    /// Nearest factor for a linear scale, `round(log2(1 / scale))`.
    pub fn for_scale(scale: f64) -> Self {
        if scale.is_nan() || scale <= 0.0 || scale >= 1.0 {
            return Self(0);
        }
        Self((1.0 / scale).log2().round() as u32)
    }
}

impl std::fmt::Display for ReductionFactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_scaled_never_zero() {
        let size = Dimension::new(3, 1000);
        assert_eq!(size.scaled(0.1), Dimension::new(1, 100));
        assert_eq!(Dimension::new(0, 10).scaled(2.0), Dimension::new(0, 20));
    }

    #[test]
    fn test_rectangle_clamp_keeps_origin() {
        let region = Rectangle::new(900, 900, 500, 500);
        let clamped = region.clamp_to(Dimension::new(1000, 1000)).unwrap();
        assert_eq!(clamped, Rectangle::new(900, 900, 100, 100));
    }

    #[test]
    fn test_rectangle_clamp_outside() {
        let region = Rectangle::new(1000, 10, 50, 50);
        assert!(region.clamp_to(Dimension::new(1000, 1000)).is_none());
    }

    #[test]
    fn test_rectangle_intersection() {
        let a = Rectangle::new(0, 0, 100, 100);
        let b = Rectangle::new(50, 80, 100, 100);
        assert_eq!(a.intersection(&b), Some(Rectangle::new(50, 80, 50, 20)));
        assert_eq!(a.intersection(&Rectangle::new(100, 0, 10, 10)), None);
    }

    #[test]
    fn test_rectangle_scaled() {
        let region = Rectangle::new(0, 0, 3000, 2000);
        assert_eq!(region.scaled(0.5), Rectangle::new(0, 0, 1500, 1000));

        let region = Rectangle::new(101, 51, 333, 333);
        assert_eq!(region.scaled(0.5), Rectangle::new(50, 25, 167, 167));
    }

    #[test]
    fn test_scale_constraint_reduces() {
        let sc = ScaleConstraint::new(2, 4).unwrap();
        assert_eq!(sc, ScaleConstraint::new(1, 2).unwrap());
        assert_eq!(sc.to_string(), "1:2");
        assert!(sc.has_effect());
        assert!(!ScaleConstraint::unconstrained().has_effect());
    }

    #[test]
    fn test_scale_constraint_invalid() {
        assert!(ScaleConstraint::new(0, 2).is_err());
        assert!(ScaleConstraint::new(3, 2).is_err());
    }

    #[test]
    fn test_scale_constraint_constrained_size() {
        let sc = ScaleConstraint::new(1, 2).unwrap();
        assert_eq!(
            sc.constrained_size(Dimension::new(6000, 4000)),
            Dimension::new(3000, 2000)
        );
    }

    #[test]
    fn test_split_identifier() {
        let (id, sc) = ScaleConstraint::split_identifier("cats.tif-1:2", "-").unwrap();
        assert_eq!(id, "cats.tif");
        assert_eq!(sc, ScaleConstraint::new(1, 2).unwrap());

        let (id, sc) = ScaleConstraint::split_identifier("my-cats.tif", "-").unwrap();
        assert_eq!(id, "my-cats.tif");
        assert_eq!(sc, ScaleConstraint::unconstrained());

        assert!(ScaleConstraint::split_identifier("cats.tif-3:2", "-").is_err());
    }

    #[test]
    fn test_reduction_factor_for_scale() {
        assert_eq!(ReductionFactor::for_scale(1.0), ReductionFactor(0));
        assert_eq!(ReductionFactor::for_scale(0.5), ReductionFactor(1));
        assert_eq!(ReductionFactor::for_scale(0.25), ReductionFactor(2));
        assert_eq!(ReductionFactor::for_scale(0.124), ReductionFactor(3));
        assert_eq!(ReductionFactor(3).scale(), 0.125);
    }
}
