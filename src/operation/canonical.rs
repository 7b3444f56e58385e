//! Canonical operation lists and derivative fingerprints.
//!
//! Two requests that produce the same pixels must map to the same cache key.
//! [`canonicalize`] folds away operations with no effect, applies the size
//! limits, and computes a [`Fingerprint`] over a fixed serialization in which
//! crops and scales appear in their resolved pixel form.

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Component, ImageError, ParseError};
use crate::geometry::{Dimension, Rectangle, ScaleConstraint};

use super::{Crop, Operation, OperationList, Scale};

/// Tolerance for floating point scale comparisons.
const SCALE_EPSILON: f64 = 1e-6;

// =============================================================================
// Limits
// =============================================================================

/// Server-side size policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    /// Maximum output area in pixels; 0 disables the limit
    pub max_pixels: u64,

    /// Maximum output scale relative to the (virtual) region; 0 disables the
    /// limit
    pub max_scale: f64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_pixels: 0,
            max_scale: 1.0,
        }
    }
}

impl Limits {
    pub const fn unlimited() -> Self {
        Self {
            max_pixels: 0,
            max_scale: 0.0,
        }
    }
}

// =============================================================================
// Fingerprint
// =============================================================================

/// Hex SHA-256 cache key of a canonical operation list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// CanonicalOperationList
// =============================================================================

/// An operation list that has been canonicalized against a source size.
#[derive(Debug, Clone)]
pub struct CanonicalOperationList {
    list: OperationList,
    full_size: Dimension,
    region: Rectangle,
    resulting_size: Dimension,
    fingerprint: Fingerprint,
}

impl CanonicalOperationList {
    pub fn list(&self) -> &OperationList {
        &self.list
    }

    pub fn identifier(&self) -> &str {
        self.list.identifier()
    }

    pub fn full_size(&self) -> Dimension {
        self.full_size
    }

    /// Cropped region in full-resolution pixels.
    pub fn region(&self) -> Rectangle {
        self.region
    }

    pub fn resulting_size(&self) -> Dimension {
        self.resulting_size
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Output size before rotation: the size the decoded region is scaled to.
    pub fn scaled_size(&self) -> Dimension {
        let sc = self.list.scale_constraint();
        match self.list.scale() {
            Some(scale) => scale.resulting_size(self.region.size(), &sc),
            None => sc.constrained_size(self.region.size()),
        }
    }
}

// =============================================================================
// Canonicalization
// =============================================================================

/// Canonicalize `list` for a source of `full_size` under `limits`.
///
/// - A crop resolving to the whole image is dropped.
/// - A scale whose result equals the cropped input is dropped. Under an
///   effective scale constraint the scale is never dropped: one resolving to
///   the constrained region size becomes `Max`, any other is kept as is.
/// - A 0° rotation without mirror is dropped, as are overlays that do not
///   touch the cropped region.
/// - A result larger than `max_pixels` gets a downscale right after the crop.
/// - A scale above `max_scale` is [`ImageError::SizeRestricted`].
pub fn canonicalize(
    list: &OperationList,
    full_size: Dimension,
    limits: &Limits,
) -> Result<CanonicalOperationList, ImageError> {
    let sc = list.scale_constraint();
    let whole = Rectangle::from_size(full_size);

    let region = match list.crop() {
        Some(crop) => crop.resolve(full_size, &sc)?,
        None => whole,
    };
    let crop = list.crop().copied().filter(|_| region != whole);
    let region_size = region.size();

    let mut scale = match list.scale() {
        Some(scale) => Some(*scale),
        None if sc.has_effect() => Some(Scale::Max { upscale: false }),
        None => None,
    };

    if let Some(s) = scale {
        if limits.max_scale > 0.0 {
            let ratio = s.max_ratio(region_size, &sc);
            if ratio > limits.max_scale + SCALE_EPSILON {
                return Err(ImageError::SizeRestricted {
                    reason: format!(
                        "requested scale {:.3} exceeds the maximum of {}",
                        ratio, limits.max_scale
                    ),
                });
            }
        }
        if sc.has_effect() {
            if s.resulting_size(region_size, &sc) == sc.constrained_size(region_size) {
                scale = Some(Scale::Max { upscale: false });
            }
        } else if !s.has_effect(region_size, &sc) {
            scale = None;
        }
    }

    let target = scale.map_or(region_size, |s| s.resulting_size(region_size, &sc));
    if limits.max_pixels > 0 && target.area() > limits.max_pixels {
        let capped = fit_area(target, limits.max_pixels);
        debug!(
            identifier = list.identifier(),
            requested = %target,
            capped = %capped,
            "Capping output to max_pixels"
        );
        let upscale = capped.width > sc.constrained_size(region_size).width
            || capped.height > sc.constrained_size(region_size).height;
        scale = Some(Scale::exact(capped.width, capped.height).with_upscale(upscale));
    }

    let encode = list
        .encode()
        .copied()
        .ok_or_else(|| ParseError::new(Component::Format, "no output format requested"))?;

    let mut builder = OperationList::builder(list.identifier())
        .scale_constraint(sc)
        .crop(crop)
        .scale(scale)
        .rotate(list.rotate().copied().filter(|r| r.has_effect()))
        .color(list.color().copied())
        .encode(encode);
    for overlay in list.overlays().filter(|o| o.has_effect(&region)) {
        builder = builder.overlay(overlay.clone());
    }
    let canonical = builder.build();

    let resulting_size = canonical.resulting_size(full_size);
    let fingerprint = fingerprint(&canonical, full_size);

    Ok(CanonicalOperationList {
        list: canonical,
        full_size,
        region,
        resulting_size,
        fingerprint,
    })
}

/// Largest size with the aspect ratio of `size` whose area is at most
/// `max_pixels`, flooring both sides.
fn fit_area(size: Dimension, max_pixels: u64) -> Dimension {
    let factor = (max_pixels as f64 / size.area() as f64).sqrt();
    let mut width = ((size.width as f64 * factor).floor() as u32).max(1);
    let mut height = ((size.height as f64 * factor).floor() as u32).max(1);
    while (width as u64 * height as u64) > max_pixels && (width > 1 || height > 1) {
        if width >= height {
            width -= 1;
        } else {
            height -= 1;
        }
    }
    Dimension::new(width, height)
}

// =============================================================================
// Fingerprint
// =============================================================================

/// Fingerprint of `list` for a source of `full_size`.
///
/// Hashes the identifier, the scale constraint and [`serialize`] so that
/// equivalent requests share a key.
pub fn fingerprint(list: &OperationList, full_size: Dimension) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(list.identifier().as_bytes());
    hasher.update(b"\n");
    hasher.update(list.scale_constraint().to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(serialize(list, full_size).as_bytes());
    Fingerprint(hex::encode(hasher.finalize()))
}

/// Fixed string form of an operation list.
///
/// Crops serialize as their resolved full-resolution rectangle and scales as
/// their target size, e.g. `crop:10,10,100,100;scale:50,50;rotate:90;encode:jpg@80`.
pub fn serialize(list: &OperationList, full_size: Dimension) -> String {
    let sc = list.scale_constraint();
    let region = list
        .crop()
        .and_then(|crop| crop.resolve(full_size, &sc).ok())
        .unwrap_or_else(|| Rectangle::from_size(full_size));

    list.iter()
        .map(|operation| match operation {
            Operation::Crop(Crop::Full) => "crop:full".to_string(),
            Operation::Crop(_) => format!("crop:{}", region),
            Operation::Scale(scale) => {
                let target = scale.resulting_size(region.size(), &sc);
                format!("scale:{},{}", target.width, target.height)
            }
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(";")
}
