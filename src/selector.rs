//! Resolution tier selection.
//!
//! Pyramidal sources store the same image at several resolutions. Decoding
//! the smallest tier that still has enough pixels for the requested output
//! is the single biggest performance lever of the server, so every codec
//! goes through [`select_tier`].

use tracing::debug;

use crate::error::ImageError;
use crate::geometry::{Dimension, Rectangle, ReductionFactor, ScaleConstraint};
use crate::operation::{Crop, Scale, ScaleMode};

/// Tolerance when comparing a required scale against a tier's scale.
const SCALE_EPSILON: f64 = 1e-9;

/// The tier to decode and where to read from it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierSelection {
    /// Index into the codec's tier list; 0 is full resolution
    pub tier_index: usize,

    /// Dimensions of the selected tier
    pub tier_size: Dimension,

    /// Requested region in full-resolution pixels
    pub full_region: Rectangle,

    /// Requested region in the selected tier's pixels
    pub region: Rectangle,

    /// Power-of-two reduction of the selected tier
    pub reduction_factor: ReductionFactor,

    /// `tier.width / full.width`
    pub reduced_scale: f64,
}

/// Pick the smallest tier that satisfies `crop` and `scale`.
///
/// `tiers` lists the source's resolutions from largest (the full image) to
/// smallest. Tiers are scanned from smallest to largest and the first whose
/// scale is at least the required scale wins; tier 0 is the fallback.
///
/// Returns [`ImageError::EmptyResult`] if the crop lies outside the image.
pub fn select_tier(
    full_size: Dimension,
    tiers: &[Dimension],
    crop: &Crop,
    scale: Option<&Scale>,
    sc: &ScaleConstraint,
) -> Result<TierSelection, ImageError> {
    let full_region = crop.resolve(full_size, sc)?;

    let tier_index = if tiers.len() <= 1 || full_size.width == 0 {
        0
    } else {
        tiers
            .iter()
            .enumerate()
            .rev()
            .find(|(_, tier)| {
                let reduced = tier.width as f64 / full_size.width as f64;
                is_sufficient(reduced, &full_region, scale, sc)
            })
            .map(|(index, _)| index)
            .unwrap_or(0)
    };

    let tier_size = tiers.get(tier_index).copied().unwrap_or(full_size);
    if tier_index == 0 {
        return Ok(TierSelection {
            tier_index,
            tier_size,
            full_region,
            region: full_region,
            reduction_factor: ReductionFactor(0),
            reduced_scale: 1.0,
        });
    }

    let reduced_scale = tier_size.width as f64 / full_size.width as f64;
    let region = full_region
        .scaled(reduced_scale)
        .clamp_to(tier_size)
        .ok_or(ImageError::EmptyResult)?;
    let reduction_factor = ReductionFactor::for_scale(reduced_scale);

    debug!(
        tier = tier_index,
        tier_size = %tier_size,
        full_region = %full_region,
        region = %region,
        reduction_factor = reduction_factor.0,
        "Selected tier"
    );

    Ok(TierSelection {
        tier_index,
        tier_size,
        full_region,
        region,
        reduction_factor,
        reduced_scale,
    })
}

/// Whether a tier at `reduced` scale has enough pixels for the request.
fn is_sufficient(
    reduced: f64,
    region: &Rectangle,
    scale: Option<&Scale>,
    sc: &ScaleConstraint,
) -> bool {
    let limit = reduced + SCALE_EPSILON;
    match scale {
        None | Some(Scale::Max { .. }) => sc.ratio() <= limit,
        Some(Scale::Percent { percent, .. }) => percent.min(1.0) * sc.ratio() <= limit,
        Some(pixels @ Scale::Pixels { mode, .. }) => {
            let target = pixels.resulting_size(region.size(), sc);
            let width_ratio = target.width.min(region.width) as f64 / region.width as f64;
            let height_ratio = target.height.min(region.height) as f64 / region.height as f64;
            match mode {
                ScaleMode::AspectFitWidth => width_ratio <= limit,
                ScaleMode::AspectFitHeight => height_ratio <= limit,
                ScaleMode::AspectFitInside | ScaleMode::NonAspectFill => {
                    width_ratio <= limit && height_ratio <= limit
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNCONSTRAINED: ScaleConstraint = ScaleConstraint::unconstrained();

    fn four_tiers() -> Vec<Dimension> {
        vec![
            Dimension::new(4000, 3000),
            Dimension::new(2000, 1500),
            Dimension::new(1000, 750),
            Dimension::new(500, 375),
        ]
    }

    #[test]
    fn test_exact_tier_match() {
        let tiers = four_tiers();
        let scale = Scale::exact(1000, 750);
        let selection = select_tier(tiers[0], &tiers, &Crop::Full, Some(&scale), &UNCONSTRAINED).unwrap();
        assert_eq!(selection.tier_index, 2);
        assert_eq!(selection.region, Rectangle::new(0, 0, 1000, 750));
        assert_eq!(selection.reduction_factor, ReductionFactor(2));
    }

    #[test]
    fn test_smaller_than_smallest_tier() {
        let tiers = four_tiers();
        let scale = Scale::exact(400, 300);
        let selection = select_tier(tiers[0], &tiers, &Crop::Full, Some(&scale), &UNCONSTRAINED).unwrap();
        assert_eq!(selection.tier_index, 3);
        assert_eq!(selection.region, Rectangle::new(0, 0, 500, 375));
        assert_eq!(selection.reduction_factor, ReductionFactor(3));
    }

    #[test]
    fn test_no_scale_uses_full_resolution() {
        let tiers = four_tiers();
        let selection = select_tier(tiers[0], &tiers, &Crop::Full, None, &UNCONSTRAINED).unwrap();
        assert_eq!(selection.tier_index, 0);
        assert_eq!(selection.region, Rectangle::new(0, 0, 4000, 3000));
    }

    #[test]
    fn test_upscale_request_uses_full_resolution() {
        let tiers = four_tiers();
        let scale = Scale::percent(2.0).with_upscale(true);
        let selection = select_tier(tiers[0], &tiers, &Crop::Full, Some(&scale), &UNCONSTRAINED).unwrap();
        assert_eq!(selection.tier_index, 0);
    }

    #[test]
    fn test_width_only_checks_width() {
        let tiers = four_tiers();
        let scale = Scale::fit_width(1000);
        let selection = select_tier(tiers[0], &tiers, &Crop::Full, Some(&scale), &UNCONSTRAINED).unwrap();
        assert_eq!(selection.tier_index, 2);
    }

    #[test]
    fn test_scale_constraint_selects_smaller_tier() {
        let tiers = four_tiers();
        let sc = ScaleConstraint::new(1, 4).unwrap();
        let selection = select_tier(tiers[0], &tiers, &Crop::Full, None, &sc).unwrap();
        assert_eq!(selection.tier_index, 2);
    }

    #[test]
    fn test_cats_end_to_end_geometry() {
        let tiers = vec![
            Dimension::new(6000, 4000),
            Dimension::new(3000, 2000),
            Dimension::new(1500, 1000),
        ];
        let crop = Crop::Pixels(Rectangle::new(0, 0, 3000, 2000));
        let scale = Scale::percent(0.5);
        let selection = select_tier(tiers[0], &tiers, &crop, Some(&scale), &UNCONSTRAINED).unwrap();
        assert_eq!(selection.tier_index, 1);
        assert_eq!(selection.full_region, Rectangle::new(0, 0, 3000, 2000));
        assert_eq!(selection.region, Rectangle::new(0, 0, 1500, 1000));
        assert_eq!(selection.reduction_factor, ReductionFactor(1));
        assert_eq!(selection.reduced_scale, 0.5);
    }

    #[test]
    fn test_region_is_clamped_to_tier() {
        let tiers = vec![Dimension::new(1000, 1000), Dimension::new(500, 500)];
        let crop = Crop::Percent {
            x: 0.9,
            y: 0.9,
            width: 0.5,
            height: 0.5,
        };
        let selection = select_tier(tiers[0], &tiers, &crop, None, &UNCONSTRAINED).unwrap();
        assert_eq!(selection.full_region, Rectangle::new(900, 900, 100, 100));
        assert!(selection.region.right() <= 1000 && selection.region.bottom() <= 1000);

        let scale = Scale::percent(0.5);
        let selection = select_tier(tiers[0], &tiers, &crop, Some(&scale), &UNCONSTRAINED).unwrap();
        assert_eq!(selection.tier_index, 1);
        assert_eq!(selection.region, Rectangle::new(450, 450, 50, 50));
    }

    #[test]
    fn test_single_tier_source() {
        let tiers = vec![Dimension::new(800, 600)];
        let crop = Crop::Pixels(Rectangle::new(10, 20, 100, 50));
        let scale = Scale::percent(0.1);
        let selection = select_tier(tiers[0], &tiers, &crop, Some(&scale), &UNCONSTRAINED).unwrap();
        assert_eq!(selection.tier_index, 0);
        assert_eq!(selection.region, Rectangle::new(10, 20, 100, 50));
    }

    #[test]
    fn test_outside_region_is_empty_result() {
        let tiers = four_tiers();
        let crop = Crop::Pixels(Rectangle::new(4000, 0, 10, 10));
        let result = select_tier(tiers[0], &tiers, &crop, None, &UNCONSTRAINED);
        assert!(matches!(result, Err(ImageError::EmptyResult)));
    }
}
