use crate::geometry::{Dimension, ScaleConstraint};

use super::format_number;

/// How a pixel scale maps the input onto its target box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScaleMode {
    /// `w,`: fixed width, height follows the aspect ratio
    AspectFitWidth,

    /// `,h`: fixed height, width follows the aspect ratio
    AspectFitHeight,

    /// `!w,h`: largest size fitting inside the box
    AspectFitInside,

    /// `w,h`: exact size, aspect ratio ignored
    NonAspectFill,
}

/// Output scaling.
///
/// Sizes are always relative to the cropped region in full-resolution pixels.
/// The scale constraint is applied on top: `Max` on a `1:2` image yields half
/// of the region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scale {
    Max {
        upscale: bool,
    },

    /// Fraction of the region; `1.0` is 100%
    Percent {
        percent: f64,
        upscale: bool,
    },

    Pixels {
        width: Option<u32>,
        height: Option<u32>,
        mode: ScaleMode,
        upscale: bool,
    },
}

impl Scale {
    pub const fn fit_width(width: u32) -> Self {
        Scale::Pixels {
            width: Some(width),
            height: None,
            mode: ScaleMode::AspectFitWidth,
            upscale: false,
        }
    }

    pub const fn fit_height(height: u32) -> Self {
        Scale::Pixels {
            width: None,
            height: Some(height),
            mode: ScaleMode::AspectFitHeight,
            upscale: false,
        }
    }

    pub const fn fit_inside(width: u32, height: u32) -> Self {
        Scale::Pixels {
            width: Some(width),
            height: Some(height),
            mode: ScaleMode::AspectFitInside,
            upscale: false,
        }
    }

    pub const fn exact(width: u32, height: u32) -> Self {
        Scale::Pixels {
            width: Some(width),
            height: Some(height),
            mode: ScaleMode::NonAspectFill,
            upscale: false,
        }
    }

    pub const fn percent(percent: f64) -> Self {
        Scale::Percent {
            percent,
            upscale: false,
        }
    }

    /// Same scale with the explicit upscaling flag set.
    pub fn with_upscale(self, allowed: bool) -> Self {
        match self {
            Scale::Max { .. } => Scale::Max { upscale: allowed },
            Scale::Percent { percent, .. } => Scale::Percent {
                percent,
                upscale: allowed,
            },
            Scale::Pixels {
                width,
                height,
                mode,
                ..
            } => Scale::Pixels {
                width,
                height,
                mode,
                upscale: allowed,
            },
        }
    }

    /// Whether upscaling was explicitly requested.
    pub const fn is_upscale_requested(&self) -> bool {
        match *self {
            Scale::Max { upscale } => upscale,
            Scale::Percent { upscale, .. } => upscale,
            Scale::Pixels { upscale, .. } => upscale,
        }
    }

    /// Output size for a full-resolution `input` region.
    pub fn resulting_size(&self, input: Dimension, sc: &ScaleConstraint) -> Dimension {
        if input.is_empty() {
            return input;
        }
        let virtual_size = sc.constrained_size(input);
        let vw = virtual_size.width as f64;
        let vh = virtual_size.height as f64;

        match *self {
            Scale::Max { .. } => virtual_size,
            Scale::Percent { percent, .. } => input.scaled(percent * sc.ratio()),
            Scale::Pixels {
                width,
                height,
                mode,
                ..
            } => match (mode, width, height) {
                (ScaleMode::AspectFitWidth, Some(w), _) => {
                    Dimension::new(w, at_least_one(vh * w as f64 / vw))
                }
                (ScaleMode::AspectFitHeight, _, Some(h)) => {
                    Dimension::new(at_least_one(vw * h as f64 / vh), h)
                }
                (ScaleMode::AspectFitInside, Some(w), Some(h)) => {
                    let factor = (w as f64 / vw).min(h as f64 / vh);
                    Dimension::new(
                        at_least_one(vw * factor).min(w),
                        at_least_one(vh * factor).min(h),
                    )
                }
                (ScaleMode::NonAspectFill, Some(w), Some(h)) => Dimension::new(w, h),
                // A mode without the dimensions it needs leaves the size alone.
                _ => virtual_size,
            },
        }
    }

    /// Largest per-axis ratio of the output to the virtual region size.
    ///
    /// Above `1.0` means the output is upscaled.
    pub fn max_ratio(&self, input: Dimension, sc: &ScaleConstraint) -> f64 {
        let virtual_size = sc.constrained_size(input);
        if virtual_size.is_empty() {
            return 1.0;
        }
        let target = self.resulting_size(input, sc);
        let rw = target.width as f64 / virtual_size.width as f64;
        let rh = target.height as f64 / virtual_size.height as f64;
        rw.max(rh)
    }

    /// True if the output is larger than the virtual region in either axis.
    pub fn is_upscale(&self, input: Dimension, sc: &ScaleConstraint) -> bool {
        let virtual_size = sc.constrained_size(input);
        let target = self.resulting_size(input, sc);
        target.width > virtual_size.width || target.height > virtual_size.height
    }

    /// True unless the output equals the full-resolution input.
    pub fn has_effect(&self, input: Dimension, sc: &ScaleConstraint) -> bool {
        self.resulting_size(input, sc) != input
    }
}

fn at_least_one(value: f64) -> u32 {
    value.round().clamp(1.0, u32::MAX as f64) as u32
}

impl std::fmt::Display for Scale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_upscale_requested() {
            f.write_str("^")?;
        }
        match *self {
            Scale::Max { .. } => f.write_str("max"),
            Scale::Percent { percent, .. } => write!(f, "pct:{}", format_number(percent * 100.0)),
            Scale::Pixels {
                width,
                height,
                mode,
                ..
            } => {
                let w = width.map(|w| w.to_string()).unwrap_or_default();
                let h = height.map(|h| h.to_string()).unwrap_or_default();
                match mode {
                    ScaleMode::AspectFitWidth => write!(f, "{},", w),
                    ScaleMode::AspectFitHeight => write!(f, ",{}", h),
                    ScaleMode::AspectFitInside => write!(f, "!{},{}", w, h),
                    ScaleMode::NonAspectFill => write!(f, "{},{}", w, h),
                }
            }
        }
    }
}
