//! IIIF Image API request grammar.
//!
//! ```text
//! {identifier}/{region}/{size}/{rotation}/{quality}.{format}
//! ```
//!
//! Parsing happens in two steps. [`ImageRequest::new`] splits the raw path
//! parameters and the identifier's scale constraint; it needs nothing but the
//! strings. [`parse`] then turns the components into an [`OperationList`],
//! validating them against the source size, which is only known once the
//! source's info has been read.

use crate::error::{Component, ParseError};
use crate::format::Format;
use crate::geometry::{Dimension, Rectangle, ScaleConstraint};
use crate::operation::{ColorTransform, Crop, Encode, OperationList, Rotate, Scale, ScaleMode};

use super::ApiVersion;

/// Raw image request components for one source identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    pub version: ApiVersion,
    pub identifier: String,
    pub scale_constraint: ScaleConstraint,
    pub region: String,
    pub size: String,
    pub rotation: String,
    pub quality: String,
    pub format: String,
}

impl ImageRequest {
    /// Split raw path parameters.
    ///
    /// `raw_identifier` may carry a scale constraint suffix such as
    /// `cats.tif-1:2`. `quality_format` is the final segment, e.g.
    /// `default.jpg`.
    pub fn new(
        version: ApiVersion,
        raw_identifier: &str,
        region: &str,
        size: &str,
        rotation: &str,
        quality_format: &str,
        delimiter: &str,
    ) -> Result<Self, ParseError> {
        let (identifier, scale_constraint) = parse_identifier(raw_identifier, delimiter)?;
        let (quality, format) = quality_format.rsplit_once('.').ok_or_else(|| {
            ParseError::new(Component::Format, "missing format extension")
        })?;

        Ok(Self {
            version,
            identifier,
            scale_constraint,
            region: region.to_string(),
            size: size.to_string(),
            rotation: rotation.to_string(),
            quality: quality.to_string(),
            format: format.to_string(),
        })
    }
}

/// Split an identifier into the source identifier and its scale constraint.
pub fn parse_identifier(
    raw: &str,
    delimiter: &str,
) -> Result<(String, ScaleConstraint), ParseError> {
    if raw.is_empty() {
        return Err(ParseError::new(Component::Identifier, "identifier is empty"));
    }
    let (identifier, sc) = ScaleConstraint::split_identifier(raw, delimiter)?;
    if identifier.is_empty() {
        return Err(ParseError::new(Component::Identifier, "identifier is empty"));
    }
    Ok((identifier, sc))
}

/// Build the operation list for `request` against a source of `full_size`.
///
/// Output is in canonical order. No list is produced if any component is
/// rejected.
pub fn parse(request: &ImageRequest, full_size: Dimension) -> Result<OperationList, ParseError> {
    let sc = request.scale_constraint;
    let crop = parse_region(&request.region)?;
    let region = crop
        .resolve(full_size, &sc)
        .map_err(|_| ParseError::new(Component::Region, "region is outside the image"))?;

    let scale = parse_size(&request.size, request.version)?;
    if request.version == ApiVersion::V3
        && !scale.is_upscale_requested()
        && scale.is_upscale(region.size(), &sc)
    {
        return Err(ParseError::new(
            Component::Size,
            format!(
                "{} would upscale a {} region; prefix the size with '^'",
                request.size,
                sc.constrained_size(region.size())
            ),
        ));
    }

    let rotate = parse_rotation(&request.rotation)?;
    let color = parse_quality(&request.quality, request.version)?;
    let format = parse_format(&request.format)?;

    Ok(OperationList::builder(request.identifier.clone())
        .scale_constraint(sc)
        .crop(crop)
        .scale(scale)
        .rotate(rotate)
        .color(color)
        .encode(Encode::new(format))
        .build())
}

// =============================================================================
// Components
// =============================================================================

/// `full` | `square` | `x,y,w,h` | `pct:x,y,w,h`
pub fn parse_region(value: &str) -> Result<Crop, ParseError> {
    match value {
        "full" => return Ok(Crop::Full),
        "square" => return Ok(Crop::Square),
        _ => {}
    }

    if let Some(percent) = value.strip_prefix("pct:") {
        let [x, y, w, h] = split_four(percent, Component::Region)?;
        let x = parse_float(x, Component::Region)?;
        let y = parse_float(y, Component::Region)?;
        let w = parse_float(w, Component::Region)?;
        let h = parse_float(h, Component::Region)?;
        if x < 0.0 || y < 0.0 {
            return Err(ParseError::new(Component::Region, "offsets must not be negative"));
        }
        if w <= 0.0 || h <= 0.0 {
            return Err(ParseError::new(Component::Region, "width and height must be positive"));
        }
        if x >= 100.0 || y >= 100.0 {
            return Err(ParseError::new(Component::Region, "region is outside the image"));
        }
        return Ok(Crop::Percent {
            x: x / 100.0,
            y: y / 100.0,
            width: w / 100.0,
            height: h / 100.0,
        });
    }

    let [x, y, w, h] = split_four(value, Component::Region)?;
    let rect = Rectangle::new(
        parse_int(x, Component::Region)?,
        parse_int(y, Component::Region)?,
        parse_int(w, Component::Region)?,
        parse_int(h, Component::Region)?,
    );
    if rect.is_empty() {
        return Err(ParseError::new(Component::Region, "width and height must be positive"));
    }
    Ok(Crop::Pixels(rect))
}

/// `max` | `full` (2.x) | `w,` | `,h` | `w,h` | `!w,h` | `pct:n`, optionally
/// prefixed with `^` (3.x).
pub fn parse_size(value: &str, version: ApiVersion) -> Result<Scale, ParseError> {
    let (upscale, body) = match value.strip_prefix('^') {
        Some(_) if version == ApiVersion::V2 => {
            return Err(ParseError::new(
                Component::Size,
                "'^' upscaling is not part of Image API 2",
            ));
        }
        Some(rest) => (true, rest),
        None => (false, value),
    };

    let scale = match body {
        "max" => Scale::Max { upscale },
        "full" if version == ApiVersion::V2 => Scale::Max { upscale },
        _ => {
            if let Some(percent) = body.strip_prefix("pct:") {
                let percent = parse_float(percent, Component::Size)?;
                if percent <= 0.0 {
                    return Err(ParseError::new(Component::Size, "percentage must be positive"));
                }
                Scale::Percent {
                    percent: percent / 100.0,
                    upscale,
                }
            } else {
                parse_pixel_size(body)?.with_upscale(upscale)
            }
        }
    };
    Ok(scale)
}

fn parse_pixel_size(value: &str) -> Result<Scale, ParseError> {
    let (fit_inside, value) = match value.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, value),
    };
    let (w, h) = value
        .split_once(',')
        .ok_or_else(|| ParseError::new(Component::Size, format!("unrecognized size '{}'", value)))?;

    let width = match w {
        "" => None,
        w => Some(parse_positive(w)?),
    };
    let height = match h {
        "" => None,
        h => Some(parse_positive(h)?),
    };

    let mode = match (fit_inside, width, height) {
        (true, Some(_), Some(_)) => ScaleMode::AspectFitInside,
        (true, _, _) => {
            return Err(ParseError::new(Component::Size, "'!w,h' requires both dimensions"));
        }
        (false, Some(_), Some(_)) => ScaleMode::NonAspectFill,
        (false, Some(_), None) => ScaleMode::AspectFitWidth,
        (false, None, Some(_)) => ScaleMode::AspectFitHeight,
        (false, None, None) => {
            return Err(ParseError::new(Component::Size, "width or height is required"));
        }
    };

    Ok(Scale::Pixels {
        width,
        height,
        mode,
        upscale: false,
    })
}

/// Optional `!` (mirror) then degrees in `[0, 360]`.
pub fn parse_rotation(value: &str) -> Result<Rotate, ParseError> {
    let (mirror, degrees) = match value.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, value),
    };
    let degrees = parse_float(degrees, Component::Rotation)?;
    if !(0.0..=360.0).contains(&degrees) {
        return Err(ParseError::new(
            Component::Rotation,
            "degrees must be between 0 and 360",
        ));
    }
    Ok(Rotate::new(degrees, mirror))
}

/// `color` | `gray` | `bitonal` | `default` (plus `native`/`grey` in 2.x).
pub fn parse_quality(
    value: &str,
    version: ApiVersion,
) -> Result<Option<ColorTransform>, ParseError> {
    match (value, version) {
        ("default" | "color", _) => Ok(None),
        ("native", ApiVersion::V2) => Ok(None),
        ("gray", _) | ("grey", ApiVersion::V2) => Ok(Some(ColorTransform::Gray)),
        ("bitonal", _) => Ok(Some(ColorTransform::Bitonal)),
        _ => Err(ParseError::new(
            Component::Quality,
            format!("unsupported quality '{}'", value),
        )),
    }
}

/// Output format extension. Known but unencodable formats are rejected too.
pub fn parse_format(value: &str) -> Result<Format, ParseError> {
    let format = Format::from_extension(value).ok_or_else(|| {
        ParseError::new(Component::Format, format!("unknown format '{}'", value))
    })?;
    if !format.is_output_supported() {
        return Err(ParseError::new(
            Component::Format,
            format!("{} output is not supported", format.media_type()),
        ));
    }
    Ok(format)
}

// =============================================================================
// Helpers
// =============================================================================

fn split_four(value: &str, component: Component) -> Result<[&str; 4], ParseError> {
    let parts: Vec<&str> = value.split(',').collect();
    match parts.as_slice() {
        [a, b, c, d] => Ok([*a, *b, *c, *d]),
        _ => Err(ParseError::new(
            component,
            format!("expected four comma-separated values, got '{}'", value),
        )),
    }
}

fn parse_int(value: &str, component: Component) -> Result<u32, ParseError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::new(
            component,
            format!("'{}' is not a non-negative integer", value),
        ));
    }
    value
        .parse()
        .map_err(|_| ParseError::new(component, format!("'{}' is too large", value)))
}

fn parse_positive(value: &str) -> Result<u32, ParseError> {
    match parse_int(value, Component::Size)? {
        0 => Err(ParseError::new(Component::Size, "width and height must be positive")),
        n => Ok(n),
    }
}

fn parse_float(value: &str, component: Component) -> Result<f64, ParseError> {
    let valid = !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || b == b'.' || b == b'-');
    let parsed = valid.then(|| value.parse::<f64>().ok()).flatten();
    match parsed {
        Some(n) if n.is_finite() => Ok(n),
        _ => Err(ParseError::new(
            component,
            format!("'{}' is not a number", value),
        )),
    }
}
