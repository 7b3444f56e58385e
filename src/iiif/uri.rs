//! Canonical URI forms.
//!
//! Every derivative has exactly one canonical request path. It is advertised
//! in the `Link: rel="canonical"` header so that clients and proxies can
//! collapse equivalent URIs.

use crate::geometry::ScaleConstraint;
use crate::operation::{CanonicalOperationList, Scale};

use super::ApiVersion;

/// Percent-encoded identifier path segment, with the scale constraint
/// suffix when the constraint has an effect.
pub fn identifier_segment(identifier: &str, sc: &ScaleConstraint, delimiter: &str) -> String {
    let raw = if sc.has_effect() {
        format!("{}{}", identifier, sc.to_identifier_suffix(delimiter))
    } else {
        identifier.to_string()
    };
    urlencoding::encode(&raw).into_owned()
}

/// `{identifier}/{region}/{size}/{rotation}/{quality}.{format}` in canonical
/// form for `version`.
pub fn canonical_path(
    version: ApiVersion,
    canonical: &CanonicalOperationList,
    delimiter: &str,
) -> String {
    let list = canonical.list();
    let sc = list.scale_constraint();
    let region = canonical.region();

    let region_segment = match list.crop() {
        None => "full".to_string(),
        Some(_) if sc.has_effect() => region.scaled(sc.ratio()).to_string(),
        Some(_) => region.to_string(),
    };

    let virtual_size = sc.constrained_size(region.size());
    let scaled = canonical.scaled_size();
    let size_segment = if scaled == virtual_size {
        match version {
            ApiVersion::V2 => "full".to_string(),
            ApiVersion::V3 => "max".to_string(),
        }
    } else {
        let upscaled = scaled.width > virtual_size.width || scaled.height > virtual_size.height;
        match version {
            ApiVersion::V2
                if Scale::fit_width(scaled.width).resulting_size(region.size(), &sc) == scaled =>
            {
                format!("{},", scaled.width)
            }
            ApiVersion::V2 => format!("{},{}", scaled.width, scaled.height),
            ApiVersion::V3 if upscaled => format!("^{},{}", scaled.width, scaled.height),
            ApiVersion::V3 => format!("{},{}", scaled.width, scaled.height),
        }
    };

    let rotation = list
        .rotate()
        .map(|rotate| rotate.to_string())
        .unwrap_or_else(|| "0".to_string());
    let quality = list.color().map(|color| color.name()).unwrap_or("default");
    let extension = list
        .encode()
        .map(|encode| encode.format.extension())
        .unwrap_or("jpg");

    format!(
        "{}/{}/{}/{}/{}.{}",
        identifier_segment(list.identifier(), &sc, delimiter),
        region_segment,
        size_segment,
        rotation,
        quality,
        extension
    )
}
