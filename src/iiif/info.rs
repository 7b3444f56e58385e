//! Image information documents (`info.json`).

use serde::Serialize;

use crate::codec::Info;
use crate::format::Format;
use crate::geometry::{Dimension, ScaleConstraint};
use crate::operation::Limits;

use super::ApiVersion;

/// Tile edge advertised for sources not stored in tiles.
pub const DEFAULT_TILE_SIZE: u32 = 512;

const PROTOCOL: &str = "http://iiif.io/api/image";

/// Qualities beyond `default`/`color`.
const EXTRA_QUALITIES: [&str; 2] = ["gray", "bitonal"];

/// Features supported on top of level 2.
const EXTRA_FEATURES: [&str; 7] = [
    "baseUriRedirect",
    "canonicalLinkHeader",
    "cors",
    "jsonldMediaType",
    "mirroring",
    "regionSquare",
    "rotationArbitrary",
];

/// Server settings that show up in info documents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InfoOptions {
    pub limits: Limits,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SizeEntry {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TileEntry {
    pub width: u32,
    pub height: u32,
    pub scale_factors: Vec<u32>,
}

/// Level 2 profile description for 2.x documents.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileV2 {
    pub formats: Vec<&'static str>,
    pub qualities: Vec<&'static str>,
    pub supports: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_area: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProfileEntry {
    Uri(&'static str),
    Description(ProfileV2),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InfoV2 {
    #[serde(rename = "@context")]
    pub context: &'static str,
    #[serde(rename = "@id")]
    pub id: String,
    pub protocol: &'static str,
    pub width: u32,
    pub height: u32,
    pub sizes: Vec<SizeEntry>,
    pub tiles: Vec<TileEntry>,
    pub profile: Vec<ProfileEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoV3 {
    #[serde(rename = "@context")]
    pub context: &'static str,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub protocol: &'static str,
    pub profile: &'static str,
    pub width: u32,
    pub height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_area: Option<u64>,
    pub sizes: Vec<SizeEntry>,
    pub tiles: Vec<TileEntry>,
    pub extra_qualities: Vec<&'static str>,
    pub extra_formats: Vec<&'static str>,
    pub extra_features: Vec<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InfoDocument {
    V2(InfoV2),
    V3(InfoV3),
}

/// Build the info document for `info` as seen through `sc`.
///
/// `id` is the full URI of the image service, without `/info.json`.
pub fn info_document(
    version: ApiVersion,
    id: String,
    info: &Info,
    sc: &ScaleConstraint,
    options: &InfoOptions,
) -> InfoDocument {
    let size = sc.constrained_size(info.size);
    let sizes = sizes(info, sc);
    let tiles = vec![tiles(info, size, sc)];
    let (max_width, max_height) = max_dimensions(size, &options.limits);
    let max_area = (options.limits.max_pixels > 0).then_some(options.limits.max_pixels);

    match version {
        ApiVersion::V2 => {
            let mut supports: Vec<&'static str> = EXTRA_FEATURES.to_vec();
            supports.extend(["regionByPct", "regionByPx", "sizeByConfinedWh", "sizeByWh"]);
            if allows_upscaling(&options.limits) {
                supports.push("sizeAboveFull");
            }
            InfoDocument::V2(InfoV2 {
                context: version.context(),
                id,
                protocol: PROTOCOL,
                width: size.width,
                height: size.height,
                sizes,
                tiles,
                profile: vec![
                    ProfileEntry::Uri("http://iiif.io/api/image/2/level2.json"),
                    ProfileEntry::Description(ProfileV2 {
                        formats: output_extensions(),
                        qualities: ["default", "color", "gray", "bitonal"].to_vec(),
                        supports,
                        max_width,
                        max_height,
                        max_area,
                    }),
                ],
            })
        }
        ApiVersion::V3 => {
            let mut extra_features = EXTRA_FEATURES.to_vec();
            if allows_upscaling(&options.limits) {
                extra_features.push("sizeUpscaling");
            }
            InfoDocument::V3(InfoV3 {
                context: version.context(),
                id,
                kind: "ImageService3",
                protocol: PROTOCOL,
                profile: "level2",
                width: size.width,
                height: size.height,
                max_width,
                max_height,
                max_area,
                sizes,
                tiles,
                extra_qualities: EXTRA_QUALITIES.to_vec(),
                // jpg and png are part of level 2
                extra_formats: output_extensions()
                    .into_iter()
                    .filter(|ext| !matches!(*ext, "jpg" | "png"))
                    .collect(),
                extra_features,
            })
        }
    }
}

fn allows_upscaling(limits: &Limits) -> bool {
    limits.max_scale == 0.0 || limits.max_scale > 1.0
}

fn output_extensions() -> Vec<&'static str> {
    Format::OUTPUT.iter().map(|format| format.extension()).collect()
}

/// Largest output the scale limit allows, when it is finite.
fn max_dimensions(size: Dimension, limits: &Limits) -> (Option<u32>, Option<u32>) {
    if limits.max_scale <= 0.0 {
        return (None, None);
    }
    let max = size.scaled(limits.max_scale);
    (Some(max.width), Some(max.height))
}

/// One entry per tier, smallest first.
fn sizes(info: &Info, sc: &ScaleConstraint) -> Vec<SizeEntry> {
    let mut sizes: Vec<SizeEntry> = info
        .tiers()
        .iter()
        .rev()
        .map(|tier| sc.constrained_size(*tier))
        .map(|size| SizeEntry {
            width: size.width,
            height: size.height,
        })
        .collect();
    sizes.dedup();
    sizes
}

fn tiles(info: &Info, size: Dimension, sc: &ScaleConstraint) -> TileEntry {
    let Some(tile) = info.tile_size else {
        return untiled(size);
    };

    let mut scale_factors: Vec<u32> = info
        .tiers()
        .iter()
        .map(|tier| sc.constrained_size(*tier))
        .filter(|tier| tier.width > 0)
        .map(|tier| (size.width as f64 / tier.width as f64).round().max(1.0) as u32)
        .collect();
    scale_factors.sort_unstable();
    scale_factors.dedup();

    TileEntry {
        width: tile.width,
        height: tile.height,
        scale_factors,
    }
}

/// Virtual tiling for single-tier sources: halve until the image fits one tile.
fn untiled(size: Dimension) -> TileEntry {
    let width = DEFAULT_TILE_SIZE.min(size.width.max(1));
    let height = DEFAULT_TILE_SIZE.min(size.height.max(1));
    let longest = size.width.max(size.height).max(1);

    let mut scale_factors = vec![1u32];
    let mut factor = 1u32;
    while longest.div_ceil(factor) > DEFAULT_TILE_SIZE {
        factor *= 2;
        scale_factors.push(factor);
    }

    TileEntry {
        width,
        height,
        scale_factors,
    }
}
