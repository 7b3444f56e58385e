//! Pixel processing after decode.
//!
//! The codec hands over the requested region at the selected tier's
//! resolution. From there the steps follow the operation list:
//!
//! ```text
//! scale -> redact -> mirror/rotate -> color -> watermark -> encode
//! ```
//!
//! Redactions are placed in source coordinates, so they are painted before
//! the geometry is rotated; watermarks sit on the finished canvas.
//!
//! Everything here is CPU-bound and is run on the blocking pool.

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, ImageFormat, Rgba, RgbaImage};
use tracing::debug;

use crate::error::CodecError;
use crate::format::Format;
use crate::geometry::{Dimension, Rectangle};
use crate::operation::{CanonicalOperationList, ColorTransform, Encode, Overlay, Rotate};

/// Luma threshold separating black from white in bitonal output.
pub const BITONAL_THRESHOLD: u8 = 128;

const WHITE: [u8; 3] = [255, 255, 255];

/// Apply every post-decode operation of `canonical` to `decoded`, the
/// pixels of the canonical region, and encode the result.
pub fn render(decoded: DynamicImage, canonical: &CanonicalOperationList) -> Result<Bytes, CodecError> {
    let list = canonical.list();
    let target = canonical.scaled_size();

    let mut image = resize(decoded, target);

    let region = canonical.region();
    for overlay in list.overlays() {
        if let Overlay::Redaction(rect) = overlay {
            redact(&mut image, region, rect);
        }
    }

    let encode = list.encode().copied().unwrap_or_else(|| Encode::new(Format::Jpg));
    if let Some(rotate) = list.rotate() {
        image = rotate_image(image, rotate, background_for(&encode));
    }
    if let Some(color) = list.color() {
        image = apply_color(image, *color);
    }
    for overlay in list.overlays() {
        if let Overlay::Watermark(watermark) = overlay {
            let mut canvas = image.to_rgba8();
            let canvas_size = Dimension::new(canvas.width(), canvas.height());
            let mark_size = Dimension::new(watermark.image.width(), watermark.image.height());
            let (x, y) = watermark
                .position
                .origin(canvas_size, mark_size, watermark.inset);
            imageops::overlay(&mut canvas, watermark.image.as_ref(), i64::from(x), i64::from(y));
            image = DynamicImage::ImageRgba8(canvas);
        }
    }

    debug!(
        fingerprint = %canonical.fingerprint(),
        width = image.width(),
        height = image.height(),
        format = %encode.format,
        "Encoding derivative"
    );
    encode_image(&image, &encode)
}

/// Scale to exactly `target`; a no-op when the size already matches.
pub fn resize(image: DynamicImage, target: Dimension) -> DynamicImage {
    let (width, height) = image.dimensions();
    if (width, height) == (target.width, target.height) || target.is_empty() {
        return image;
    }
    let filter = if target.area() < u64::from(width) * u64::from(height) {
        FilterType::Lanczos3
    } else {
        FilterType::CatmullRom
    };
    image.resize_exact(target.width, target.height, filter)
}

/// Paint the part of `redaction` (full-image coordinates) that falls inside
/// `region` black, mapping it onto the already scaled `image`.
fn redact(image: &mut DynamicImage, region: Rectangle, redaction: &Rectangle) {
    let Some(hit) = region.intersection(redaction) else {
        return;
    };
    let (width, height) = image.dimensions();
    let sx = f64::from(width) / f64::from(region.width);
    let sy = f64::from(height) / f64::from(region.height);

    let x0 = (f64::from(hit.x - region.x) * sx).floor() as u32;
    let y0 = (f64::from(hit.y - region.y) * sy).floor() as u32;
    let x1 = ((f64::from(hit.x - region.x + hit.width) * sx).ceil() as u32).min(width);
    let y1 = ((f64::from(hit.y - region.y + hit.height) * sy).ceil() as u32).min(height);

    let mut canvas = image.to_rgba8();
    for y in y0..y1 {
        for x in x0..x1 {
            canvas.put_pixel(x, y, Rgba([0, 0, 0, 255]));
        }
    }
    *image = match image {
        DynamicImage::ImageRgb8(_) => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8()),
        _ => DynamicImage::ImageRgba8(canvas),
    };
}

/// Fill for canvas areas no source pixel maps to.
fn background_for(encode: &Encode) -> Rgba<u8> {
    if encode.format.supports_transparency() && encode.background.is_none() {
        return Rgba([0, 0, 0, 0]);
    }
    let [r, g, b] = encode.background.unwrap_or(WHITE);
    Rgba([r, g, b, 255])
}

/// Mirror (horizontally) and then rotate clockwise.
pub fn rotate_image(image: DynamicImage, rotate: &Rotate, background: Rgba<u8>) -> DynamicImage {
    let image = if rotate.mirror() { image.fliph() } else { image };
    match rotate.degrees() {
        d if d == 0.0 => image,
        d if d == 90.0 => image.rotate90(),
        d if d == 180.0 => image.rotate180(),
        d if d == 270.0 => image.rotate270(),
        _ => DynamicImage::ImageRgba8(rotate_bilinear(&image.to_rgba8(), rotate, background)),
    }
}

/// Arbitrary-angle rotation onto a canvas large enough for the bounding box.
fn rotate_bilinear(source: &RgbaImage, rotate: &Rotate, background: Rgba<u8>) -> RgbaImage {
    let (sw, sh) = source.dimensions();
    let out = rotate.resulting_size(Dimension::new(sw, sh));
    let radians = rotate.degrees().to_radians();
    let (sin, cos) = radians.sin_cos();
    let (scx, scy) = (f64::from(sw) / 2.0, f64::from(sh) / 2.0);
    let (ocx, ocy) = (f64::from(out.width) / 2.0, f64::from(out.height) / 2.0);

    RgbaImage::from_fn(out.width, out.height, |x, y| {
        let dx = f64::from(x) + 0.5 - ocx;
        let dy = f64::from(y) + 0.5 - ocy;
        // Inverse of a clockwise rotation in y-down coordinates
        let u = dx * cos + dy * sin + scx - 0.5;
        let v = -dx * sin + dy * cos + scy - 0.5;
        sample(source, u, v).unwrap_or(background)
    })
}

fn sample(image: &RgbaImage, u: f64, v: f64) -> Option<Rgba<u8>> {
    let (w, h) = image.dimensions();
    if u < -0.5 || v < -0.5 || u > f64::from(w) - 0.5 || v > f64::from(h) - 0.5 {
        return None;
    }
    let u = u.clamp(0.0, f64::from(w - 1));
    let v = v.clamp(0.0, f64::from(h - 1));
    let (x0, y0) = (u.floor() as u32, v.floor() as u32);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
    let (fx, fy) = (u - f64::from(x0), v - f64::from(y0));

    let p00 = image.get_pixel(x0, y0).0;
    let p10 = image.get_pixel(x1, y0).0;
    let p01 = image.get_pixel(x0, y1).0;
    let p11 = image.get_pixel(x1, y1).0;
    let mut out = [0u8; 4];
    for c in 0..4 {
        let top = f64::from(p00[c]) * (1.0 - fx) + f64::from(p10[c]) * fx;
        let bottom = f64::from(p01[c]) * (1.0 - fx) + f64::from(p11[c]) * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round() as u8;
    }
    Some(Rgba(out))
}

pub fn apply_color(image: DynamicImage, color: ColorTransform) -> DynamicImage {
    let has_alpha = image.color().has_alpha();
    match (color, has_alpha) {
        (ColorTransform::Gray, false) => DynamicImage::ImageLuma8(image.to_luma8()),
        (ColorTransform::Gray, true) => DynamicImage::ImageLumaA8(image.to_luma_alpha8()),
        (ColorTransform::Bitonal, false) => {
            let mut luma = image.to_luma8();
            for pixel in luma.pixels_mut() {
                pixel.0[0] = if pixel.0[0] < BITONAL_THRESHOLD { 0 } else { 255 };
            }
            DynamicImage::ImageLuma8(luma)
        }
        (ColorTransform::Bitonal, true) => {
            let mut luma = image.to_luma_alpha8();
            for pixel in luma.pixels_mut() {
                pixel.0[0] = if pixel.0[0] < BITONAL_THRESHOLD { 0 } else { 255 };
            }
            DynamicImage::ImageLumaA8(luma)
        }
    }
}

/// Composite any alpha channel over `background`.
fn flatten(image: &DynamicImage, background: [u8; 3]) -> DynamicImage {
    if !image.color().has_alpha() {
        return image.clone();
    }
    let gray = !matches!(
        image,
        DynamicImage::ImageRgba8(_) | DynamicImage::ImageRgba16(_) | DynamicImage::ImageRgba32F(_)
    );
    let mut rgba = image.to_rgba8();
    for pixel in rgba.pixels_mut() {
        let alpha = u16::from(pixel.0[3]);
        for c in 0..3 {
            let blended = (u16::from(pixel.0[c]) * alpha + u16::from(background[c]) * (255 - alpha)) / 255;
            pixel.0[c] = blended as u8;
        }
        pixel.0[3] = 255;
    }
    let flat = DynamicImage::ImageRgba8(rgba);
    if gray {
        DynamicImage::ImageLuma8(flat.to_luma8())
    } else {
        DynamicImage::ImageRgb8(flat.to_rgb8())
    }
}

/// Encode to the requested output format.
pub fn encode_image(image: &DynamicImage, encode: &Encode) -> Result<Bytes, CodecError> {
    let encode_error = |e: image::ImageError| CodecError::Encode(format!("{}: {}", encode.format, e));
    let mut out = Cursor::new(Vec::new());

    match encode.format {
        Format::Jpg => {
            let flat = flatten(image, encode.background.unwrap_or(WHITE));
            let flat = match flat {
                DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => flat,
                other => DynamicImage::ImageRgb8(other.to_rgb8()),
            };
            JpegEncoder::new_with_quality(&mut out, encode.quality)
                .encode_image(&flat)
                .map_err(encode_error)?;
        }
        Format::Bmp => {
            let flat = flatten(image, encode.background.unwrap_or(WHITE));
            DynamicImage::ImageRgb8(flat.to_rgb8())
                .write_to(&mut out, ImageFormat::Bmp)
                .map_err(encode_error)?;
        }
        Format::Gif => {
            DynamicImage::ImageRgba8(image.to_rgba8())
                .write_to(&mut out, ImageFormat::Gif)
                .map_err(encode_error)?;
        }
        Format::Png | Format::Tif => {
            let normalized = match image {
                DynamicImage::ImageLuma8(_)
                | DynamicImage::ImageLumaA8(_)
                | DynamicImage::ImageRgb8(_)
                | DynamicImage::ImageRgba8(_) => image.clone(),
                other if other.color().has_alpha() => DynamicImage::ImageRgba8(other.to_rgba8()),
                other => DynamicImage::ImageRgb8(other.to_rgb8()),
            };
            let target = if encode.format == Format::Png {
                ImageFormat::Png
            } else {
                ImageFormat::Tiff
            };
            let normalized = match (&normalized, target) {
                // The TIFF encoder has no gray+alpha layout
                (DynamicImage::ImageLumaA8(_), ImageFormat::Tiff) => {
                    DynamicImage::ImageRgba8(normalized.to_rgba8())
                }
                _ => normalized,
            };
            normalized.write_to(&mut out, target).map_err(encode_error)?;
        }
        Format::Webp | Format::Jp2 => {
            return Err(CodecError::UnsupportedFormat(format!(
                "{} output",
                encode.format
            )))
        }
    }

    Ok(Bytes::from(out.into_inner()))
}
