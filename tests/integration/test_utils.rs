//! Test utilities for integration tests.
//!
//! Sources are written into a temporary directory served by a
//! [`FilesystemSource`]; pyramidal TIFFs are assembled by hand so that every
//! tier and tile is known exactly.

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, Rgb, RgbImage};
use tempfile::TempDir;
use tower::ServiceExt;

use iiif_streamer::cache::{DerivativeCache, MemoryDerivativeCache, MemoryInfoCache};
use iiif_streamer::codec::{ImageCodec, SourceCodec};
use iiif_streamer::iiif::InfoOptions;
use iiif_streamer::policy::{Policy, StaticPolicy};
use iiif_streamer::source::FilesystemSource;
use iiif_streamer::{
    create_router, AppState, DerivativeCoordinator, ImageService, RouterConfig, ServiceConfig,
};

// =============================================================================
// Source Fixtures
// =============================================================================

/// Color of the full-resolution pixel at `(x, y)`. Every tier of a fixture
/// pyramid shows this picture at its own downsample.
pub fn pattern(x: u32, y: u32) -> Rgb<u8> {
    Rgb([(x / 4 % 256) as u8, (y / 4 % 256) as u8, 128])
}

/// Little-endian tiled TIFF with one directory per level.
///
/// Level sizes are `(width, height)`, largest first; tiles are `tile` pixels
/// square and JPEG compressed when `jpeg` is set, raw RGB otherwise.
pub fn pyramidal_tiff(levels: &[(u32, u32)], tile: u32, jpeg: bool) -> Vec<u8> {
    let full_width = levels.first().map(|level| level.0).unwrap_or(1);
    let mut out = b"II*\0".to_vec();
    // Offset of the pointer to the next directory
    let mut next_ifd_pointer = out.len();
    out.extend_from_slice(&[0; 4]);

    for &(width, height) in levels {
        let downsample = (full_width / width).max(1);
        let mut offsets = Vec::new();
        let mut counts = Vec::new();

        for ty in 0..height.div_ceil(tile) {
            for tx in 0..width.div_ceil(tile) {
                let tile_image = RgbImage::from_fn(tile, tile, |x, y| {
                    let (px, py) = (tx * tile + x, ty * tile + y);
                    if px < width && py < height {
                        pattern(px * downsample, py * downsample)
                    } else {
                        Rgb([0, 0, 0])
                    }
                });
                let data = if jpeg {
                    let mut encoded = Vec::new();
                    JpegEncoder::new_with_quality(&mut encoded, 95)
                        .encode_image(&tile_image)
                        .unwrap();
                    encoded
                } else {
                    tile_image.into_raw()
                };
                offsets.push(out.len() as u32);
                counts.push(data.len() as u32);
                out.extend_from_slice(&data);
            }
        }

        let offsets_value = write_long_array(&mut out, &offsets);
        let counts_value = write_long_array(&mut out, &counts);
        if out.len() % 2 == 1 {
            out.push(0);
        }

        let ifd_offset = out.len() as u32;
        out[next_ifd_pointer..next_ifd_pointer + 4].copy_from_slice(&ifd_offset.to_le_bytes());

        let tile_count = offsets.len() as u32;
        // (tag, type, count, value); type 3 is SHORT, 4 is LONG
        let entries: Vec<(u16, u16, u32, u32)> = vec![
            (256, 4, 1, width),
            (257, 4, 1, height),
            (258, 3, 1, 8),
            (259, 3, 1, if jpeg { 7 } else { 1 }),
            (262, 3, 1, if jpeg { 6 } else { 2 }),
            (277, 3, 1, 3),
            (322, 3, 1, tile),
            (323, 3, 1, tile),
            (324, 4, tile_count, offsets_value),
            (325, 4, tile_count, counts_value),
        ];
        out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        for (tag, kind, count, value) in entries {
            out.extend_from_slice(&tag.to_le_bytes());
            out.extend_from_slice(&kind.to_le_bytes());
            out.extend_from_slice(&count.to_le_bytes());
            // SHORT values sit left-justified in the 4-byte field
            if kind == 3 && count == 1 {
                out.extend_from_slice(&(value as u16).to_le_bytes());
                out.extend_from_slice(&[0, 0]);
            } else {
                out.extend_from_slice(&value.to_le_bytes());
            }
        }
        next_ifd_pointer = out.len();
        out.extend_from_slice(&[0; 4]);
    }
    out
}

/// Inline a single LONG, or append the array and return its offset.
fn write_long_array(out: &mut Vec<u8>, values: &[u32]) -> u32 {
    if let [single] = values {
        return *single;
    }
    let offset = out.len() as u32;
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    offset
}

/// A PNG of `width` x `height` showing [`pattern`].
pub fn png_image(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, pattern);
    let mut out = std::io::Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

/// The standard source directory:
/// - `cats.tif`: JPEG-tiled pyramid, 512x384 / 256x192 / 128x96, 64px tiles
/// - `dogs.tif`: uncompressed pyramid, 256x256 / 128x128, 64px tiles
/// - `birds.png`: 300x200 PNG
/// - `notes.txt`: not an image
pub fn source_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_source(
        dir.path(),
        "cats.tif",
        &pyramidal_tiff(&[(512, 384), (256, 192), (128, 96)], 64, true),
    );
    write_source(
        dir.path(),
        "dogs.tif",
        &pyramidal_tiff(&[(256, 256), (128, 128)], 64, false),
    );
    write_source(dir.path(), "birds.png", &png_image(300, 200));
    write_source(dir.path(), "notes.txt", b"just some words, not pixels");
    dir
}

pub fn write_source(dir: &Path, name: &str, data: &[u8]) {
    std::fs::write(dir.join(name), data).unwrap();
}

// =============================================================================
// Application Fixtures
// =============================================================================

/// A router over [`source_dir`], plus handles for assertions.
pub struct TestApp {
    pub dir: TempDir,
    pub service: Arc<ImageService>,
    pub router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with(
            Arc::new(StaticPolicy::new()),
            ServiceConfig::default(),
            RouterConfig::default(),
        )
    }

    pub fn with_router_config(config: RouterConfig) -> Self {
        Self::with(
            Arc::new(StaticPolicy::new()),
            ServiceConfig::default(),
            config,
        )
    }

    pub fn with(
        policy: Arc<dyn Policy>,
        service_config: ServiceConfig,
        router_config: RouterConfig,
    ) -> Self {
        let dir = source_dir();
        let source = Arc::new(FilesystemSource::new(dir.path()));
        Self::with_codec(
            dir,
            Arc::new(SourceCodec::new(source)),
            policy,
            service_config,
            router_config,
        )
    }

    /// An app decoding through `codec` instead of the source directory.
    pub fn with_codec(
        dir: TempDir,
        codec: Arc<dyn ImageCodec>,
        policy: Arc<dyn Policy>,
        service_config: ServiceConfig,
        router_config: RouterConfig,
    ) -> Self {
        Self::with_caches(
            dir,
            codec,
            Arc::new(MemoryDerivativeCache::new()),
            policy,
            service_config,
            router_config,
        )
    }

    /// An app over the sources in `dir` storing derivatives in `derivatives`.
    pub fn with_derivative_cache(dir: TempDir, derivatives: Arc<dyn DerivativeCache>) -> Self {
        let source = Arc::new(FilesystemSource::new(dir.path()));
        Self::with_caches(
            dir,
            Arc::new(SourceCodec::new(source)),
            derivatives,
            Arc::new(StaticPolicy::new()),
            ServiceConfig::default(),
            RouterConfig::default(),
        )
    }

    fn with_caches(
        dir: TempDir,
        codec: Arc<dyn ImageCodec>,
        derivatives: Arc<dyn DerivativeCache>,
        policy: Arc<dyn Policy>,
        service_config: ServiceConfig,
        router_config: RouterConfig,
    ) -> Self {
        let limits = service_config.limits;
        let coordinator = Arc::new(DerivativeCoordinator::new(
            derivatives,
            Arc::new(MemoryInfoCache::new()),
        ));
        let service = Arc::new(ImageService::new(codec, coordinator, policy, service_config));
        let state = AppState::new(service.clone(), InfoOptions { limits })
            .with_base_uri(Some("https://images.example.com".to_string()));
        let router = create_router(state, router_config.with_tracing(false));

        Self {
            dir,
            service,
            router,
        }
    }

    /// Send a GET for `uri`.
    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Response Helpers
// =============================================================================

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub fn header<'a>(response: &'a Response<Body>, name: &str) -> &'a str {
    response
        .headers()
        .get(name)
        .unwrap_or_else(|| panic!("missing header {}", name))
        .to_str()
        .unwrap()
}

pub fn is_valid_jpeg(data: &[u8]) -> bool {
    data.len() >= 4 && data[..2] == [0xFF, 0xD8] && data[data.len() - 2..] == [0xFF, 0xD9]
}

pub fn is_valid_png(data: &[u8]) -> bool {
    data.starts_with(b"\x89PNG\r\n\x1a\n")
}
