//! Resolution tier selection on a large pyramid.
//!
//! A synthetic codec reports the tiers of a 6000x4000 source and records
//! which tier and region every request decodes, without holding any pixels.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::http::StatusCode;
use image::{DynamicImage, RgbImage};

use iiif_streamer::codec::{ImageCodec, Info};
use iiif_streamer::geometry::{Dimension, Rectangle};
use iiif_streamer::policy::StaticPolicy;
use iiif_streamer::{CodecError, Format, IoError, RouterConfig, ServiceConfig};

use super::test_utils::{body_bytes, TestApp};

const TIERS: [(u32, u32); 5] = [
    (6000, 4000),
    (3000, 2000),
    (1500, 1000),
    (750, 500),
    (375, 250),
];

struct SyntheticPyramid {
    identifier: &'static str,
    tiers: Vec<Dimension>,
    decoded: Mutex<Vec<(usize, Rectangle)>>,
}

impl SyntheticPyramid {
    fn new(identifier: &'static str, tiers: &[(u32, u32)]) -> Self {
        Self {
            identifier,
            tiers: tiers
                .iter()
                .map(|&(width, height)| Dimension::new(width, height))
                .collect(),
            decoded: Mutex::new(Vec::new()),
        }
    }

    fn take(&self) -> Vec<(usize, Rectangle)> {
        std::mem::take(&mut *self.decoded.lock().unwrap())
    }
}

#[async_trait]
impl ImageCodec for SyntheticPyramid {
    async fn read_info(&self, identifier: &str) -> Result<Info, CodecError> {
        if identifier != self.identifier {
            return Err(CodecError::Io(IoError::NotFound(identifier.to_string())));
        }
        Ok(Info {
            size: self.tiers[0],
            tiers: self.tiers.clone(),
            tile_size: Some(Dimension::new(256, 256)),
            format: Format::Tif,
        })
    }

    async fn decode(
        &self,
        _identifier: &str,
        tier: usize,
        region: Rectangle,
    ) -> Result<DynamicImage, CodecError> {
        self.decoded.lock().unwrap().push((tier, region));
        Ok(DynamicImage::ImageRgb8(RgbImage::new(
            region.width,
            region.height,
        )))
    }
}

fn synthetic_app(codec: SyntheticPyramid) -> (TestApp, Arc<SyntheticPyramid>) {
    let codec = Arc::new(codec);
    let app = TestApp::with_codec(
        tempfile::tempdir().unwrap(),
        codec.clone(),
        Arc::new(StaticPolicy::new()),
        ServiceConfig::default(),
        RouterConfig::default(),
    );
    (app, codec)
}

async fn decoded_for(uri: &str) -> (Vec<(usize, Rectangle)>, (u32, u32)) {
    let (app, codec) = synthetic_app(SyntheticPyramid::new("big.tif", &TIERS));
    let response = app.get(uri).await;
    assert_eq!(response.status(), StatusCode::OK, "{}", uri);
    let output = image::load_from_memory(&body_bytes(response).await)
        .unwrap()
        .to_rgb8()
        .dimensions();
    (codec.take(), output)
}

#[tokio::test]
async fn test_thumbnail_uses_smallest_sufficient_tier() {
    let (decoded, output) = decoded_for("/iiif/3/big.tif/full/300,/0/default.png").await;
    assert_eq!(decoded, vec![(4, Rectangle::new(0, 0, 375, 250))]);
    assert_eq!(output, (300, 200));
}

#[tokio::test]
async fn test_exact_tier_size_is_used_directly() {
    let (decoded, output) = decoded_for("/iiif/3/big.tif/full/1500,/0/default.png").await;
    assert_eq!(decoded, vec![(2, Rectangle::new(0, 0, 1500, 1000))]);
    assert_eq!(output, (1500, 1000));
}

#[tokio::test]
async fn test_region_maps_into_tier_coordinates() {
    let (decoded, output) =
        decoded_for("/iiif/3/big.tif/2000,1000,2000,2000/500,/0/default.png").await;
    assert_eq!(decoded, vec![(2, Rectangle::new(500, 250, 500, 500))]);
    assert_eq!(output, (500, 500));
}

#[tokio::test]
async fn test_between_tiers_rounds_to_larger_tier() {
    // 1600 px wide needs more than tier 2 (1500) offers
    let (decoded, output) = decoded_for("/iiif/3/big.tif/full/1600,/0/default.png").await;
    assert_eq!(decoded, vec![(1, Rectangle::new(0, 0, 3000, 2000))]);
    assert_eq!(output, (1600, 1067));
}

#[tokio::test]
async fn test_full_resolution_region_uses_tier_zero() {
    let (decoded, output) =
        decoded_for("/iiif/3/big.tif/5900,3900,100,100/max/0/default.png").await;
    assert_eq!(decoded, vec![(0, Rectangle::new(5900, 3900, 100, 100))]);
    assert_eq!(output, (100, 100));
}

#[tokio::test]
async fn test_scale_constraint_selects_reduced_tier() {
    let (decoded, output) = decoded_for("/iiif/3/big.tif-1:4/full/max/0/default.png").await;
    assert_eq!(decoded, vec![(2, Rectangle::new(0, 0, 1500, 1000))]);
    assert_eq!(output, (1500, 1000));
}

#[tokio::test]
async fn test_square_region_keeps_aspect() {
    let (decoded, output) =
        decoded_for("/iiif/3/big.tif/square/!200,200/0/default.png").await;
    assert_eq!(decoded, vec![(4, Rectangle::new(62, 0, 250, 250))]);
    assert_eq!(output, (200, 200));
}

#[tokio::test]
async fn test_half_of_a_quarter_region_reads_tier_one() {
    let codec = SyntheticPyramid::new("cats.tif", &[(6000, 4000), (3000, 2000), (1500, 1000)]);
    let (app, codec) = synthetic_app(codec);

    let response = app
        .get("/iiif/3/cats.tif/0,0,3000,2000/pct:50/0/default.jpg")
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        super::test_utils::header(&response, "link"),
        "<https://images.example.com/iiif/3/cats.tif/0,0,3000,2000/1500,1000/0/default.jpg>;rel=\"canonical\""
    );
    let output = image::load_from_memory(&body_bytes(response).await)
        .unwrap()
        .to_rgb8()
        .dimensions();

    // The decoded tier region already has the output size
    assert_eq!(codec.take(), vec![(1, Rectangle::new(0, 0, 1500, 1000))]);
    assert_eq!(output, (1500, 1000));
}

#[tokio::test]
async fn test_unknown_identifier_is_404() {
    let (app, codec) = synthetic_app(SyntheticPyramid::new("big.tif", &TIERS));
    let response = app.get("/iiif/3/small.tif/full/max/0/default.jpg").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(codec.take().is_empty());
}
