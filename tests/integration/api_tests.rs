//! API integration tests for info documents, image requests and errors.
//!
//! Tests verify:
//! - info.json for the 2.x and 3.x APIs
//! - Image bytes, dimensions and response headers
//! - HTTP status codes for rejected requests

use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::sync::Arc;

use iiif_streamer::geometry::Rectangle;
use iiif_streamer::policy::StaticPolicy;
use iiif_streamer::{Limits, RouterConfig, ServiceConfig};

use super::test_utils::{body_bytes, body_json, header, is_valid_jpeg, is_valid_png, TestApp};

fn decode(bytes: &[u8]) -> image::DynamicImage {
    image::load_from_memory(bytes).unwrap()
}

// =============================================================================
// Info Documents
// =============================================================================

#[tokio::test]
async fn test_info_v3() {
    let app = TestApp::new();
    let response = app.get("/iiif/3/cats.tif/info.json").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(header(&response, "content-type").starts_with("application/ld+json"));
    assert!(header(&response, "cache-control").contains("max-age="));

    let info = body_json(response).await;
    assert_eq!(info["@context"], "http://iiif.io/api/image/3/context.json");
    assert_eq!(info["id"], "https://images.example.com/iiif/3/cats.tif");
    assert_eq!(info["type"], "ImageService3");
    assert_eq!(info["protocol"], "http://iiif.io/api/image");
    assert_eq!(info["profile"], "level2");
    assert_eq!(info["width"], 512);
    assert_eq!(info["height"], 384);
    assert_eq!(info["maxWidth"], 512);
    assert_eq!(info["maxHeight"], 384);

    let sizes: Vec<(u64, u64)> = info["sizes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| (s["width"].as_u64().unwrap(), s["height"].as_u64().unwrap()))
        .collect();
    assert_eq!(sizes, vec![(128, 96), (256, 192), (512, 384)]);

    let tiles = &info["tiles"][0];
    assert_eq!(tiles["width"], 64);
    assert_eq!(tiles["height"], 64);
    assert_eq!(tiles["scaleFactors"], serde_json::json!([1, 2, 4]));
}

#[tokio::test]
async fn test_info_v2() {
    let app = TestApp::new();
    let response = app.get("/iiif/2/cats.tif/info.json").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(header(&response, "content-type").starts_with("application/json"));

    let info = body_json(response).await;
    assert_eq!(info["@context"], "http://iiif.io/api/image/2/context.json");
    assert_eq!(info["@id"], "https://images.example.com/iiif/2/cats.tif");
    assert_eq!(info["width"], 512);
    assert_eq!(
        info["profile"][0],
        "http://iiif.io/api/image/2/level2.json"
    );
    let description = &info["profile"][1];
    assert!(description["formats"]
        .as_array()
        .unwrap()
        .contains(&serde_json::json!("png")));
    assert_eq!(description["maxWidth"], 512);
}

#[tokio::test]
async fn test_info_with_scale_constraint() {
    let app = TestApp::new();
    let response = app.get("/iiif/3/cats.tif-1:2/info.json").await;
    assert_eq!(response.status(), StatusCode::OK);

    let info = body_json(response).await;
    assert_eq!(info["id"], "https://images.example.com/iiif/3/cats.tif-1%3A2");
    assert_eq!(info["width"], 256);
    assert_eq!(info["height"], 192);
}

#[tokio::test]
async fn test_info_for_raster_source() {
    let app = TestApp::new();
    let response = app.get("/iiif/3/birds.png/info.json").await;
    assert_eq!(response.status(), StatusCode::OK);

    let info = body_json(response).await;
    assert_eq!(info["width"], 300);
    assert_eq!(info["height"], 200);
    assert!(!info["tiles"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_bare_identifier_redirects_to_info() {
    let app = TestApp::new();
    let response = app.get("/iiif/3/cats.tif").await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        header(&response, "location"),
        "https://images.example.com/iiif/3/cats.tif/info.json"
    );
}

// =============================================================================
// Image Requests
// =============================================================================

#[tokio::test]
async fn test_full_image() {
    let app = TestApp::new();
    let response = app.get("/iiif/3/cats.tif/full/max/0/default.jpg").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-type"), "image/jpeg");
    assert!(header(&response, "cache-control").starts_with("public, max-age="));
    assert_eq!(
        header(&response, "link"),
        "<https://images.example.com/iiif/3/cats.tif/full/max/0/default.jpg>;rel=\"canonical\""
    );
    assert_eq!(header(&response, "x-cache"), "MISS");

    let body = body_bytes(response).await;
    assert!(is_valid_jpeg(&body));
    assert_eq!(decode(&body).to_rgb8().dimensions(), (512, 384));
}

#[tokio::test]
async fn test_region_size_and_rotation() {
    let app = TestApp::new();
    let response = app
        .get("/iiif/3/cats.tif/64,64,256,128/128,/90/default.png")
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-type"), "image/png");
    assert_eq!(
        header(&response, "link"),
        "<https://images.example.com/iiif/3/cats.tif/64,64,256,128/128,64/90/default.png>;rel=\"canonical\""
    );

    let body = body_bytes(response).await;
    assert!(is_valid_png(&body));
    // 128x64 after scaling, 64x128 after the quarter turn
    assert_eq!(decode(&body).to_rgb8().dimensions(), (64, 128));
}

#[tokio::test]
async fn test_v2_size_syntax() {
    let app = TestApp::new();
    let response = app.get("/iiif/2/cats.tif/full/pct:25/0/default.png").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header(&response, "link"),
        "<https://images.example.com/iiif/2/cats.tif/full/128,/0/default.png>;rel=\"canonical\""
    );
    let body = body_bytes(response).await;
    assert_eq!(decode(&body).to_rgb8().dimensions(), (128, 96));
}

#[tokio::test]
async fn test_uncompressed_tiles_are_exact() {
    let app = TestApp::new();
    let response = app.get("/iiif/3/dogs.tif/60,60,10,10/max/0/default.png").await;
    assert_eq!(response.status(), StatusCode::OK);

    let image = decode(&body_bytes(response).await).to_rgb8();
    assert_eq!(image.dimensions(), (10, 10));
    assert_eq!(*image.get_pixel(0, 0), super::test_utils::pattern(60, 60));
    assert_eq!(*image.get_pixel(9, 9), super::test_utils::pattern(69, 69));
}

#[tokio::test]
async fn test_gray_and_bitonal_qualities() {
    let app = TestApp::new();

    let response = app.get("/iiif/3/birds.png/full/max/0/gray.png").await;
    assert_eq!(response.status(), StatusCode::OK);
    let image = decode(&body_bytes(response).await);
    assert!(matches!(image.color(), image::ColorType::L8));

    let response = app.get("/iiif/3/birds.png/full/max/0/bitonal.png").await;
    assert_eq!(response.status(), StatusCode::OK);
    let image = decode(&body_bytes(response).await).to_luma8();
    assert!(image.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
}

#[tokio::test]
async fn test_scale_constrained_identifier() {
    let app = TestApp::new();
    let response = app.get("/iiif/3/cats.tif-1:2/full/max/0/default.png").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header(&response, "link"),
        "<https://images.example.com/iiif/3/cats.tif-1%3A2/full/max/0/default.png>;rel=\"canonical\""
    );
    let body = body_bytes(response).await;
    assert_eq!(decode(&body).to_rgb8().dimensions(), (256, 192));
}

#[tokio::test]
async fn test_max_pixels_caps_output() {
    let config = ServiceConfig {
        limits: Limits {
            max_pixels: 10_000,
            max_scale: 1.0,
        },
        ..ServiceConfig::default()
    };
    let app = TestApp::with(Arc::new(StaticPolicy::new()), config, RouterConfig::default());

    let response = app.get("/iiif/3/dogs.tif/full/max/0/default.png").await;
    assert_eq!(response.status(), StatusCode::OK);
    let (width, height) = decode(&body_bytes(response).await).to_rgb8().dimensions();
    assert!(u64::from(width) * u64::from(height) <= 10_000);
    assert_eq!(width, height);

    let info = body_json(app.get("/iiif/3/dogs.tif/info.json").await).await;
    assert_eq!(info["maxArea"], 10_000);
}

#[tokio::test]
async fn test_redaction_is_applied() {
    let policy = StaticPolicy::new().redact("dogs.tif", Rectangle::new(0, 0, 32, 32));
    let app = TestApp::with(
        Arc::new(policy),
        ServiceConfig::default(),
        RouterConfig::default(),
    );

    let response = app.get("/iiif/3/dogs.tif/full/max/0/default.png").await;
    assert_eq!(response.status(), StatusCode::OK);
    let image = decode(&body_bytes(response).await).to_rgb8();
    assert_eq!(image.get_pixel(10, 10).0, [0, 0, 0]);
    assert_eq!(*image.get_pixel(100, 100), super::test_utils::pattern(100, 100));
}

// =============================================================================
// Error Cases
// =============================================================================

async fn assert_error(app: &TestApp, uri: &str, status: StatusCode, error: &str) {
    let response = app.get(uri).await;
    assert_eq!(response.status(), status, "{}", uri);
    let body = body_json(response).await;
    assert_eq!(body["error"], error, "{}", uri);
    assert_eq!(body["status"], status.as_u16(), "{}", uri);
}

#[tokio::test]
async fn test_missing_source_is_404() {
    let app = TestApp::new();
    assert_error(
        &app,
        "/iiif/3/missing.tif/full/max/0/default.jpg",
        StatusCode::NOT_FOUND,
        "not_found",
    )
    .await;
    assert_error(
        &app,
        "/iiif/3/missing.tif/info.json",
        StatusCode::NOT_FOUND,
        "not_found",
    )
    .await;
}

#[tokio::test]
async fn test_unknown_version_is_404() {
    let app = TestApp::new();
    assert_error(
        &app,
        "/iiif/4/cats.tif/full/max/0/default.jpg",
        StatusCode::NOT_FOUND,
        "unknown_version",
    )
    .await;
}

#[tokio::test]
async fn test_malformed_components_are_400() {
    let app = TestApp::new();
    let cases = [
        ("/iiif/3/cats.tif/0,0,-5,10/max/0/default.jpg", "invalid_region"),
        ("/iiif/3/cats.tif/9000,9000,10,10/max/0/default.jpg", "invalid_region"),
        ("/iiif/3/cats.tif/full/full/0/default.jpg", "invalid_size"),
        ("/iiif/3/cats.tif/full/max/400/default.jpg", "invalid_rotation"),
        ("/iiif/3/cats.tif/full/max/0/sepia.jpg", "invalid_quality"),
        ("/iiif/3/cats.tif/full/1024,/0/default.jpg", "invalid_size"),
    ];
    for (uri, error) in cases {
        assert_error(&app, uri, StatusCode::BAD_REQUEST, error).await;
    }
}

#[tokio::test]
async fn test_upscaling_beyond_limit_is_403() {
    let app = TestApp::new();
    assert_error(
        &app,
        "/iiif/3/cats.tif/full/^1024,/0/default.jpg",
        StatusCode::FORBIDDEN,
        "size_restricted",
    )
    .await;
}

#[tokio::test]
async fn test_unsupported_formats_are_415() {
    let app = TestApp::new();
    assert_error(
        &app,
        "/iiif/3/cats.tif/full/max/0/default.webp",
        StatusCode::UNSUPPORTED_MEDIA_TYPE,
        "unsupported_format",
    )
    .await;
    assert_error(
        &app,
        "/iiif/3/notes.txt/info.json",
        StatusCode::UNSUPPORTED_MEDIA_TYPE,
        "unsupported_format",
    )
    .await;
}

#[tokio::test]
async fn test_denied_identifier_is_403() {
    let policy = StaticPolicy::new().deny("cats.tif");
    let app = TestApp::with(
        Arc::new(policy),
        ServiceConfig::default(),
        RouterConfig::default(),
    );
    assert_error(
        &app,
        "/iiif/3/cats.tif/full/max/0/default.jpg",
        StatusCode::FORBIDDEN,
        "forbidden",
    )
    .await;
    assert_error(
        &app,
        "/iiif/3/cats.tif/info.json",
        StatusCode::FORBIDDEN,
        "forbidden",
    )
    .await;

    let response = app.get("/iiif/3/dogs.tif/full/max/0/default.jpg").await;
    assert_eq!(response.status(), StatusCode::OK);
}

// =============================================================================
// Health and CORS
// =============================================================================

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let response = app.get("/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].is_string());
    assert!(body["cache"]["derivatives"]["entries"].is_number());
}

#[tokio::test]
async fn test_cors_preflight() {
    let app = TestApp::new();
    let request = Request::builder()
        .method("OPTIONS")
        .uri("/iiif/3/cats.tif/info.json")
        .header("origin", "https://viewer.example.com")
        .header("access-control-request-method", "GET")
        .body(Body::empty())
        .unwrap();
    let response = app.send(request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "access-control-allow-origin"), "*");
}
