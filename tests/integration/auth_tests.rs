//! Signed URL authentication through the router.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::StatusCode;

use iiif_streamer::server::SignedUrlAuth;
use iiif_streamer::RouterConfig;

use super::test_utils::{body_json, TestApp};

const SECRET: &str = "integration-test-secret";
const IMAGE_PATH: &str = "/iiif/3/cats.tif/full/128,/0/default.jpg";

fn auth() -> SignedUrlAuth {
    SignedUrlAuth::new(SECRET).unwrap()
}

fn signed_app() -> TestApp {
    TestApp::with_router_config(RouterConfig::default().with_auth(auth()))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

#[tokio::test]
async fn test_valid_signature_is_accepted() {
    let app = signed_app();
    let url = auth().generate_signed_url("", IMAGE_PATH, Duration::from_secs(300), &[]);

    let response = app.get(&url).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_signature_covers_extra_params() {
    let app = signed_app();
    let url = auth().generate_signed_url(
        "",
        "/iiif/3/cats.tif/info.json",
        Duration::from_secs(300),
        &[("viewer", "mirador")],
    );
    let response = app.get(&url).await;
    assert_eq!(response.status(), StatusCode::OK);

    // Changing a signed parameter invalidates the signature
    let tampered = url.replace("viewer=mirador", "viewer=other");
    let response = app.get(&tampered).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_missing_signature_is_rejected() {
    let app = signed_app();
    let response = app.get(IMAGE_PATH).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "missing_signature");
}

#[tokio::test]
async fn test_expired_signature_is_rejected() {
    let app = signed_app();
    let expiry = unix_now() - 60;
    let signature = auth().sign_with_expiry(IMAGE_PATH, expiry);

    let response = app
        .get(&format!("{}?exp={}&sig={}", IMAGE_PATH, expiry, signature))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "signature_expired");
}

#[tokio::test]
async fn test_signature_for_other_path_is_rejected() {
    let app = signed_app();
    let expiry = unix_now() + 300;
    let signature = auth().sign_with_expiry("/iiif/3/dogs.tif/full/128,/0/default.jpg", expiry);

    let response = app
        .get(&format!("{}?exp={}&sig={}", IMAGE_PATH, expiry, signature))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid_signature");
}

#[tokio::test]
async fn test_other_secret_is_rejected() {
    let app = signed_app();
    let other = SignedUrlAuth::new("some-other-secret").unwrap();
    let url = other.generate_signed_url("", IMAGE_PATH, Duration::from_secs(300), &[]);

    let response = app.get(&url).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_malformed_parameters_are_400() {
    let app = signed_app();

    let response = app
        .get(&format!("{}?exp=soon&sig=abcd", IMAGE_PATH))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .get(&format!("{}?exp={}&sig=not-hex", IMAGE_PATH, unix_now() + 300))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_is_public() {
    let app = signed_app();
    let response = app.get("/health").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_no_auth_by_default() {
    let app = TestApp::new();
    let response = app.get(IMAGE_PATH).await;
    assert_eq!(response.status(), StatusCode::OK);
}
