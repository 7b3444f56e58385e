//! Derivative caching through the router.
//!
//! Tests verify:
//! - Repeated requests are served from the derivative cache
//! - Concurrent identical requests are computed once
//! - Equivalent URIs share one derivative
//! - The admin endpoint purges one identifier
//! - On-disk derivatives outlive the process that stored them

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use image::DynamicImage;
use tower::ServiceExt;

use iiif_streamer::cache::FilesystemDerivativeCache;
use iiif_streamer::codec::{ImageCodec, Info, SourceCodec};
use iiif_streamer::geometry::Rectangle;
use iiif_streamer::policy::StaticPolicy;
use iiif_streamer::source::FilesystemSource;
use iiif_streamer::{CodecError, RouterConfig, ServiceConfig};

use super::test_utils::{body_bytes, body_json, header, source_dir, write_source, png_image, TestApp};

// =============================================================================
// Counting Codec
// =============================================================================

/// Wraps a codec, counting calls and slowing decodes down so that
/// concurrent requests overlap.
struct CountingCodec {
    inner: SourceCodec,
    info_reads: AtomicUsize,
    decodes: AtomicUsize,
    delay: Duration,
}

impl CountingCodec {
    fn decodes(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }

    fn info_reads(&self) -> usize {
        self.info_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageCodec for CountingCodec {
    async fn read_info(&self, identifier: &str) -> Result<Info, CodecError> {
        self.info_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_info(identifier).await
    }

    async fn decode(
        &self,
        identifier: &str,
        tier: usize,
        region: Rectangle,
    ) -> Result<DynamicImage, CodecError> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.decode(identifier, tier, region).await
    }

    async fn purge(&self, identifier: &str) {
        self.inner.purge(identifier).await
    }
}

fn counting_app(router_config: RouterConfig) -> (TestApp, Arc<CountingCodec>) {
    let dir = source_dir();
    let codec = Arc::new(CountingCodec {
        inner: SourceCodec::new(Arc::new(FilesystemSource::new(dir.path()))),
        info_reads: AtomicUsize::new(0),
        decodes: AtomicUsize::new(0),
        delay: Duration::from_millis(50),
    });
    let app = TestApp::with_codec(
        dir,
        codec.clone(),
        Arc::new(StaticPolicy::new()),
        ServiceConfig::default(),
        router_config,
    );
    (app, codec)
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_second_request_is_a_hit() {
    let (app, codec) = counting_app(RouterConfig::default());
    let uri = "/iiif/3/cats.tif/full/256,/0/default.jpg";

    let first = app.get(uri).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(header(&first, "x-cache"), "MISS");
    let first = body_bytes(first).await;

    let second = app.get(uri).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(header(&second, "x-cache"), "HIT");
    assert_eq!(body_bytes(second).await, first);

    assert_eq!(codec.decodes(), 1);
    assert_eq!(codec.info_reads(), 1);
}

#[tokio::test]
async fn test_concurrent_identical_requests_compute_once() {
    let (app, codec) = counting_app(RouterConfig::default());
    let uri = "/iiif/3/cats.tif/0,0,256,256/128,/0/default.png";

    let mut handles = Vec::new();
    for _ in 0..8 {
        let router = app.router.clone();
        handles.push(tokio::spawn(async move {
            let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
            let response = router.oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            body_bytes(response).await
        }));
    }

    let mut bodies = Vec::new();
    for handle in handles {
        bodies.push(handle.await.unwrap());
    }
    assert!(bodies.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(codec.decodes(), 1);
    assert_eq!(codec.info_reads(), 1);

    let stats = app.service.stats().await;
    assert_eq!(stats.derivatives.entries, 1);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test]
async fn test_equivalent_uris_share_a_derivative() {
    let (app, codec) = counting_app(RouterConfig::default());

    // Whole-image region, no-op size and full rotation all canonicalize away
    let uris = [
        "/iiif/3/cats.tif/full/max/0/default.jpg",
        "/iiif/3/cats.tif/0,0,512,384/max/0/default.jpg",
        "/iiif/3/cats.tif/full/512,384/0/default.jpg",
        "/iiif/3/cats.tif/pct:0,0,100,100/max/0/default.jpg",
    ];
    let mut statuses = Vec::new();
    for uri in uris {
        let response = app.get(uri).await;
        assert_eq!(response.status(), StatusCode::OK, "{}", uri);
        assert_eq!(
            header(&response, "link"),
            "<https://images.example.com/iiif/3/cats.tif/full/max/0/default.jpg>;rel=\"canonical\"",
            "{}",
            uri
        );
        statuses.push(header(&response, "x-cache").to_string());
    }
    assert_eq!(statuses, vec!["MISS", "HIT", "HIT", "HIT"]);
    assert_eq!(codec.decodes(), 1);
}

#[tokio::test]
async fn test_different_formats_are_different_derivatives() {
    let (app, codec) = counting_app(RouterConfig::default());

    let jpg = app.get("/iiif/3/cats.tif/full/128,/0/default.jpg").await;
    let png = app.get("/iiif/3/cats.tif/full/128,/0/default.png").await;
    assert_eq!(header(&jpg, "x-cache"), "MISS");
    assert_eq!(header(&png, "x-cache"), "MISS");
    assert_eq!(codec.decodes(), 2);
}

#[tokio::test]
async fn test_failures_are_not_cached() {
    let (app, codec) = counting_app(RouterConfig::default());
    let uri = "/iiif/3/later.png/full/max/0/default.png";

    let response = app.get(uri).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    write_source(app.dir.path(), "later.png", &png_image(40, 30));
    let response = app.get(uri).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(codec.info_reads(), 2);
}

#[tokio::test]
async fn test_admin_purge() {
    let (app, codec) = counting_app(RouterConfig::default().with_admin(true));
    let uri = "/iiif/3/cats.tif/full/128,/0/default.jpg";

    assert_eq!(header(&app.get(uri).await, "x-cache"), "MISS");
    assert_eq!(header(&app.get("/iiif/3/dogs.tif/full/64,/0/default.jpg").await, "x-cache"), "MISS");

    let request = Request::builder()
        .method("DELETE")
        .uri("/admin/cache/cats.tif")
        .body(Body::empty())
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await;
    assert_eq!(report["identifier"], "cats.tif");
    assert_eq!(report["derivatives"], 1);
    assert_eq!(report["info"], true);

    // cats.tif is recomputed, dogs.tif is untouched
    assert_eq!(header(&app.get(uri).await, "x-cache"), "MISS");
    assert_eq!(header(&app.get("/iiif/3/dogs.tif/full/64,/0/default.jpg").await, "x-cache"), "HIT");
    assert_eq!(codec.decodes(), 3);
}

#[tokio::test]
async fn test_admin_purge_disabled_by_default() {
    let (app, _) = counting_app(RouterConfig::default());
    let request = Request::builder()
        .method("DELETE")
        .uri("/admin/cache/cats.tif")
        .body(Body::empty())
        .unwrap();
    let response = app.send(request).await;
    assert!(matches!(
        response.status(),
        StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED
    ));
}

#[tokio::test]
async fn test_health_reports_cache_occupancy() {
    let (app, _) = counting_app(RouterConfig::default());
    app.get("/iiif/3/cats.tif/full/128,/0/default.jpg").await;

    let health = body_json(app.get("/health").await).await;
    assert_eq!(health["cache"]["derivatives"]["entries"], 1);
    assert!(health["cache"]["derivatives"]["size_bytes"].as_u64().unwrap() > 0);
    assert_eq!(health["cache"]["info"]["entries"], 1);
}

#[tokio::test]
async fn test_disk_cache_is_shared_across_restarts() {
    let cache_dir = tempfile::tempdir().unwrap();
    let uri = "/iiif/3/cats.tif/full/128,/90/default.png";

    let first = TestApp::with_derivative_cache(
        source_dir(),
        Arc::new(FilesystemDerivativeCache::open(cache_dir.path()).await.unwrap()),
    );
    let response = first.get(uri).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-cache"), "MISS");
    let stored = body_bytes(response).await;
    drop(first);

    // A fresh server on the same directory serves the stored bytes
    let second = TestApp::with_derivative_cache(
        source_dir(),
        Arc::new(FilesystemDerivativeCache::open(cache_dir.path()).await.unwrap()),
    );
    let response = second.get(uri).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-cache"), "HIT");
    assert_eq!(body_bytes(response).await, stored);
}
