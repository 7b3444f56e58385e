//! Router configuration.
//!
//! # Route Structure
//!
//! ```text
//! /health                                                      - Health check (public)
//! /iiif/{version}/{identifier}                                 - Redirect to info.json
//! /iiif/{version}/{identifier}/info.json                       - Image information
//! /iiif/{version}/{identifier}/{region}/{size}/{rotation}/{q}  - Image
//! /admin/cache/{identifier}                                    - Purge (DELETE, optional)
//! ```
//!
//! With signed URL auth enabled, everything but `/health` requires a valid
//! signature.

use std::time::Duration;

use axum::{
    middleware,
    routing::{delete, get},
    Router,
};
use http::header::{AUTHORIZATION, CONTENT_TYPE, LINK};
use http::{HeaderName, Method};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::auth::{auth_middleware, SignedUrlAuth};
use super::handlers::{
    health_handler, image_handler, info_handler, purge_handler, redirect_handler, AppState,
};

// =============================================================================
// Router Configuration
// =============================================================================

#[derive(Clone, Debug)]
pub struct RouterConfig {
    /// Signed URL verification; `None` leaves the API public
    pub auth: Option<SignedUrlAuth>,

    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Whether `DELETE /admin/cache/{identifier}` is routed
    pub admin_enabled: bool,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl Default for RouterConfig {
    /// Public API, any CORS origin, no admin route, tracing on.
    fn default() -> Self {
        Self {
            auth: None,
            cors_origins: None,
            admin_enabled: false,
            enable_tracing: true,
        }
    }
}

impl RouterConfig {
    pub fn with_auth(mut self, auth: SignedUrlAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    pub fn with_admin(mut self, enabled: bool) -> Self {
        self.admin_enabled = enabled;
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Build the application router around `state`.
pub fn create_router(state: AppState, config: RouterConfig) -> Router {
    let mut api = Router::new()
        .route("/iiif/{version}/{identifier}", get(redirect_handler))
        .route("/iiif/{version}/{identifier}/info.json", get(info_handler))
        .route(
            "/iiif/{version}/{identifier}/{region}/{size}/{rotation}/{filename}",
            get(image_handler),
        );
    if config.admin_enabled {
        api = api.route("/admin/cache/{identifier}", delete(purge_handler));
    }
    let mut api = api.with_state(state.clone());
    if let Some(auth) = config.auth.clone() {
        api = api.layer(middleware::from_fn_with_state(auth, auth_middleware));
    }

    let public = Router::new()
        .route("/health", get(health_handler))
        .with_state(state);

    let router = Router::new()
        .merge(api)
        .merge(public)
        .layer(build_cors_layer(&config));

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .expose_headers([LINK, HeaderName::from_static("x-cache")])
        .max_age(Duration::from_secs(86400));

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed)
        }
    }
}
