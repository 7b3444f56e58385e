//! HTTP request handlers for the IIIF Image API.
//!
//! # Endpoints
//!
//! - `GET /iiif/{version}/{identifier}/info.json` - Image information
//! - `GET /iiif/{version}/{identifier}` - Redirect to `info.json`
//! - `GET /iiif/{version}/{identifier}/{region}/{size}/{rotation}/{quality}.{format}` - Image
//! - `DELETE /admin/cache/{identifier}` - Purge cached data for one identifier
//! - `GET /health` - Health check endpoint

use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{CodecError, Component, ImageError, IoError, ParseError};
use crate::iiif::request::parse_identifier;
use crate::iiif::{
    canonical_path, identifier_segment, info_document, ApiVersion, ImageRequest, InfoOptions,
};
use crate::policy::RequestContext;
use crate::service::{CoordinatorStats, ImageService};

// =============================================================================
// Application State
// =============================================================================

/// Shared application state containing the image service.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ImageService>,

    /// Cache-Control max-age in seconds
    pub cache_max_age: u32,

    /// Public base URI for `id`s and links, e.g. `https://images.example.com`.
    /// Derived from the request's Host header when unset.
    pub base_uri: Option<String>,

    pub info_options: InfoOptions,
}

impl AppState {
    pub fn new(service: Arc<ImageService>, info_options: InfoOptions) -> Self {
        Self {
            service,
            cache_max_age: 3600,
            base_uri: None,
            info_options,
        }
    }

    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    pub fn with_base_uri(mut self, base_uri: Option<String>) -> Self {
        self.base_uri = base_uri.map(|uri| uri.trim_end_matches('/').to_string());
        self
    }

    /// Base URI for links in responses to a request with `headers`.
    fn base_uri(&self, headers: &HeaderMap) -> String {
        if let Some(base) = &self.base_uri {
            return base.clone();
        }
        let host = headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("localhost");
        let scheme = headers
            .get("x-forwarded-proto")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("http");
        format!("{}://{}", scheme, host)
    }

    fn cache_control(&self) -> String {
        format!("public, max-age={}", self.cache_max_age)
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Path parameters for image requests.
#[derive(Debug, Deserialize)]
pub struct ImagePathParams {
    pub version: String,
    pub identifier: String,
    pub region: String,
    pub size: String,
    pub rotation: String,

    /// `{quality}.{format}`, e.g. `default.jpg`
    pub filename: String,
}

/// Path parameters for info and redirect requests.
#[derive(Debug, Deserialize)]
pub struct InfoPathParams {
    pub version: String,
    pub identifier: String,
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "invalid_region")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub cache: CoordinatorStats,
}

/// Response from the purge endpoint.
#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub identifier: String,
    pub derivatives: usize,
    pub info: bool,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Errors a handler can return.
#[derive(Debug)]
pub enum HandlerError {
    Image(ImageError),

    /// The version path segment is neither `2` nor `3`
    UnknownVersion(String),
}

impl From<ImageError> for HandlerError {
    fn from(err: ImageError) -> Self {
        HandlerError::Image(err)
    }
}

impl From<ParseError> for HandlerError {
    fn from(err: ParseError) -> Self {
        HandlerError::Image(ImageError::Parse(err))
    }
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        match self {
            HandlerError::Image(err) => err.into_response(),
            HandlerError::UnknownVersion(version) => {
                let status = StatusCode::NOT_FOUND;
                let message = format!("Unknown IIIF Image API version: {}", version);
                debug!(status = status.as_u16(), "{}", message);
                (
                    status,
                    Json(ErrorResponse::with_status("unknown_version", message, status)),
                )
                    .into_response()
            }
        }
    }
}

/// Status code and error type identifier for `err`.
pub fn classify(err: &ImageError) -> (StatusCode, &'static str) {
    match err {
        ImageError::Parse(parse) => match parse.component {
            Component::Format => (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_format"),
            Component::Identifier => (StatusCode::BAD_REQUEST, "invalid_identifier"),
            Component::Region => (StatusCode::BAD_REQUEST, "invalid_region"),
            Component::Size => (StatusCode::BAD_REQUEST, "invalid_size"),
            Component::Rotation => (StatusCode::BAD_REQUEST, "invalid_rotation"),
            Component::Quality => (StatusCode::BAD_REQUEST, "invalid_quality"),
        },
        ImageError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        ImageError::SizeRestricted { .. } => (StatusCode::FORBIDDEN, "size_restricted"),
        ImageError::Forbidden { .. } => (StatusCode::FORBIDDEN, "forbidden"),
        ImageError::EmptyResult => (StatusCode::BAD_REQUEST, "empty_result"),
        ImageError::Source(codec) => match codec {
            CodecError::UnsupportedFormat(_) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_format")
            }
            CodecError::Io(IoError::NotFound(_)) => (StatusCode::NOT_FOUND, "not_found"),
            CodecError::Io(IoError::Connection(_)) => (StatusCode::BAD_GATEWAY, "connection_error"),
            CodecError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
            CodecError::Malformed(_) | CodecError::InvalidTier { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "corrupt_source")
            }
            CodecError::Decode(_) => (StatusCode::INTERNAL_SERVER_ERROR, "decode_error"),
            CodecError::Encode(_) => (StatusCode::INTERNAL_SERVER_ERROR, "encode_error"),
        },
        ImageError::ComputationFailure { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "computation_failure")
        }
    }
}

/// Convert ImageError to HTTP response.
///
/// 5xx errors are logged at ERROR, 404s at DEBUG and other 4xx at WARN.
impl IntoResponse for ImageError {
    fn into_response(self) -> Response {
        let (status, error_type) = classify(&self);
        let message = self.to_string();

        if status.is_server_error() {
            error!(
                error_type = error_type,
                status = status.as_u16(),
                "Server error: {}",
                message
            );
        } else if status == StatusCode::NOT_FOUND {
            debug!(
                error_type = error_type,
                status = status.as_u16(),
                "Resource not found: {}",
                message
            );
        } else {
            warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Client error: {}",
                message
            );
        }

        let error_response = ErrorResponse::with_status(error_type, message, status);
        (status, Json(error_response)).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle image requests.
///
/// # Endpoint
///
/// `GET /iiif/{version}/{identifier}/{region}/{size}/{rotation}/{quality}.{format}`
///
/// # Response
///
/// `200 OK` with the encoded image and the headers
///
/// - `Content-Type`: media type of the requested format
/// - `Cache-Control`: `public, max-age=N`
/// - `Link`: the canonical URI of the image
/// - `X-Cache`: `HIT` or `MISS`
pub async fn image_handler(
    State(state): State<AppState>,
    Path(params): Path<ImagePathParams>,
    headers: HeaderMap,
) -> Result<Response, HandlerError> {
    let version = parse_version(&params.version)?;
    let request = ImageRequest::new(
        version,
        &params.identifier,
        &params.region,
        &params.size,
        &params.rotation,
        &params.filename,
        &state.service.config().delimiter,
    )?;
    let context = request_context(&headers);

    let rendered = state.service.image(&request, &context).await?;

    let canonical = format!(
        "{}/iiif/{}/{}",
        state.base_uri(&headers),
        version,
        canonical_path(version, &rendered.canonical, &state.service.config().delimiter)
    );
    let derivative = rendered.derivative;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, derivative.media_type().to_string()),
            (header::CACHE_CONTROL, state.cache_control()),
            (header::LINK, format!("<{}>;rel=\"canonical\"", canonical)),
        ],
        [("x-cache", derivative.status.as_str())],
        derivative.bytes,
    )
        .into_response())
}

/// Handle info requests.
///
/// # Endpoint
///
/// `GET /iiif/{version}/{identifier}/info.json`
pub async fn info_handler(
    State(state): State<AppState>,
    Path(params): Path<InfoPathParams>,
    headers: HeaderMap,
) -> Result<Response, HandlerError> {
    let version = parse_version(&params.version)?;
    let delimiter = &state.service.config().delimiter;
    let (identifier, sc) = parse_identifier(&params.identifier, delimiter)?;
    let context = request_context(&headers);

    let info = state.service.authorized_info(&identifier, &context).await?;

    let id = format!(
        "{}/iiif/{}/{}",
        state.base_uri(&headers),
        version,
        identifier_segment(&identifier, &sc, delimiter)
    );
    let document = info_document(version, id, &info, &sc, &state.info_options);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, version.info_media_type().to_string()),
            (header::CACHE_CONTROL, state.cache_control()),
        ],
        Json(document),
    )
        .into_response())
}

/// Redirect the bare image service URI to its info document.
///
/// # Endpoint
///
/// `GET /iiif/{version}/{identifier}` → `303 See Other`
pub async fn redirect_handler(
    State(state): State<AppState>,
    Path(params): Path<InfoPathParams>,
    headers: HeaderMap,
) -> Result<Response, HandlerError> {
    let version = parse_version(&params.version)?;
    let location = format!(
        "{}/iiif/{}/{}/info.json",
        state.base_uri(&headers),
        version,
        urlencoding::encode(&params.identifier)
    );
    Ok((StatusCode::SEE_OTHER, [(header::LOCATION, location)]).into_response())
}

/// Drop the info, derivatives and open source of one identifier.
///
/// # Endpoint
///
/// `DELETE /admin/cache/{identifier}`
pub async fn purge_handler(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Json<PurgeResponse> {
    let report = state.service.purge(&identifier).await;
    Json(PurgeResponse {
        identifier,
        derivatives: report.derivatives,
        info: report.info,
    })
}

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cache: state.service.stats().await,
    })
}

fn parse_version(segment: &str) -> Result<ApiVersion, HandlerError> {
    ApiVersion::from_segment(segment).ok_or_else(|| HandlerError::UnknownVersion(segment.to_string()))
}

/// Client address and user agent, as far as the headers tell.
fn request_context(headers: &HeaderMap) -> RequestContext {
    let header = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());
    let client_ip = header("x-forwarded-for")
        .and_then(|value| value.split(',').next())
        .or_else(|| header("x-real-ip"))
        .and_then(|value| value.trim().parse::<IpAddr>().ok());

    RequestContext {
        client_ip,
        user_agent: header("user-agent").map(str::to_string),
    }
}
