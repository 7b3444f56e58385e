//! # IIIF Streamer
//!
//! An IIIF Image API 2.x/3.x server for pyramidal TIFF and raster images
//! stored on disk or in S3-compatible object storage.
//!
//! Pyramidal sources are read by byte range: only the TIFF header, the
//! directory chain and the tiles covering a request are fetched. Every
//! derivative is keyed by the fingerprint of its canonical operation list,
//! so equivalent requests share one cache entry and one computation.
//!
//! ## Architecture
//!
//! - [`iiif`] - URI grammar, info.json and canonical URIs
//! - [`operation`] - Operation lists, canonicalization and fingerprints
//! - [`selector`] - Resolution tier selection
//! - [`cache`] - Derivative/info caches and single-flight deduplication
//! - [`service`] - Request orchestration
//! - [`io`], [`source`] - Byte-range access to local files and S3
//! - [`codec`] - Format detection, TIFF pyramids and raster decoding
//! - [`pipeline`] - Scaling, rotation, color, overlays and encoding
//! - [`policy`] - Authorization and overlay hooks
//! - [`server`] - Axum routes, handlers and signed URL auth
//! - [`config`] - CLI and configuration types

pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod format;
pub mod geometry;
pub mod iiif;
pub mod io;
pub mod operation;
pub mod pipeline;
pub mod policy;
pub mod selector;
pub mod server;
pub mod service;
pub mod source;

pub use config::{Cli, Command, ServeConfig, SignConfig};
pub use error::{CodecError, ImageError, IoError, ParseError};
pub use format::Format;
pub use geometry::{Dimension, Rectangle, ReductionFactor, ScaleConstraint};
pub use iiif::{ApiVersion, ImageRequest};
pub use operation::{canonicalize, CanonicalOperationList, Fingerprint, Limits, OperationList};
pub use selector::{select_tier, TierSelection};
pub use server::{create_router, AppState, RouterConfig};
pub use service::{DerivativeCoordinator, ImageService, ServiceConfig};
