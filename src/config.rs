//! Command line and environment configuration.
//!
//! Every `serve` option can also be set through an environment variable with
//! the `IIIF_` prefix, e.g.
//!
//! - `IIIF_HOST`, `IIIF_PORT` - Bind address (default: 0.0.0.0:8182)
//! - `IIIF_SOURCE` - `filesystem` (default) or `s3`
//! - `IIIF_ROOT` - Source directory for the filesystem backend
//! - `IIIF_S3_BUCKET`, `IIIF_S3_PREFIX`, `IIIF_S3_ENDPOINT`, `IIIF_S3_REGION`
//! - `IIIF_CACHE_BYTES` - Derivative cache capacity (default: 256MB)
//! - `IIIF_CACHE_DIR`, `IIIF_CACHE_TTL` - On-disk derivative cache
//! - `IIIF_MAX_PIXELS`, `IIIF_MAX_SCALE` - Size limits
//! - `IIIF_AUTH_ENABLED`, `IIIF_AUTH_SECRET` - Signed URL authentication

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::cache::memory::{DEFAULT_DERIVATIVE_CACHE_CAPACITY, DEFAULT_INFO_CACHE_ENTRIES};
use crate::codec::DEFAULT_OPEN_SOURCES;
use crate::io::{DEFAULT_BLOCK_CAPACITY, DEFAULT_BLOCK_SIZE};
use crate::operation::{Position, DEFAULT_JPEG_QUALITY};
use crate::policy::parse_redaction;

// =============================================================================
// Default Values
// =============================================================================

pub const DEFAULT_HOST: &str = "0.0.0.0";

pub const DEFAULT_PORT: u16 = 8182;

pub const DEFAULT_REGION: &str = "us-east-1";

/// Default HTTP cache max-age in seconds (1 day).
pub const DEFAULT_CACHE_MAX_AGE: u32 = 86400;

/// Default scale constraint delimiter, as in `cats.tif-1:2`.
pub const DEFAULT_DELIMITER: &str = "-";

/// Default maximum scale; no upscaling.
pub const DEFAULT_MAX_SCALE: f64 = 1.0;

/// Default lifetime of signatures from `sign`, in seconds.
pub const DEFAULT_SIGN_TTL: u64 = 3600;

// =============================================================================
// CLI Arguments
// =============================================================================

/// IIIF Streamer - an IIIF Image API server.
#[derive(Parser, Debug, Clone)]
#[command(name = "iiif-streamer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP server.
    Serve(Box<ServeConfig>),

    /// Print a signed URL for a path.
    Sign(SignConfig),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceBackend {
    Filesystem,
    S3,
}

#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    // =========================================================================
    // Server
    // =========================================================================
    #[arg(long, default_value = DEFAULT_HOST, env = "IIIF_HOST")]
    pub host: String,

    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "IIIF_PORT")]
    pub port: u16,

    /// Public base URI used in info.json ids and Link headers.
    ///
    /// Derived from the Host header when not set.
    #[arg(long, env = "IIIF_BASE_URI")]
    pub base_uri: Option<String>,

    // =========================================================================
    // Source
    // =========================================================================
    #[arg(long, value_enum, default_value_t = SourceBackend::Filesystem, env = "IIIF_SOURCE")]
    pub source: SourceBackend,

    /// Directory holding source images (filesystem backend).
    #[arg(long, env = "IIIF_ROOT")]
    pub root: Option<PathBuf>,

    #[arg(long, env = "IIIF_S3_BUCKET")]
    pub s3_bucket: Option<String>,

    /// Key prefix prepended to identifiers.
    #[arg(long, env = "IIIF_S3_PREFIX")]
    pub s3_prefix: Option<String>,

    /// Custom endpoint for S3-compatible services (MinIO, etc.).
    #[arg(long, env = "IIIF_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    #[arg(long, default_value = DEFAULT_REGION, env = "IIIF_S3_REGION")]
    pub s3_region: String,

    // =========================================================================
    // Caches
    // =========================================================================
    /// Derivative cache capacity in bytes.
    #[arg(long, default_value_t = DEFAULT_DERIVATIVE_CACHE_CAPACITY, env = "IIIF_CACHE_BYTES")]
    pub cache_bytes: usize,

    /// Store derivatives in this directory instead of memory.
    #[arg(long, env = "IIIF_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Seconds after which on-disk derivatives are recomputed.
    #[arg(long, env = "IIIF_CACHE_TTL", requires = "cache_dir")]
    pub cache_ttl: Option<u64>,

    /// Number of cached info documents.
    #[arg(long, default_value_t = DEFAULT_INFO_CACHE_ENTRIES, env = "IIIF_CACHE_INFO")]
    pub cache_info: usize,

    /// Number of sources kept open.
    #[arg(long, default_value_t = DEFAULT_OPEN_SOURCES, env = "IIIF_CACHE_SOURCES")]
    pub cache_sources: usize,

    /// Blocks cached per remote source.
    #[arg(long, default_value_t = DEFAULT_BLOCK_CAPACITY, env = "IIIF_CACHE_BLOCKS")]
    pub cache_blocks: usize,

    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE, env = "IIIF_BLOCK_SIZE")]
    pub block_size: usize,

    // =========================================================================
    // Processing
    // =========================================================================
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "IIIF_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    /// Maximum output area in pixels; 0 disables the limit.
    #[arg(long, default_value_t = 0, env = "IIIF_MAX_PIXELS")]
    pub max_pixels: u64,

    /// Maximum output scale; 0 disables the limit.
    #[arg(long, default_value_t = DEFAULT_MAX_SCALE, env = "IIIF_MAX_SCALE")]
    pub max_scale: f64,

    /// Separator between an identifier and its scale constraint.
    #[arg(long, default_value = DEFAULT_DELIMITER, env = "IIIF_DELIMITER")]
    pub delimiter: String,

    /// Fail derivative computations running longer than this many seconds.
    #[arg(long, env = "IIIF_COMPUTE_TIMEOUT")]
    pub compute_timeout: Option<u64>,

    // =========================================================================
    // Overlays
    // =========================================================================
    /// Black out a region of one image, as `identifier=x,y,w,h`. Repeatable.
    #[arg(long = "redact", env = "IIIF_REDACTIONS", value_delimiter = ';')]
    pub redactions: Vec<String>,

    /// PNG image composited over every derivative.
    #[arg(long, env = "IIIF_WATERMARK")]
    pub watermark: Option<PathBuf>,

    #[arg(long, default_value = "bottom-right", env = "IIIF_WATERMARK_POSITION")]
    pub watermark_position: String,

    /// Distance in pixels from the anchored edges.
    #[arg(long, default_value_t = 10, env = "IIIF_WATERMARK_INSET")]
    pub watermark_inset: u32,

    // =========================================================================
    // HTTP
    // =========================================================================
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "IIIF_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    /// Allowed CORS origins (comma-separated); any origin when unset.
    #[arg(long, env = "IIIF_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    /// Require HMAC-signed URLs.
    #[arg(long, env = "IIIF_AUTH_ENABLED")]
    pub auth_enabled: bool,

    #[arg(long, env = "IIIF_AUTH_SECRET", hide_env_values = true)]
    pub auth_secret: Option<String>,

    /// Route `DELETE /admin/cache/{identifier}`.
    #[arg(long, env = "IIIF_ADMIN_ENABLED")]
    pub admin_enabled: bool,

    // =========================================================================
    // Logging
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Check option combinations clap cannot express.
    pub fn validate(&self) -> Result<(), String> {
        match self.source {
            SourceBackend::Filesystem if self.root.is_none() => {
                return Err(
                    "The filesystem source needs a root directory. Set --root or IIIF_ROOT"
                        .to_string(),
                );
            }
            SourceBackend::S3 if self.s3_bucket.as_deref().unwrap_or("").is_empty() => {
                return Err(
                    "The s3 source needs a bucket. Set --s3-bucket or IIIF_S3_BUCKET".to_string(),
                );
            }
            _ => {}
        }

        if self.auth_enabled && self.auth_secret.as_deref().unwrap_or("").is_empty() {
            return Err(
                "Authentication is enabled but no secret provided. \
                 Set --auth-secret or IIIF_AUTH_SECRET"
                    .to_string(),
            );
        }

        if self.cache_info == 0 || self.cache_sources == 0 || self.cache_blocks == 0 {
            return Err("cache entry counts must be greater than 0".to_string());
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }
        if self.block_size < 1024 || self.block_size > 16 * 1024 * 1024 {
            return Err("block_size must be between 1KB and 16MB".to_string());
        }
        if !self.max_scale.is_finite() || self.max_scale < 0.0 {
            return Err("max_scale must be a non-negative number".to_string());
        }
        if self.delimiter.is_empty() || self.delimiter.contains('/') {
            return Err("delimiter must be non-empty and must not contain '/'".to_string());
        }
        if Position::parse(&self.watermark_position).is_none() {
            return Err(format!(
                "unknown watermark position '{}'",
                self.watermark_position
            ));
        }
        for redaction in &self.redactions {
            parse_redaction(redaction)?;
        }
        Ok(())
    }

    /// The server bind address as `host:port`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// =============================================================================
// Sign Command
// =============================================================================

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignOutputFormat {
    /// Path or URL with `exp` and `sig`
    #[default]
    Url,

    /// Only the hex signature
    Signature,

    Json,
}

#[derive(Args, Debug, Clone)]
pub struct SignConfig {
    /// Path to sign, e.g. `/iiif/3/cats.tif/full/max/0/default.jpg`.
    #[arg(long)]
    pub path: String,

    #[arg(long, env = "IIIF_AUTH_SECRET", hide_env_values = true)]
    pub secret: String,

    /// Signature lifetime in seconds.
    #[arg(long, default_value_t = DEFAULT_SIGN_TTL)]
    pub ttl: u64,

    /// Prefix for the printed URL, e.g. `https://images.example.com`.
    #[arg(long)]
    pub base_url: Option<String>,

    /// Extra signed query parameters as `key=value`. Repeatable.
    #[arg(long = "param")]
    pub params: Vec<String>,

    #[arg(long, value_enum, default_value_t = SignOutputFormat::Url)]
    pub format: SignOutputFormat,
}

impl SignConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.secret.is_empty() {
            return Err("secret must not be empty".to_string());
        }
        if !self.path.starts_with('/') {
            return Err("path must start with '/'".to_string());
        }
        if self.ttl == 0 {
            return Err("ttl must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Split `--param key=value` pairs; `exp` and `sig` are reserved.
    pub fn parse_params(&self) -> Result<Vec<(String, String)>, String> {
        self.params
            .iter()
            .map(|param| {
                let (key, value) = param
                    .split_once('=')
                    .ok_or_else(|| format!("expected key=value, got '{}'", param))?;
                if key.is_empty() || key == "exp" || key == "sig" {
                    return Err(format!("invalid parameter name '{}'", key));
                }
                Ok((key.to_string(), value.to_string()))
            })
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
