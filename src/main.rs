//! IIIF Streamer - an IIIF Image API server.
//!
//! This binary parses the configuration, wires the components together and
//! starts the HTTP server.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use iiif_streamer::{
    cache::{DerivativeCache, FilesystemDerivativeCache, MemoryDerivativeCache, MemoryInfoCache},
    codec::SourceCodec,
    config::{Cli, Command, ServeConfig, SignConfig, SignOutputFormat, SourceBackend},
    iiif::InfoOptions,
    io::create_s3_client,
    operation::{Limits, Position, Watermark},
    policy::{parse_redaction, StaticPolicy},
    server::{create_router, AppState, RouterConfig, SignedUrlAuth},
    service::{DerivativeCoordinator, ImageService, ServiceConfig},
    source::{FilesystemSource, ImageSource, S3Source},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(config) => run_serve(*config).await,
        Command::Sign(config) => run_sign(config),
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("IIIF Streamer v{}", env!("CARGO_PKG_VERSION"));
    let source = match build_source(&config).await {
        Ok(source) => source,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let policy = match build_policy(&config) {
        Ok(policy) => policy,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!(
        "  Caches: {}MB derivatives, {} info entries, {} open sources",
        config.cache_bytes / (1024 * 1024),
        config.cache_info,
        config.cache_sources
    );
    info!(
        "  Limits: max_pixels={} max_scale={}",
        config.max_pixels, config.max_scale
    );

    let limits = Limits {
        max_pixels: config.max_pixels,
        max_scale: config.max_scale,
    };
    let codec = SourceCodec::with_capacity(
        source,
        config.cache_sources,
        config.block_size,
        config.cache_blocks,
    );
    let derivatives = match build_derivative_cache(&config).await {
        Ok(derivatives) => derivatives,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let coordinator = DerivativeCoordinator::new(
        derivatives,
        Arc::new(MemoryInfoCache::with_capacity(config.cache_info)),
    )
    .with_compute_timeout(config.compute_timeout.map(Duration::from_secs));
    let service = ImageService::new(
        Arc::new(codec),
        Arc::new(coordinator),
        Arc::new(policy),
        ServiceConfig {
            limits,
            jpeg_quality: config.jpeg_quality,
            delimiter: config.delimiter.clone(),
        },
    );

    let state = AppState::new(Arc::new(service), InfoOptions { limits })
        .with_cache_max_age(config.cache_max_age)
        .with_base_uri(config.base_uri.clone());
    let router_config = match build_router_config(&config) {
        Ok(router_config) => router_config,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let router = create_router(state, router_config);

    let addr = config.bind_address();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };
    info!("Server listening on http://{}", addr);
    info!("  curl http://{}/iiif/3/<identifier>/info.json", addr);

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "iiif_streamer=debug,tower_http=debug"
    } else {
        "iiif_streamer=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn build_source(config: &ServeConfig) -> Result<Arc<dyn ImageSource>, String> {
    match config.source {
        SourceBackend::Filesystem => {
            let root = config
                .root
                .clone()
                .ok_or_else(|| "missing --root".to_string())?;
            if !root.is_dir() {
                return Err(format!("{} is not a directory", root.display()));
            }
            info!("  Source: filesystem at {}", root.display());
            Ok(Arc::new(FilesystemSource::new(root)))
        }
        SourceBackend::S3 => {
            let bucket = config
                .s3_bucket
                .clone()
                .ok_or_else(|| "missing --s3-bucket".to_string())?;
            info!("  Source: s3://{}", bucket);
            if let Some(endpoint) = &config.s3_endpoint {
                info!("  S3 endpoint: {}", endpoint);
            }
            let client = create_s3_client(config.s3_endpoint.as_deref(), &config.s3_region).await;
            Ok(Arc::new(S3Source::new(
                client,
                bucket,
                config.s3_prefix.as_deref(),
            )))
        }
    }
}

async fn build_derivative_cache(config: &ServeConfig) -> Result<Arc<dyn DerivativeCache>, String> {
    let Some(dir) = &config.cache_dir else {
        return Ok(Arc::new(MemoryDerivativeCache::with_capacity(
            config.cache_bytes,
        )));
    };
    let cache = FilesystemDerivativeCache::open(dir)
        .await
        .map_err(|e| format!("cannot open cache directory {}: {}", dir.display(), e))?
        .with_ttl(config.cache_ttl.map(Duration::from_secs));
    let stats = cache.stats().await;
    info!(
        "  Derivative cache: {} ({} entries, {}MB)",
        cache.root().display(),
        stats.entries,
        stats.size_bytes / (1024 * 1024)
    );
    Ok(Arc::new(cache))
}

fn build_policy(config: &ServeConfig) -> Result<StaticPolicy, String> {
    let mut policy = StaticPolicy::new();
    for redaction in &config.redactions {
        let (identifier, rect) = parse_redaction(redaction)?;
        info!("  Redacting {} of {}", rect, identifier);
        policy = policy.redact(identifier, rect);
    }
    if let Some(path) = &config.watermark {
        let position = Position::parse(&config.watermark_position)
            .ok_or_else(|| format!("unknown position '{}'", config.watermark_position))?;
        policy = policy.with_watermark(load_watermark(path, position, config.watermark_inset)?);
    }
    Ok(policy)
}

fn load_watermark(path: &Path, position: Position, inset: u32) -> Result<Watermark, String> {
    let image = image::open(path)
        .map_err(|e| format!("cannot read watermark {}: {}", path.display(), e))?
        .to_rgba8();
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "watermark".to_string());
    info!(
        "  Watermark: {} ({}x{}) at {}",
        name,
        image.width(),
        image.height(),
        position
    );
    Ok(Watermark {
        name,
        image: Arc::new(image),
        position,
        inset,
    })
}

fn build_router_config(config: &ServeConfig) -> Result<RouterConfig, String> {
    let mut router_config = RouterConfig::default()
        .with_admin(config.admin_enabled)
        .with_tracing(!config.no_tracing);

    if config.auth_enabled {
        let secret = config.auth_secret.as_deref().unwrap_or_default();
        let auth = SignedUrlAuth::new(secret).map_err(|e| format!("invalid auth secret: {}", e))?;
        router_config = router_config.with_auth(auth);
        info!("  Auth: enabled");
    } else {
        warn!("  Auth: DISABLED - all images are publicly accessible");
    }
    if config.admin_enabled && !config.auth_enabled {
        warn!("  Admin purge endpoint is enabled without authentication");
    }
    if let Some(origins) = &config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }
    Ok(router_config)
}

// =============================================================================
// Sign Command
// =============================================================================

fn run_sign(config: SignConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }
    let params = match config.parse_params() {
        Ok(params) => params,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let auth = match SignedUrlAuth::new(&config.secret) {
        Ok(auth) => auth,
        Err(e) => {
            eprintln!("Error: invalid secret: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let ttl = Duration::from_secs(config.ttl);
    let params_ref: Vec<(&str, &str)> = params
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    let base_url = config
        .base_url
        .as_deref()
        .map(|url| url.trim_end_matches('/'))
        .unwrap_or("");

    match config.format {
        SignOutputFormat::Signature => {
            let (signature, _) = auth.sign_with_params(&config.path, ttl, &params_ref);
            println!("{}", signature);
        }
        SignOutputFormat::Url => {
            println!(
                "{}",
                auth.generate_signed_url(base_url, &config.path, ttl, &params_ref)
            );
        }
        SignOutputFormat::Json => {
            let (signature, expiry) = auth.sign_with_params(&config.path, ttl, &params_ref);
            let json = serde_json::json!({
                "signature": signature,
                "expiry": expiry,
                "path": config.path,
                "ttl": config.ttl,
                "url": auth.generate_signed_url(base_url, &config.path, ttl, &params_ref),
            });
            match serde_json::to_string_pretty(&json) {
                Ok(text) => println!("{}", text),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
    }
    ExitCode::SUCCESS
}
