//! Cache-or-compute for derivatives and source info.
//!
//! Per fingerprint the lifecycle is
//!
//! ```text
//! UNREQUESTED -> IN_FLIGHT -> CACHED
//!                          \-> FAILED (not remembered)
//! ```
//!
//! Concurrent requests for one fingerprint wait on the single in-flight
//! computation. The computation lives in its own task, so it runs to
//! completion (and populates the cache) even if every requester goes away.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::{CacheStats, DerivativeCache, InfoCache, Role, SingleFlight};
use crate::codec::Info;
use crate::error::ImageError;
use crate::format::Format;
use crate::operation::{CanonicalOperationList, Fingerprint};

/// Whether a derivative came from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// An encoded derivative image.
#[derive(Debug, Clone)]
pub struct Derivative {
    pub bytes: Bytes,
    pub format: Format,
    pub fingerprint: Fingerprint,
    pub status: CacheStatus,
}

impl Derivative {
    pub fn media_type(&self) -> &'static str {
        self.format.media_type()
    }
}

/// What a purge removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub derivatives: usize,
    pub info: bool,
}

/// Occupancy of both caches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    pub derivatives: CacheStats,
    pub info: CacheStats,
    pub in_flight: usize,
}

pub struct DerivativeCoordinator {
    derivatives: Arc<dyn DerivativeCache>,
    infos: Arc<dyn InfoCache>,
    derivative_flights: Arc<SingleFlight<Fingerprint, Bytes>>,
    info_flights: Arc<SingleFlight<String, Arc<Info>>>,
    compute_timeout: Option<Duration>,
}

impl DerivativeCoordinator {
    pub fn new(derivatives: Arc<dyn DerivativeCache>, infos: Arc<dyn InfoCache>) -> Self {
        Self {
            derivatives,
            infos,
            derivative_flights: Arc::new(SingleFlight::new()),
            info_flights: Arc::new(SingleFlight::new()),
            compute_timeout: None,
        }
    }

    /// Fail computations that run longer than `timeout`.
    pub fn with_compute_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.compute_timeout = timeout;
        self
    }

    /// Return the cached derivative for `canonical` or compute, cache and
    /// return it. At most one `compute` runs per fingerprint at a time.
    pub async fn get_or_compute<F, Fut>(
        &self,
        canonical: &CanonicalOperationList,
        compute: F,
    ) -> Result<Derivative, ImageError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Bytes, ImageError>> + Send + 'static,
    {
        let fingerprint = canonical.fingerprint().clone();
        let format = canonical
            .list()
            .encode()
            .map(|encode| encode.format)
            .unwrap_or(Format::Jpg);

        if let Some(bytes) = self.derivatives.get(&fingerprint).await {
            debug!(fingerprint = %fingerprint, "Derivative cache hit");
            return Ok(Derivative {
                bytes,
                format,
                fingerprint,
                status: CacheStatus::Hit,
            });
        }

        let cache = self.derivatives.clone();
        let identifier = canonical.identifier().to_string();
        let key = fingerprint.clone();
        let timeout = self.compute_timeout;
        let (result, role) = self
            .derivative_flights
            .run(fingerprint.clone(), move || async move {
                // A computation that finished between our lookup and the
                // flight registration already stored its result.
                if let Some(bytes) = cache.get(&key).await {
                    return Ok(bytes);
                }
                let bytes = with_timeout(timeout, compute()).await?;
                cache.put(&key, &identifier, bytes.clone()).await;
                Ok(bytes)
            })
            .await;

        match &result {
            Ok(_) if role == Role::Leader => {
                debug!(fingerprint = %fingerprint, "Derivative computed")
            }
            Ok(_) => debug!(fingerprint = %fingerprint, "Derivative shared with in-flight request"),
            Err(e) => warn!(fingerprint = %fingerprint, error = %e, "Derivative computation failed"),
        }

        result.map(|bytes| Derivative {
            bytes,
            format,
            fingerprint,
            status: CacheStatus::Miss,
        })
    }

    /// Return the cached info for `identifier` or read, cache and return it.
    pub async fn get_or_read_info<F, Fut>(
        &self,
        identifier: &str,
        read: F,
    ) -> Result<Arc<Info>, ImageError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Info, ImageError>> + Send + 'static,
    {
        if let Some(info) = self.infos.get(identifier).await {
            return Ok(info);
        }

        let cache = self.infos.clone();
        let key = identifier.to_string();
        let timeout = self.compute_timeout;
        let (result, _) = self
            .info_flights
            .run(identifier.to_string(), move || async move {
                if let Some(info) = cache.get(&key).await {
                    return Ok(info);
                }
                let info = Arc::new(with_timeout(timeout, read()).await?);
                cache.put(&key, info.clone()).await;
                Ok(info)
            })
            .await;
        result
    }

    /// Drop cached info and every cached derivative of `identifier`.
    pub async fn purge(&self, identifier: &str) -> PurgeReport {
        let report = PurgeReport {
            derivatives: self.derivatives.purge(identifier).await,
            info: self.infos.purge(identifier).await,
        };
        debug!(
            identifier,
            derivatives = report.derivatives,
            info = report.info,
            "Purged caches"
        );
        report
    }

    pub async fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            derivatives: self.derivatives.stats().await,
            info: self.infos.stats().await,
            in_flight: self.derivative_flights.in_flight().await,
        }
    }
}

async fn with_timeout<T, Fut>(timeout: Option<Duration>, work: Fut) -> Result<T, ImageError>
where
    Fut: Future<Output = Result<T, ImageError>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, work).await.map_err(|_| {
            ImageError::ComputationFailure {
                message: format!("computation exceeded {:?}", limit),
            }
        })?,
        None => work.await,
    }
}
