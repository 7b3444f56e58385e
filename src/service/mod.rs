//! Request orchestration and derivative caching.

mod coordinator;
mod image_service;

pub use coordinator::{
    CacheStatus, CoordinatorStats, Derivative, DerivativeCoordinator, PurgeReport,
};
pub use image_service::{ImageService, Rendered, ServiceConfig};
