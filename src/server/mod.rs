//! HTTP server layer.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │   GET /iiif/{2|3}/{id}/{region}/{size}/{rotation}/{q}.{fmt}     │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │  handlers   │  │    auth     │  │        routes           │  │
//! │  │ (requests)  │  │ (signed URL)│  │  (router config)        │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod handlers;
pub mod routes;

pub use auth::{auth_middleware, AuthError, SignedUrlAuth};
pub use handlers::{
    health_handler, image_handler, info_handler, purge_handler, redirect_handler, AppState,
    ErrorResponse, HandlerError, HealthResponse, PurgeResponse,
};
pub use routes::{create_router, RouterConfig};
