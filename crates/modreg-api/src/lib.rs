//! Module registry API layer
//!
//! This crate exposes the module proxy protocol over HTTP using Axum.
//!
//! # Architecture
//!
//! - **Handlers**: list, info, descriptor, content, publish and health
//! - **Path**: parsing of multi-segment module paths and their suffixes
//! - **Identity**: resolution of the publishing creator from request headers
//! - **Middleware**: tracing, CORS and request IDs
//! - **Error Handling**: conversion of service errors to plain-text responses
//!
//! # Example
//!
//! ```rust,no_run
//! use modreg_api::{build_api_server, AppState, MiddlewareConfig};
//! use modreg_core::QuotaLimits;
//! use modreg_db::MemoryPackageStore;
//! use modreg_service::{ServiceRegistry, StaticQuotaPolicy, SystemClock};
//! use std::sync::Arc;
//!
//! # async fn example() -> std::io::Result<()> {
//! let store = Arc::new(MemoryPackageStore::default());
//! let services = ServiceRegistry::new(
//!     store.clone(),
//!     Arc::new(SystemClock),
//!     Arc::new(StaticQuotaPolicy(QuotaLimits::unlimited())),
//! );
//! let app = build_api_server(AppState::new(services, store), MiddlewareConfig::default());
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//! axum::serve(listener, app).await
//! # }
//! ```

pub mod error;
pub mod handlers;
pub mod identity;
pub mod middleware;
pub mod path;
pub mod responses;
pub mod routes;

// Re-export main types for convenience
pub use error::{ApiError, ApiResult};
pub use handlers::AppState;
pub use identity::{HeaderIdentity, IdentityResolver, DEFAULT_IDENTITY_HEADER};
pub use middleware::{CorsConfig, MiddlewareConfig, UuidRequestIdGenerator};
pub use path::{decode_case, parse_publish_path, parse_read_path, ModulePath, ProxyRequest};
pub use responses::{ComponentHealth, HealthResponse, HealthStatus, VersionInfo};
pub use routes::build_router;

use axum::Router;

/// Build a complete API server with middleware
pub fn build_api_server(state: AppState, middleware_config: MiddlewareConfig) -> Router {
    middleware_config.apply(build_router(state))
}
