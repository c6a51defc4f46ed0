//! API route definitions
//!
//! This module defines all API routes and builds the router.

use axum::{extract::DefaultBodyLimit, routing::get, Router};

use crate::handlers::{health_check, not_found, publish_module, read_module, AppState};

/// Build the API router with all routes
///
/// Module paths span several segments, so every protocol operation goes
/// through one wildcard route and is told apart by its suffix.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/{owner}/{*rest}",
            get(read_module).put(publish_module).post(publish_module),
        )
        .fallback(not_found)
        // Upload size is governed by quotas, not by a transport limit
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}
