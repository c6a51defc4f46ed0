//! API request handlers
//!
//! This module implements the module proxy read endpoints, the publish
//! endpoint and the health check.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use modreg_core::{FileRecord, VersionRecord, VersionToken};
use modreg_db::PackageStore;
use modreg_service::{HashedBuffer, ServiceError, ServiceRegistry, DEFAULT_MEMORY_THRESHOLD};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, instrument};

use crate::{
    error::{ApiError, ApiResult},
    identity::{HeaderIdentity, IdentityResolver},
    path::{parse_publish_path, parse_read_path, ModulePath, ProxyRequest},
    responses::{
        version_list, ComponentHealth, HealthResponse, PlainText, VersionInfo, APPLICATION_ZIP,
    },
};

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Service registry
    pub services: Arc<ServiceRegistry>,
    /// Store checked by the health endpoint
    pub store: Arc<dyn PackageStore>,
    /// Resolves the creator of a publish request
    pub identity: Arc<dyn IdentityResolver>,
    /// Uploads above this size are buffered on disk
    pub memory_threshold: usize,
}

impl AppState {
    /// Create new application state
    pub fn new(services: ServiceRegistry, store: Arc<dyn PackageStore>) -> Self {
        Self {
            services: Arc::new(services),
            store,
            identity: Arc::new(HeaderIdentity::default()),
            memory_threshold: DEFAULT_MEMORY_THRESHOLD,
        }
    }

    /// Use a custom identity resolver
    pub fn with_identity(mut self, identity: Arc<dyn IdentityResolver>) -> Self {
        self.identity = identity;
        self
    }

    /// Set the in-memory upload buffer threshold
    pub fn with_memory_threshold(mut self, bytes: usize) -> Self {
        self.memory_threshold = bytes;
        self
    }
}

// ============================================================================
// Module Proxy Handlers
// ============================================================================

/// Serve any read operation of the module proxy protocol
#[instrument(skip(state, headers))]
pub async fn read_module(
    State(state): State<AppState>,
    Path((owner, rest)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let (path, request) = parse_read_path(&owner, &rest)?;
    debug!(owner = %path.owner, module = %path.module, ?request, "Module proxy request");

    match request {
        ProxyRequest::List => list_versions(&state, &path).await,
        ProxyRequest::Info(token) => version_info(&state, &path, &token).await,
        ProxyRequest::Descriptor(token) => descriptor(&state, &path, &token).await,
        ProxyRequest::Content(token) => content(&state, &path, &token, &headers).await,
    }
}

async fn resolve(
    state: &AppState,
    path: &ModulePath,
    token: &VersionToken,
) -> ApiResult<VersionRecord> {
    Ok(state
        .services
        .resolution()
        .resolve(&path.owner, &path.module, token)
        .await?)
}

async fn list_versions(state: &AppState, path: &ModulePath) -> ApiResult<Response> {
    let versions = state
        .services
        .resolution()
        .list_versions(&path.owner, &path.module)
        .await?;

    Ok(version_list(&versions).into_response())
}

async fn version_info(
    state: &AppState,
    path: &ModulePath,
    token: &VersionToken,
) -> ApiResult<Response> {
    let version = resolve(state, path, token).await?;
    Ok(VersionInfo::from_record(&version).into_response())
}

async fn descriptor(
    state: &AppState,
    path: &ModulePath,
    token: &VersionToken,
) -> ApiResult<Response> {
    let version = resolve(state, path, token).await?;
    let descriptor = state.services.resolution().descriptor(&version).await?;
    Ok(PlainText(descriptor).into_response())
}

async fn content(
    state: &AppState,
    path: &ModulePath,
    token: &VersionToken,
    headers: &HeaderMap,
) -> ApiResult<Response> {
    let resolution = state.services.resolution();
    let version = resolve(state, path, token).await?;
    let file = resolution.lead_file(&version).await?;

    let etag = entity_tag(&file);
    let last_modified = http_date(file.created_at);

    if is_not_modified(headers, &etag, file.created_at) {
        debug!(file = %file.name, "Content not modified");
        return Ok((
            StatusCode::NOT_MODIFIED,
            [(header::ETAG, etag), (header::LAST_MODIFIED, last_modified)],
        )
            .into_response());
    }

    let stream = resolution.open_content(&file).await?;
    let body = Body::from_stream(ReaderStream::new(stream));

    let disposition = format!("attachment; filename=\"{}\"", file.name);

    Ok((
        [
            (header::CONTENT_TYPE, APPLICATION_ZIP.to_string()),
            (header::CONTENT_LENGTH, file.size.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
            (header::ETAG, etag),
            (header::LAST_MODIFIED, last_modified),
        ],
        body,
    )
        .into_response())
}

fn entity_tag(file: &FileRecord) -> String {
    format!("\"{}\"", file.sha256.value())
}

fn http_date(ts: DateTime<Utc>) -> String {
    ts.format(HTTP_DATE_FORMAT).to_string()
}

/// Evaluate `If-None-Match` and, when absent, `If-Modified-Since`
fn is_not_modified(headers: &HeaderMap, etag: &str, modified: DateTime<Utc>) -> bool {
    if let Some(value) = headers.get(header::IF_NONE_MATCH) {
        return value
            .to_str()
            .map(|tags| {
                tags.split(',')
                    .map(|t| t.trim().trim_start_matches("W/"))
                    .any(|t| t == "*" || t == etag)
            })
            .unwrap_or(false);
    }

    headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
        .map(|since| modified.timestamp() <= since.timestamp())
        .unwrap_or(false)
}

/// Publish a module version from an uploaded archive
#[instrument(skip(state, headers, body))]
pub async fn publish_module(
    State(state): State<AppState>,
    Path((owner, rest)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<StatusCode> {
    let path = parse_publish_path(&owner, &rest)?;
    let creator = state.identity.identify(&headers);

    let buffer = HashedBuffer::from_stream(body.into_data_stream(), state.memory_threshold)
        .await
        .map_err(ServiceError::from)?;

    let record = state
        .services
        .publish()
        .publish_archive(path.owner, creator, &path.module, buffer)
        .await?;

    info!(module = %record.module, version = %record.version, "Published");
    Ok(StatusCode::CREATED)
}

// ============================================================================
// Health Handlers
// ============================================================================

/// Health check endpoint
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> HealthResponse {
    debug!("Health check requested");

    let store_health = match state.store.health_check().await {
        Ok(()) => ComponentHealth::healthy(),
        Err(e) => ComponentHealth::unhealthy(format!("Store error: {}", e)),
    };

    HealthResponse::healthy()
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_check("store", store_health)
        .compute_status()
}

/// Fallback for paths outside the protocol
pub async fn not_found() -> ApiError {
    ApiError::not_found("not found")
}
