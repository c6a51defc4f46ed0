//! API response types
//!
//! Response bodies of the module proxy protocol and the health endpoint.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, SecondsFormat, Utc};
use modreg_core::VersionRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Content type of list and descriptor responses
pub const TEXT_PLAIN_UTF8: &str = "text/plain; charset=utf-8";

/// Content type of archive downloads
pub const APPLICATION_ZIP: &str = "application/zip";

/// Plain text response with an explicit UTF-8 charset
#[derive(Debug, Clone)]
pub struct PlainText(pub String);

impl IntoResponse for PlainText {
    fn into_response(self) -> Response {
        (
            [(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN_UTF8))],
            self.0,
        )
            .into_response()
    }
}

/// Newline-terminated version list, oldest first
pub fn version_list(versions: &[VersionRecord]) -> PlainText {
    let mut body = String::new();
    for version in versions {
        body.push_str(version.version.as_str());
        body.push('\n');
    }
    PlainText(body)
}

/// Version metadata in the module proxy's `.info` shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    #[serde(rename = "Version")]
    pub version: String,

    /// RFC 3339 timestamp of the version's creation
    #[serde(rename = "Time")]
    pub time: String,
}

impl VersionInfo {
    pub fn from_record(record: &VersionRecord) -> Self {
        Self {
            version: record.version.to_string(),
            time: rfc3339(record.created_at),
        }
    }
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl IntoResponse for VersionInfo {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: HealthStatus,

    /// Service version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Component health checks
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub checks: HashMap<String, ComponentHealth>,
}

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Service is healthy
    Healthy,
    /// Service is unhealthy
    Unhealthy,
}

/// Component health status
#[derive(Debug, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component status
    pub status: HealthStatus,

    /// Optional message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthResponse {
    /// Create a healthy response
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            version: None,
            checks: HashMap::new(),
        }
    }

    /// Create a response with version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Add a component health check
    pub fn with_check(mut self, name: impl Into<String>, health: ComponentHealth) -> Self {
        self.checks.insert(name.into(), health);
        self
    }

    /// Determine overall health status from component checks
    pub fn compute_status(mut self) -> Self {
        let has_unhealthy = self
            .checks
            .values()
            .any(|c| c.status == HealthStatus::Unhealthy);

        self.status = if has_unhealthy {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Healthy
        };
        self
    }
}

impl IntoResponse for HealthResponse {
    fn into_response(self) -> Response {
        let status_code = match self.status {
            HealthStatus::Healthy => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        };

        (status_code, Json(self)).into_response()
    }
}

impl ComponentHealth {
    /// Create a healthy component
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    /// Create an unhealthy component
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use modreg_core::{Creator, ModuleId, ModuleName, OwnerScope, VersionId, VersionString};

    fn record(version: &str, secs: i64) -> VersionRecord {
        VersionRecord {
            id: VersionId::new(),
            module_id: ModuleId::new(),
            owner: OwnerScope::parse("acme").unwrap(),
            module: ModuleName::parse("widget").unwrap(),
            version: VersionString::parse(version).unwrap(),
            creator: Creator::anonymous(),
            is_internal: false,
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_version_list_is_newline_terminated() {
        let list = version_list(&[record("v1.0.0", 100), record("v1.1.0", 200)]);
        assert_eq!(list.0, "v1.0.0\nv1.1.0\n");
    }

    #[test]
    fn test_version_info_serialization() {
        let info = VersionInfo::from_record(&record("v1.1.0", 200));
        let json = serde_json::to_string(&info).unwrap();
        assert_eq!(json, r#"{"Version":"v1.1.0","Time":"1970-01-01T00:03:20Z"}"#);
    }

    #[test]
    fn test_health_response_status_computation() {
        let response = HealthResponse::healthy()
            .with_check("store", ComponentHealth::healthy())
            .with_check("blobs", ComponentHealth::unhealthy("unreachable"))
            .compute_status();

        assert_eq!(response.status, HealthStatus::Unhealthy);
        assert_eq!(
            response.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_health_response_all_checks_healthy() {
        let response = HealthResponse::healthy()
            .with_check("store", ComponentHealth::healthy())
            .compute_status();
        assert_eq!(response.status, HealthStatus::Healthy);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(response.into_response().status(), StatusCode::OK);
    }
}
