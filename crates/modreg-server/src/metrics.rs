//! Prometheus metrics collection
//!
//! HTTP traffic and publish outcomes are recorded by a router middleware and
//! exposed in text format at `/metrics`.

use axum::{
    body::Body,
    extract::MatchedPath,
    http::{header, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, Encoder,
    HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder,
};
use std::time::Instant;

/// Route template shared by the read and publish endpoints
const MODULE_ROUTE: &str = "/{owner}/{*rest}";

/// HTTP request counter
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .expect("Failed to create HTTP requests counter")
});

/// HTTP request duration histogram
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("Failed to create HTTP request duration histogram")
});

/// Publish outcome counter
pub static PUBLISH_OUTCOMES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "module_publish_total",
        "Total number of module publish attempts by outcome",
        &["outcome"]
    )
    .expect("Failed to create publish outcome counter")
});

/// Registry information gauge (version)
pub static REGISTRY_INFO: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!("modreg_info", "Registry information", &["version"])
        .expect("Failed to create registry info gauge")
});

/// Initialize metrics
pub fn init_metrics() {
    Lazy::force(&HTTP_REQUESTS_TOTAL);
    Lazy::force(&HTTP_REQUEST_DURATION);
    Lazy::force(&PUBLISH_OUTCOMES_TOTAL);
    Lazy::force(&REGISTRY_INFO);

    REGISTRY_INFO
        .with_label_values(&[env!("CARGO_PKG_VERSION")])
        .set(1);

    tracing::info!("Metrics initialized");
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Failed to convert metrics to string: {}", e))
}

/// Record HTTP request metrics
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION
        .with_label_values(&[method, path])
        .observe(duration_secs);
}

/// Outcome label of a publish response
pub fn publish_outcome(status: StatusCode) -> &'static str {
    match status {
        StatusCode::CREATED => "created",
        StatusCode::CONFLICT => "conflict",
        StatusCode::FORBIDDEN => "quota_exceeded",
        StatusCode::BAD_REQUEST => "invalid",
        _ => "error",
    }
}

/// Record a publish attempt
pub fn record_publish(status: StatusCode) {
    PUBLISH_OUTCOMES_TOTAL
        .with_label_values(&[publish_outcome(status)])
        .inc();
}

/// Middleware recording request counts, durations and publish outcomes
pub async fn track_metrics(req: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();

    // Route templates keep label cardinality bounded
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|mp| mp.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(req).await;
    let status = response.status();

    record_http_request(
        method.as_str(),
        &path,
        status.as_u16(),
        start.elapsed().as_secs_f64(),
    );

    if path == MODULE_ROUTE && (method == Method::PUT || method == Method::POST) {
        record_publish(status);
    }

    response
}

/// `GET /metrics`
pub async fn metrics_handler() -> Response {
    match render_metrics() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e).into_response()
        }
    }
}
