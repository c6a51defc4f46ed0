//! Module proxy protocol tests
//!
//! End-to-end publish and read flows over HTTP against the in-memory stores.

mod common;

use common::{assert_status, random_segment, TestApp};
use futures::future::join_all;
use modreg_core::QuotaLimits;
use modreg_integration_tests::{mismatched_archive, module_archive, ArchiveBuilder};
use reqwest::StatusCode;

const WIDGET: &str = "example.com/widget";

#[tokio::test]
async fn test_publish_then_list_in_creation_order() {
    let app = TestApp::new().await;

    // Creation order decides, not semver precedence
    for (version, at) in [("v1.1.0", 100), ("v1.0.0", 200), ("v0.9.0", 300)] {
        app.clock.set(at);
        let response = app.publish(WIDGET, module_archive(WIDGET, version)).await;
        assert_status(&response, StatusCode::CREATED);
    }

    let response = app.list(WIDGET).await;
    assert_status(&response, StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/plain; charset=utf-8"
    );
    let body = response.text().await.expect("Failed to get response text");
    assert_eq!(body, "v1.1.0\nv1.0.0\nv0.9.0\n");
}

#[tokio::test]
async fn test_unknown_module_is_not_found() {
    let app = TestApp::new().await;
    let module = format!("example.com/{}", random_segment(12));

    assert_status(&app.list(&module).await, StatusCode::NOT_FOUND);
    assert_status(
        &app.get(&format!("{}/@latest", app.module_url(&module))).await,
        StatusCode::NOT_FOUND,
    );
    assert_status(
        &app.get(&app.item_url(&module, "v1.0.0.info")).await,
        StatusCode::NOT_FOUND,
    );
}

#[tokio::test]
async fn test_info_and_latest() {
    let app = TestApp::new().await;

    app.clock.set(100);
    assert_status(
        &app.publish(WIDGET, module_archive(WIDGET, "v1.0.0")).await,
        StatusCode::CREATED,
    );
    app.clock.set(200);
    assert_status(
        &app.publish(WIDGET, module_archive(WIDGET, "v1.1.0")).await,
        StatusCode::CREATED,
    );

    let response = app.get(&app.item_url(WIDGET, "v1.0.0.info")).await;
    assert_status(&response, StatusCode::OK);
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(
        body,
        serde_json::json!({ "Version": "v1.0.0", "Time": "1970-01-01T00:01:40Z" })
    );

    // Bare version item is an alias for .info
    let bare: serde_json::Value = app
        .get(&app.item_url(WIDGET, "v1.0.0"))
        .await
        .json()
        .await
        .expect("Failed to parse JSON");
    assert_eq!(bare, body);

    for url in [
        format!("{}/@latest", app.module_url(WIDGET)),
        app.item_url(WIDGET, "latest.info"),
    ] {
        let response = app.get(&url).await;
        assert_status(&response, StatusCode::OK);
        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["Version"], "v1.1.0");
        assert_eq!(body["Time"], "1970-01-01T00:03:20Z");
    }
}

#[tokio::test]
async fn test_latest_is_not_found_when_newest_timestamp_is_shared() {
    let app = TestApp::new().await;

    app.clock.set(500);
    for version in ["v1.0.0", "v2.0.0"] {
        assert_status(
            &app.publish(WIDGET, module_archive(WIDGET, version)).await,
            StatusCode::CREATED,
        );
    }

    assert_status(
        &app.get(&format!("{}/@latest", app.module_url(WIDGET))).await,
        StatusCode::NOT_FOUND,
    );

    // Both versions remain individually reachable
    assert_status(&app.get(&app.item_url(WIDGET, "v2.0.0.info")).await, StatusCode::OK);
    let body = app.list(WIDGET).await.text().await.expect("Failed to get response text");
    assert_eq!(body, "v1.0.0\nv2.0.0\n");
}

#[tokio::test]
async fn test_descriptor_and_aliases() {
    let app = TestApp::new().await;
    let archive = ArchiveBuilder::module(WIDGET, "v1.0.0")
        .descriptor(WIDGET, "v1.0.0", "module example.com/widget\n\ngo 1.21\n")
        .entry("example.com/widget@v1.0.0/widget.go", "package widget\n")
        .build();
    assert_status(&app.publish(WIDGET, archive).await, StatusCode::CREATED);

    for item in ["v1.0.0.descriptor", "v1.0.0.mod", "latest.mod"] {
        let response = app.get(&app.item_url(WIDGET, item)).await;
        assert_status(&response, StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "text/plain; charset=utf-8"
        );
        let text = response.text().await.expect("Failed to get response text");
        assert_eq!(text, "module example.com/widget\n\ngo 1.21\n", "item {}", item);
    }
}

#[tokio::test]
async fn test_content_download_and_conditional_requests() {
    let app = TestApp::new().await;
    let archive = module_archive(WIDGET, "v1.0.0");
    assert_status(&app.publish(WIDGET, archive.clone()).await, StatusCode::CREATED);

    let response = app.get(&app.item_url(WIDGET, "v1.0.0.zip")).await;
    assert_status(&response, StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers["content-type"], "application/zip");
    assert_eq!(headers["content-length"], archive.len().to_string().as_str());
    assert_eq!(
        headers["content-disposition"],
        "attachment; filename=\"v1.0.0.zip\""
    );
    assert_eq!(headers["last-modified"], "Thu, 01 Jan 1970 00:01:40 GMT");
    let body = response.bytes().await.expect("Failed to read body");
    assert_eq!(body.as_ref(), archive.as_slice());

    let etag = headers["etag"].to_str().expect("ETag is ASCII").to_string();
    assert!(etag.starts_with('"') && etag.ends_with('"'));
    assert_eq!(etag.len(), 66);

    let same = app.get(&app.item_url(WIDGET, "v1.0.0.archive")).await;
    assert_eq!(same.headers()["etag"], etag.as_str());

    let response = app
        .client()
        .get(app.item_url(WIDGET, "v1.0.0.zip"))
        .header("If-None-Match", etag.as_str())
        .send()
        .await
        .expect("Failed to send request");
    assert_status(&response, StatusCode::NOT_MODIFIED);
    assert_eq!(response.headers()["etag"], etag.as_str());

    let response = app
        .client()
        .get(app.item_url(WIDGET, "v1.0.0.zip"))
        .header("If-None-Match", "\"something-else\"")
        .send()
        .await
        .expect("Failed to send request");
    assert_status(&response, StatusCode::OK);

    let response = app
        .client()
        .get(app.item_url(WIDGET, "v1.0.0.zip"))
        .header("If-Modified-Since", "Thu, 01 Jan 1970 00:01:40 GMT")
        .send()
        .await
        .expect("Failed to send request");
    assert_status(&response, StatusCode::NOT_MODIFIED);

    let response = app
        .client()
        .get(app.item_url(WIDGET, "v1.0.0.zip"))
        .header("If-Modified-Since", "Thu, 01 Jan 1970 00:01:00 GMT")
        .send()
        .await
        .expect("Failed to send request");
    assert_status(&response, StatusCode::OK);
}

#[tokio::test]
async fn test_concurrent_duplicate_publishes_create_once() {
    let app = TestApp::new().await;
    let archive = module_archive(WIDGET, "v1.0.0");

    let responses = join_all((0..8).map(|_| app.publish(WIDGET, archive.clone()))).await;

    let created = responses
        .iter()
        .filter(|r| r.status() == StatusCode::CREATED)
        .count();
    let conflicts = responses
        .iter()
        .filter(|r| r.status() == StatusCode::CONFLICT)
        .count();
    assert_eq!(created, 1);
    assert_eq!(conflicts, 7);

    let body = app.list(WIDGET).await.text().await.expect("Failed to get response text");
    assert_eq!(body, "v1.0.0\n");
}

#[tokio::test]
async fn test_republish_is_conflict() {
    let app = TestApp::new().await;

    assert_status(
        &app.publish(WIDGET, module_archive(WIDGET, "v1.0.0")).await,
        StatusCode::CREATED,
    );
    app.clock.advance(60);
    assert_status(
        &app.publish(WIDGET, module_archive(WIDGET, "v1.0.0")).await,
        StatusCode::CONFLICT,
    );

    // The original timestamp is kept
    let body: serde_json::Value = app
        .get(&app.item_url(WIDGET, "v1.0.0.info"))
        .await
        .json()
        .await
        .expect("Failed to parse JSON");
    assert_eq!(body["Time"], "1970-01-01T00:01:40Z");
}

#[tokio::test]
async fn test_malformed_archives_are_rejected_without_storing() {
    let app = TestApp::new().await;

    let bad_uploads = [
        b"this is not a zip file".to_vec(),
        mismatched_archive(WIDGET),
        ArchiveBuilder::new().build(),
        ArchiveBuilder::new()
            .entry("example.com/widget@v1.0.0/widget.go", "package widget\n")
            .build(),
        ArchiveBuilder::module(WIDGET, "1.0.0").build(),
    ];

    for upload in bad_uploads {
        let response = app.publish(WIDGET, upload).await;
        assert_status(&response, StatusCode::BAD_REQUEST);
        let text = response.text().await.expect("Failed to get response text");
        assert!(text.ends_with('\n'));
    }

    assert_status(&app.list(WIDGET).await, StatusCode::NOT_FOUND);
    assert!(app.blobs.is_empty().await);
}

#[tokio::test]
async fn test_publish_path_must_match_archive_module() {
    let app = TestApp::new().await;

    let response = app
        .publish("example.com/gadget", module_archive(WIDGET, "v1.0.0"))
        .await;
    assert_status(&response, StatusCode::BAD_REQUEST);

    assert_status(&app.list(WIDGET).await, StatusCode::NOT_FOUND);
    assert_status(&app.list("example.com/gadget").await, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_case_encoded_module_paths() {
    let app = TestApp::new().await;
    let module = "github.com/Azure/sdk";

    let response = app
        .publish("github.com/!azure/sdk", module_archive(module, "v1.0.0-RC1"))
        .await;
    assert_status(&response, StatusCode::CREATED);

    let response = app.list("github.com/!azure/sdk").await;
    assert_status(&response, StatusCode::OK);
    assert_eq!(response.text().await.expect("Failed to get response text"), "v1.0.0-RC1\n");

    assert_status(
        &app.get(&app.item_url("github.com/!azure/sdk", "v1.0.0-!r!c1.info")).await,
        StatusCode::OK,
    );

    // Literal upper case is not a valid encoded path
    assert_status(&app.list(module).await, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_owners_are_isolated() {
    let app = TestApp::new().await;
    assert_status(
        &app.publish(WIDGET, module_archive(WIDGET, "v1.0.0")).await,
        StatusCode::CREATED,
    );

    let other = format!("{}/other-team/{}/@v/list", app.url(), WIDGET);
    assert_status(&app.get(&other).await, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_publish_with_creator_header() {
    let app = TestApp::new().await;

    let response = app
        .publish_as(WIDGET, module_archive(WIDGET, "v1.0.0"), Some("alice"))
        .await;
    assert_status(&response, StatusCode::CREATED);

    let response = app
        .client()
        .post(app.module_url(WIDGET))
        .header("x-registry-user", "   ")
        .body(module_archive(WIDGET, "v1.0.1"))
        .send()
        .await
        .expect("Failed to send request");
    assert_status(&response, StatusCode::CREATED);

    let body = app.list(WIDGET).await.text().await.expect("Failed to get response text");
    assert_eq!(body, "v1.0.0\nv1.0.1\n");
}

#[tokio::test]
async fn test_total_size_quota() {
    let first = module_archive(WIDGET, "v1.0.0");
    let app = TestApp::with_quota(QuotaLimits {
        max_total_size: Some(first.len() as u64 + 10),
        ..QuotaLimits::unlimited()
    })
    .await;

    assert_status(&app.publish(WIDGET, first).await, StatusCode::CREATED);

    app.clock.advance(1);
    let response = app.publish(WIDGET, module_archive(WIDGET, "v1.1.0")).await;
    assert_status(&response, StatusCode::FORBIDDEN);
    assert_eq!(
        response.text().await.expect("Failed to get response text"),
        "maximum total size of stored packages reached\n"
    );

    let body = app.list(WIDGET).await.text().await.expect("Failed to get response text");
    assert_eq!(body, "v1.0.0\n");
}

#[tokio::test]
async fn test_version_count_quota_spans_modules() {
    let app = TestApp::with_quota(QuotaLimits {
        max_version_count: Some(2),
        ..QuotaLimits::unlimited()
    })
    .await;

    assert_status(
        &app.publish(WIDGET, module_archive(WIDGET, "v1.0.0")).await,
        StatusCode::CREATED,
    );
    assert_status(
        &app.publish("example.com/gadget", module_archive("example.com/gadget", "v1.0.0"))
            .await,
        StatusCode::CREATED,
    );
    assert_status(
        &app.publish(WIDGET, module_archive(WIDGET, "v1.1.0")).await,
        StatusCode::FORBIDDEN,
    );
}

#[tokio::test]
async fn test_file_size_quota() {
    let app = TestApp::with_quota(QuotaLimits {
        max_type_file_size: Some(16),
        ..QuotaLimits::unlimited()
    })
    .await;

    let response = app.publish(WIDGET, module_archive(WIDGET, "v1.0.0")).await;
    assert_status(&response, StatusCode::FORBIDDEN);
    assert_status(&app.list(WIDGET).await, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_acme_widget_scenario() {
    let app = TestApp::new().await;

    app.clock.set(100);
    assert_status(
        &app.publish("widget", module_archive("widget", "v1.0.0")).await,
        StatusCode::CREATED,
    );
    app.clock.set(200);
    assert_status(
        &app.publish("widget", module_archive("widget", "v1.1.0")).await,
        StatusCode::CREATED,
    );

    let response = app.get(&format!("{}/acme/widget/@v/list", app.url())).await;
    assert_eq!(
        response.text().await.expect("Failed to get response text"),
        "v1.0.0\nv1.1.0\n"
    );

    let latest: serde_json::Value = app
        .get(&format!("{}/acme/widget/@latest", app.url()))
        .await
        .json()
        .await
        .expect("Failed to parse JSON");
    assert_eq!(latest["Version"], "v1.1.0");

    let descriptor = app
        .get(&format!("{}/acme/widget/@v/v1.0.0.mod", app.url()))
        .await
        .text()
        .await
        .expect("Failed to get response text");
    assert_eq!(descriptor, "module widget\n");
}
