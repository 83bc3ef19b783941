// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the layout descriptor store and retained-set
//! control surface.
//!
//! Uses `axum_test::TestServer` -- no real TCP needed.

use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use tempfile::TempDir;

use fgbridge::layouts;
use fgbridge::registry::TargetRegistry;
use fgbridge::state::AppState;
use fgbridge::transport::build_router;

struct Harness {
    _layouts_tmp: TempDir,
    _data_tmp: TempDir,
    server: TestServer,
}

fn harness() -> Harness {
    let layouts_tmp = TempDir::new().expect("tempdir");
    let data_tmp = TempDir::new().expect("tempdir");
    let registry = TargetRegistry::new(
        data_tmp.path().to_owned(),
        Duration::from_secs(900),
        7,
        Duration::from_secs(3600),
    );
    let state = AppState::new(layouts_tmp.path().to_owned(), Arc::clone(&registry));
    let router = build_router(state);
    let server = TestServer::new(router).expect("failed to create test server");
    Harness { _layouts_tmp: layouts_tmp, _data_tmp: data_tmp, server }
}

#[tokio::test]
async fn health_reports_zero_targets_for_a_fresh_registry() {
    let h = harness();
    let resp = h.server.get("/api/v1/health").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "running");
    assert_eq!(body["target_count"], 0);
}

#[tokio::test]
async fn index_starts_empty() {
    let h = harness();
    let resp = h.server.get("/layouts/index.json").await;
    resp.assert_status_ok();
    let body: Vec<serde_json::Value> = resp.json();
    assert!(body.is_empty());
}

#[tokio::test]
async fn put_then_get_descriptor_round_trips() {
    let h = harness();
    let body = r#"{"panels":{}}"#;

    let put = h.server.put("/layouts/dash-one.json").text(body).await;
    put.assert_status_ok();

    let get = h.server.get("/layouts/dash-one.json").await;
    get.assert_status_ok();
    assert_eq!(get.text(), body);
}

#[tokio::test]
async fn put_descriptor_with_target_headers_creates_an_index_entry() {
    let h = harness();

    h.server
        .put("/layouts/dash-two.json")
        .add_header("x-layout-target", "ws://upstream.example/feed")
        .add_header("x-layout-retention", "true")
        .add_header("x-layout-topics", "/odometry, /imu")
        .text("{}")
        .await
        .assert_status_ok();

    let entries: Vec<serde_json::Value> = h.server.get("/layouts/index.json").await.json();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["name"], "dash-two");
    assert_eq!(entries[0]["target"], "ws://upstream.example/feed");
    assert_eq!(entries[0]["retention"], true);
    assert_eq!(entries[0]["topics"], serde_json::json!(["/odometry", "/imu"]));
}

#[tokio::test]
async fn retention_enabled_target_is_visible_in_target_list() {
    let h = harness();

    h.server
        .put("/layouts/dash-three.json")
        .add_header("x-layout-target", "ws://upstream.example/feed")
        .add_header("x-layout-retention", "true")
        .text("{}")
        .await
        .assert_status_ok();

    let targets: Vec<serde_json::Value> = h.server.get("/api/v1/targets").await.json();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0]["url"], "ws://upstream.example/feed");
    assert_eq!(targets[0]["slug"], layouts::slugify("ws://upstream.example/feed"));
}

#[tokio::test]
async fn set_retention_toggles_the_flag_for_an_existing_entry() {
    let h = harness();

    h.server
        .put("/layouts/dash-four.json")
        .add_header("x-layout-target", "ws://upstream.example/feed")
        .add_header("x-layout-retention", "true")
        .text("{}")
        .await
        .assert_status_ok();

    h.server
        .post("/api/layouts/dash-four/retention")
        .json(&serde_json::json!({"enabled": false}))
        .await
        .assert_status_ok();

    let entries: Vec<serde_json::Value> = h.server.get("/layouts/index.json").await.json();
    assert_eq!(entries[0]["retention"], false);

    let targets: Vec<serde_json::Value> = h.server.get("/api/v1/targets").await.json();
    assert!(targets.is_empty());
}

#[tokio::test]
async fn set_retention_on_unknown_name_is_not_found() {
    let h = harness();
    h.server
        .post("/api/layouts/does-not-exist/retention")
        .json(&serde_json::json!({"enabled": true}))
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn delete_descriptor_removes_it_and_its_index_entry() {
    let h = harness();

    h.server.put("/layouts/dash-five.json").text("{}").await.assert_status_ok();
    h.server.delete("/layouts/dash-five.json").await.assert_status_ok();

    h.server.get("/layouts/dash-five.json").await.assert_status_not_found();
    let entries: Vec<serde_json::Value> = h.server.get("/layouts/index.json").await.json();
    assert!(entries.is_empty());
}

#[tokio::test]
async fn get_missing_descriptor_is_not_found() {
    let h = harness();
    h.server.get("/layouts/nope.json").await.assert_status_not_found();
}
