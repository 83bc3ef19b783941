// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the layout descriptor store and retained-set control
//! surface. The core treats descriptor bodies as opaque; it only
//! interprets the retained-set metadata fields (target, retention, topics).

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;
use crate::layouts;
use crate::registry::DesiredTarget;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub target_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct RetentionRequest {
    pub enabled: bool,
}

/// `GET /api/v1/health`.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let target_count = state.registry.snapshot().await.len();
    Json(HealthResponse { status: "running", target_count })
}

/// `GET /api/v1/targets`: live registry introspection.
pub async fn list_targets(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.registry.snapshot().await)
}

/// `GET /layouts/index.json`.
pub async fn get_index(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match layouts::read_index(&state.layouts_dir) {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => BridgeError::Internal.to_http_response(e.to_string()).into_response(),
    }
}

/// `GET /layouts/{name}.json`.
pub async fn get_descriptor(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match layouts::read_descriptor(&state.layouts_dir, &name) {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => e.to_http_response("descriptor not found").into_response(),
    }
}

/// `PUT /layouts/{name}.json`: upsert the descriptor blob and the
/// retained-set entry, then resync the registry.
pub async fn put_descriptor(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let body = match std::str::from_utf8(&body) {
        Ok(s) => s,
        Err(_) => return BridgeError::BadRequest.to_http_response("body is not valid UTF-8").into_response(),
    };
    if let Err(e) = layouts::write_descriptor(&state.layouts_dir, &name, body) {
        return e.to_http_response("failed to write descriptor").into_response();
    }

    let target = header_str(&headers, "x-layout-target");
    let retention = header_str(&headers, "x-layout-retention").map(|v| v == "true");
    let topics = header_str(&headers, "x-layout-topics");

    let entries = match layouts::read_index(&state.layouts_dir) {
        Ok(entries) => entries,
        Err(e) => return BridgeError::Internal.to_http_response(e.to_string()).into_response(),
    };
    let entries = layouts::upsert_entry(entries, &name, target, retention, topics);
    if let Err(e) = layouts::write_index(&state.layouts_dir, &entries) {
        return BridgeError::Internal.to_http_response(e.to_string()).into_response();
    }

    state.registry.sync(desired_targets(&entries)).await;
    Json(OkResponse { ok: true }).into_response()
}

/// `DELETE /layouts/{name}.json`: remove the descriptor and retained-set
/// entry, then resync.
pub async fn delete_descriptor(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    if let Err(e) = layouts::delete_descriptor(&state.layouts_dir, &name) {
        return e.to_http_response("descriptor not found").into_response();
    }

    let entries = match layouts::read_index(&state.layouts_dir) {
        Ok(entries) => entries,
        Err(e) => return BridgeError::Internal.to_http_response(e.to_string()).into_response(),
    };
    let entries = layouts::remove_entry(entries, &name);
    if let Err(e) = layouts::write_index(&state.layouts_dir, &entries) {
        return BridgeError::Internal.to_http_response(e.to_string()).into_response();
    }

    state.registry.sync(desired_targets(&entries)).await;
    Json(OkResponse { ok: true }).into_response()
}

/// `POST /api/layouts/{name}/retention`: flip the retention flag and resync.
pub async fn set_retention(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<RetentionRequest>,
) -> impl IntoResponse {
    let entries = match layouts::read_index(&state.layouts_dir) {
        Ok(entries) => entries,
        Err(e) => return BridgeError::Internal.to_http_response(e.to_string()).into_response(),
    };
    let entries = match layouts::set_retention(entries, &name, req.enabled) {
        Ok(entries) => entries,
        Err(e) => return e.to_http_response("descriptor not found").into_response(),
    };
    if let Err(e) = layouts::write_index(&state.layouts_dir, &entries) {
        return BridgeError::Internal.to_http_response(e.to_string()).into_response();
    }

    state.registry.sync(desired_targets(&entries)).await;
    Json(OkResponse { ok: true }).into_response()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Project the retained-set index into the registry's desired-set shape
/// Entries without a `target` never resolve to a connectable URL.
pub fn desired_targets(entries: &[layouts::RetainedEntry]) -> Vec<DesiredTarget> {
    entries
        .iter()
        .filter_map(|entry| {
            let url = entry.target.clone()?;
            Some(DesiredTarget { url, retention: entry.retention, topic_filter: entry.topic_filter() })
        })
        .collect()
}
