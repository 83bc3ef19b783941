// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket control surface: the layout descriptor
//! store, the retained-set mutation endpoints, and the per-target
//! WebSocket upgrade.

pub mod http;
pub mod ws;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{delete, get, post};
use axum::Router;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

/// Build the axum `Router` with every control-surface route.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::health))
        .route("/api/v1/targets", get(http::list_targets))
        .route("/layouts/index.json", get(http::get_index))
        .route(
            "/layouts/{name}.json",
            get(http::get_descriptor).put(http::put_descriptor).delete(http::delete_descriptor),
        )
        .route("/api/layouts/{name}/retention", post(http::set_retention))
        .route("/ws/{slug}", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Watch `{layouts_dir}/index.json` for external edits and resync the
/// registry on every change, so clients can subscribe to updates. Mirrors the
/// donor's `notify`-backed log watcher: a filesystem watcher wakes a poll
/// loop rather than acting directly from the notify callback, since the
/// callback runs on notify's own thread, not a tokio task.
pub async fn watch_layouts(state: Arc<AppState>, cancel: CancellationToken) {
    let (wake_tx, mut wake_rx) = mpsc::channel::<()>(1);
    let _watcher = setup_index_watcher(&state.layouts_dir, wake_tx.clone());

    // `notify` watchers are best-effort; also poll periodically so a missed
    // or platform-unsupported event doesn't wedge the retained set.
    let mut ticker = tokio::time::interval(Duration::from_secs(30));
    let mut last = read_index_snapshot(&state.layouts_dir);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = wake_rx.recv() => {}
            _ = ticker.tick() => {}
        }
        let current = read_index_snapshot(&state.layouts_dir);
        if current != last {
            last = current;
            if let Ok(entries) = crate::layouts::read_index(&state.layouts_dir) {
                state.registry.sync(http::desired_targets(&entries)).await;
            }
        }
    }
}

fn read_index_snapshot(layouts_dir: &Path) -> Option<String> {
    std::fs::read_to_string(layouts_dir.join("index.json")).ok()
}

fn setup_index_watcher(layouts_dir: &Path, wake_tx: mpsc::Sender<()>) -> Option<notify::RecommendedWatcher> {
    use notify::{RecursiveMode, Watcher};

    let mut watcher = notify::recommended_watcher(move |_: notify::Result<notify::Event>| {
        let _ = wake_tx.try_send(());
    })
    .ok()?;
    std::fs::create_dir_all(layouts_dir).ok()?;
    watcher.watch(layouts_dir, RecursiveMode::NonRecursive).ok()?;
    Some(watcher)
}
