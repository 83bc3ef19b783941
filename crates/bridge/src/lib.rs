// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! fgbridge: recording and replay bridge between upstream telemetry sources
//! and interactive visualisation clients.
//!
//! [`registry::TargetRegistry`] reconciles the retained-set descriptor
//! against running [`manager::TargetManager`]s; each manager composes a
//! [`connector::Connector`], a [`ring::Ring`], and a [`recorder::Recorder`]
//! for one target. [`transport`] exposes the HTTP/WebSocket control surface
//! that drives both.

pub mod config;
pub mod connector;
pub mod error;
pub mod layouts;
pub mod manager;
pub mod protocol;
pub mod recorder;
pub mod registry;
pub mod ring;
pub mod segment;
pub mod state;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::BridgeConfig;
use crate::registry::TargetRegistry;
use crate::state::AppState;
use crate::transport::http::desired_targets;

/// Run the bridge until shutdown: load the retained set, start the
/// registry's initial sync, bind the control surface, and watch the
/// layouts index for external edits.
pub async fn run(config: BridgeConfig) -> anyhow::Result<()> {
    let layouts_dir = config.layouts_dir();
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&layouts_dir)?;
    std::fs::create_dir_all(&data_dir)?;

    let registry = TargetRegistry::new(
        data_dir,
        config.max_ring_age(),
        config.retention_days,
        config.retention_sweep_interval(),
    );

    let entries = layouts::read_index(&layouts_dir)?;
    registry.sync(desired_targets(&entries)).await;

    let state = AppState::new(layouts_dir, Arc::clone(&registry));

    let shutdown = CancellationToken::new();
    tokio::spawn(transport::watch_layouts(Arc::clone(&state), shutdown.clone()));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "fgbridge listening");

    let router = transport::build_router(state);
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    Ok(())
}
