// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Target Registry: reconciles the retained-set against a live map of
//! running [`TargetManager`]s. All mutation is serialised through a
//! single `Mutex` around the running-manager map; `sync` is the only writer
//! and is itself idempotent, so a `RwLock` buys nothing extra here.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::connector::ConnectorState;
use crate::layouts::slugify;
use crate::manager::TargetManager;

/// One entry of the desired set, derived from the retained-set index by the
/// control surface before calling `sync`.
#[derive(Debug, Clone)]
pub struct DesiredTarget {
    pub url: String,
    pub retention: bool,
    pub topic_filter: Option<HashSet<String>>,
}

/// Point-in-time summary of one running target, for `GET /api/v1/targets`.
#[derive(Debug, Clone, Serialize)]
pub struct TargetSummary {
    pub slug: String,
    pub url: String,
    pub retention: bool,
    pub topic_filter: Option<Vec<String>>,
    pub connector_state: ConnectorState,
    pub channel_count: usize,
}

struct RunningTarget {
    manager: Arc<TargetManager>,
    url: String,
    retention: bool,
    topic_filter: Option<HashSet<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownSlug;

impl std::fmt::Display for UnknownSlug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("unknown slug")
    }
}

impl std::error::Error for UnknownSlug {}

/// Shared parameters every Manager started by this registry is configured
/// with, taken once from [`crate::config::BridgeConfig`] at registry
/// construction.
pub struct TargetRegistry {
    data_dir: PathBuf,
    max_ring_age: Duration,
    retention_days: u64,
    retention_sweep_interval: Duration,
    running: Mutex<HashMap<String, RunningTarget>>,
}

impl TargetRegistry {
    pub fn new(
        data_dir: PathBuf,
        max_ring_age: Duration,
        retention_days: u64,
        retention_sweep_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            data_dir,
            max_ring_age,
            retention_days,
            retention_sweep_interval,
            running: Mutex::new(HashMap::new()),
        })
    }

    /// Idempotent reconciler: starts managers newly in the enabled set,
    /// re-whitelists managers whose filter changed, and stops managers no
    /// longer in the enabled set. `desired` entries with `retention ==
    /// false` are treated as not-enabled and are stopped/never started,
    /// since absence of retention disables recording for that target.
    pub async fn sync(&self, desired: Vec<DesiredTarget>) {
        let enabled: HashMap<String, DesiredTarget> = desired
            .into_iter()
            .filter(|d| d.retention)
            .map(|d| (slugify(&d.url), d))
            .collect();

        let mut running = self.running.lock().await;

        let stale: Vec<String> =
            running.keys().filter(|slug| !enabled.contains_key(*slug)).cloned().collect();
        for slug in stale {
            if let Some(target) = running.remove(&slug) {
                target.manager.stop().await;
            }
        }

        for (slug, entry) in enabled {
            match running.get_mut(&slug) {
                Some(existing) => {
                    if existing.topic_filter != entry.topic_filter {
                        existing.manager.set_topics_whitelist(entry.topic_filter.clone());
                        existing.topic_filter = entry.topic_filter;
                    }
                }
                None => {
                    let manager = TargetManager::start(
                        slug.clone(),
                        entry.url.clone(),
                        self.data_dir.clone(),
                        entry.retention,
                        entry.topic_filter.clone(),
                        self.max_ring_age,
                        self.retention_days,
                        self.retention_sweep_interval,
                    );
                    running.insert(
                        slug,
                        RunningTarget {
                            manager,
                            url: entry.url,
                            retention: entry.retention,
                            topic_filter: entry.topic_filter,
                        },
                    );
                }
            }
        }
    }

    /// Returns the running manager for `slug`, never auto-starting one:
    /// starting a manager is driven only by `sync`.
    pub async fn get_or_create(&self, slug: &str) -> Result<Arc<TargetManager>, UnknownSlug> {
        self.running.lock().await.get(slug).map(|t| Arc::clone(&t.manager)).ok_or(UnknownSlug)
    }

    pub async fn snapshot(&self) -> Vec<TargetSummary> {
        let running = self.running.lock().await;
        let mut summaries = Vec::with_capacity(running.len());
        for (slug, target) in running.iter() {
            summaries.push(TargetSummary {
                slug: slug.clone(),
                url: target.url.clone(),
                retention: target.retention,
                topic_filter: target.topic_filter.as_ref().map(|f| {
                    let mut topics: Vec<String> = f.iter().cloned().collect();
                    topics.sort();
                    topics
                }),
                connector_state: target.manager.connector_state().await,
                channel_count: target.manager.channel_count().await,
            });
        }
        summaries.sort_by(|a, b| a.slug.cmp(&b.slug));
        summaries
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
