// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Target Manager: composes a [`Connector`], a [`Ring`], a [`Recorder`], and
//! a retention sweeper for one target, and merges disk history, ring
//! history, and live messages into a single ordered replay for each
//! attaching client.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::parse_duration;
use crate::connector::{ChannelEvent, Connector};
use crate::protocol::{DownstreamEvent, WireChannel};
use crate::recorder::{run_retention_sweeper, segment_start, Recorder, SEGMENT_EXT};
use crate::ring::Ring;
use crate::segment::{ReadMessage, SegmentReader};

/// A running per-target manager. Cheap to clone (all fields are shared
/// handles); the connector and sweeper each run on their own task.
pub struct TargetManager {
    slug: String,
    data_dir: PathBuf,
    connector: Arc<Connector>,
    ring: Arc<Ring>,
    max_ring_age: Duration,
    cancel: CancellationToken,
    /// Join handle for the connector's run loop, awaited by `stop()` so it
    /// returns only once the open segment has actually been closed.
    connector_join: Mutex<Option<JoinHandle<()>>>,
}

impl TargetManager {
    /// Start a manager for `url`, recording into `{data_dir}/{slug}` when
    /// `retention_enabled`, with subscriptions limited to `topic_filter`
    /// (`None` = accept all advertised topics).
    pub fn start(
        slug: String,
        url: String,
        data_dir: PathBuf,
        retention_enabled: bool,
        topic_filter: Option<HashSet<String>>,
        max_ring_age: Duration,
        retention_days: u64,
        retention_sweep_interval: Duration,
    ) -> Arc<Self> {
        let cancel = CancellationToken::new();
        let ring = Arc::new(Ring::new(max_ring_age.as_nanos() as u64));
        // Absence of the retention flag disables recording: no segment
        // writer is opened at all, so the target is ring/live-only.
        let recorder =
            retention_enabled.then(|| Recorder::start(&data_dir, &slug, retention_days));

        let (connector, connector_join) =
            Connector::spawn(url, Arc::clone(&ring), recorder, topic_filter, cancel.clone());

        if retention_enabled {
            tokio::spawn(run_retention_sweeper(
                data_dir.join(&slug),
                retention_days,
                retention_sweep_interval,
                cancel.clone(),
            ));
        }

        Arc::new(Self {
            slug,
            data_dir,
            connector,
            ring,
            max_ring_age,
            cancel,
            connector_join: Mutex::new(Some(connector_join)),
        })
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// Current connector state, for the registry's snapshot introspection
    /// endpoint.
    pub async fn connector_state(&self) -> crate::connector::ConnectorState {
        self.connector.state().await
    }

    pub async fn channel_count(&self) -> usize {
        self.connector.channel_count().await
    }

    /// Re-run subscription reconciliation against a new topic whitelist
    /// when the retained-set filter for this target changes.
    pub fn set_topics_whitelist(&self, filter: Option<HashSet<String>>) {
        self.connector.set_topics_whitelist(filter);
    }

    /// Tear down the manager: cancel the connector and sweeper tasks, then
    /// wait for the connector's run loop to actually exit so the open
    /// segment has been closed before returning.
    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Some(join) = self.connector_join.lock().await.take() {
            if let Err(e) = join.await {
                tracing::warn!(slug = %self.slug, err = %e, "connector task panicked during shutdown");
            }
        }
    }

    /// Attach a new client session. `lookback` is the client-supplied
    /// window string (`<int><s|m|h|d|w>`), falling back to the configured
    /// ring age when absent or unparsable.
    pub async fn attach(&self, lookback: Option<&str>) -> Session {
        // Step 1: snapshot channels under a read lock on the channel table.
        let snapshot = self.connector.channel_snapshot().await;
        let mut server_to_topic: HashMap<u32, String> =
            snapshot.iter().map(|(id, d)| (*id, d.topic.clone())).collect();
        let wire_channels: Vec<(u32, WireChannel)> = snapshot
            .iter()
            .map(|(id, d)| (*id, WireChannel::from_descriptor(*id, d)))
            .collect();

        // Step 2: compute the replay window.
        let lookback_ns = lookback
            .filter(|s| !s.is_empty())
            .and_then(parse_duration)
            .unwrap_or(self.max_ring_age)
            .as_nanos() as u64;
        let now_ns = now_ns();
        let earliest_ns = now_ns.saturating_sub(lookback_ns);

        // Step 3: best-effort disk backlog.
        let topics: HashSet<String> = server_to_topic.values().cloned().collect();
        let current_segment_key = self.connector.current_segment_key().await;
        let dir = self.data_dir.join(&self.slug);
        let backlog = {
            let ring = Arc::clone(&self.ring);
            let dir = dir.clone();
            tokio::task::spawn_blocking(move || {
                load_disk_backlog(&dir, &current_segment_key, earliest_ns, &topics, &ring)
            })
            .await
            .unwrap_or_default()
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (subscribe_tx, subscribe_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let live_rx = self.connector.subscribe_messages();
        let channel_events_rx = self.connector.subscribe_channel_events();
        let ring = Arc::clone(&self.ring);

        tokio::spawn(session_task(
            events_tx,
            subscribe_rx,
            live_rx,
            channel_events_rx,
            ring,
            backlog,
            server_to_topic.clone(),
            earliest_ns,
            cancel.clone(),
        ));
        // Keep server_to_topic alive for the channels() accessor below; the
        // session task owns its own copy.
        server_to_topic.clear();

        Session { channels: wire_channels, events_rx, subscribe_tx, _cancel_guard: cancel.drop_guard() }
    }
}

fn now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// Per-topic disk backlog entries, sorted ascending by `log_time_ns`.
type DiskBacklog = HashMap<String, Vec<(u64, Arc<[u8]>)>>;

/// List candidate segments, filter out the open one, and load messages that
/// fall in `[earliest_ns, ring.earliest(topic))`, the boundary below which
/// the ring already covers history. Corrupt or truncated segments are
/// skipped with a warning; the whole operation is best-effort and never
/// surfaces an error to the caller.
fn load_disk_backlog(
    dir: &Path,
    current_segment_key: &str,
    earliest_ns: u64,
    topics: &HashSet<String>,
    ring: &Ring,
) -> DiskBacklog {
    let mut backlog: DiskBacklog = HashMap::new();
    if topics.is_empty() {
        return backlog;
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(dir = %dir.display(), err = %e, "disk history: directory unreadable");
            return backlog;
        }
    };

    let mut candidates: Vec<(chrono::DateTime<chrono::Utc>, PathBuf)> = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(SEGMENT_EXT) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
        if stem == current_segment_key {
            continue;
        }
        let Some(start) = segment_start(stem) else { continue };
        let start_ns = start.timestamp_nanos_opt().unwrap_or(0) as u64;
        let one_hour_ns = 3_600_000_000_000u64;
        if start_ns + one_hour_ns < earliest_ns {
            continue;
        }
        candidates.push((start, path));
    }
    candidates.sort_by_key(|(start, _)| *start);

    let topic_set: std::collections::BTreeSet<String> = topics.iter().cloned().collect();
    for (_, path) in candidates {
        let reader = match SegmentReader::open(&path) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(path = %path.display(), err = %e, "disk history: skipping corrupt segment");
                continue;
            }
        };
        let messages = match reader.read_messages(earliest_ns, Some(&topic_set)) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(path = %path.display(), err = %e, "disk history: skipping corrupt segment");
                continue;
            }
        };
        for message in messages {
            let ReadMessage { topic, log_time_ns, payload, .. } = match message {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(path = %path.display(), err = %e, "disk history: corrupt message, skipping segment");
                    break;
                }
            };
            if log_time_ns < earliest_ns {
                continue;
            }
            if let Some(ring_earliest) = ring.earliest(&topic) {
                if log_time_ns >= ring_earliest {
                    continue;
                }
            }
            backlog.entry(topic).or_default().push((log_time_ns, Arc::from(payload)));
        }
    }

    for entries in backlog.values_mut() {
        entries.sort_by_key(|(t, _)| *t);
    }
    backlog
}

/// Per-session replay + live-fanout task. Owns the disk backlog snapshot
/// taken at attach time; everything else is read live from the Ring and the
/// Connector's broadcast channels.
#[allow(clippy::too_many_arguments)]
async fn session_task(
    events_tx: mpsc::UnboundedSender<DownstreamEvent>,
    mut subscribe_rx: mpsc::UnboundedReceiver<u32>,
    mut live_rx: tokio::sync::broadcast::Receiver<crate::connector::LiveMessage>,
    mut channel_events_rx: tokio::sync::broadcast::Receiver<ChannelEvent>,
    ring: Arc<Ring>,
    backlog: DiskBacklog,
    mut server_to_topic: HashMap<u32, String>,
    earliest_ns: u64,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            subscribed = subscribe_rx.recv() => {
                let Some(server_channel_id) = subscribed else { break };
                let Some(topic) = server_to_topic.get(&server_channel_id).cloned() else { continue };
                if let Some(entries) = backlog.get(&topic) {
                    for (t_ns, payload) in entries {
                        if *t_ns < earliest_ns { continue; }
                        if events_tx.send(DownstreamEvent::Message {
                            server_channel_id,
                            timestamp: *t_ns,
                            data: crate::protocol::encode_payload(payload),
                        }).is_err() { break; }
                    }
                }
                for entry in ring.snapshot(&topic) {
                    if entry.t_ns < earliest_ns { continue; }
                    if events_tx.send(DownstreamEvent::Message {
                        server_channel_id,
                        timestamp: entry.t_ns,
                        data: crate::protocol::encode_payload(&entry.payload),
                    }).is_err() { break; }
                }
            }
            event = channel_events_rx.recv() => {
                match event {
                    Ok(ChannelEvent::Added { id, descriptor }) => {
                        server_to_topic.insert(id, descriptor.topic.clone());
                        let wire = WireChannel::from_descriptor(id, &descriptor);
                        if events_tx.send(DownstreamEvent::AddChannel { server_channel_id: id, channel: wire }).is_err() {
                            break;
                        }
                    }
                    Ok(ChannelEvent::Removed { id }) => {
                        server_to_topic.remove(&id);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            live = live_rx.recv() => {
                match live {
                    Ok(message) if server_to_topic.contains_key(&message.channel_id) => {
                        if events_tx.send(DownstreamEvent::Message {
                            server_channel_id: message.channel_id,
                            timestamp: message.t_ns,
                            data: crate::protocol::encode_payload(&message.payload),
                        }).is_err() { break; }
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

/// A client session handle returned by [`TargetManager::attach`]. Dropping
/// it (or calling [`Session::detach`]) stops the per-session task; detach is
/// idempotent because it is just a drop.
pub struct Session {
    /// Channels known at attach time, for the caller to send as initial
    /// `AddChannel` events before entering its receive loop.
    pub channels: Vec<(u32, WireChannel)>,
    events_rx: mpsc::UnboundedReceiver<DownstreamEvent>,
    subscribe_tx: mpsc::UnboundedSender<u32>,
    _cancel_guard: tokio_util::sync::DropGuard,
}

impl Session {
    /// Record that the client subscribed to `server_channel_id`: triggers
    /// disk-backlog and ring replay for its topic.
    pub fn subscribe(&self, server_channel_id: u32) {
        let _ = self.subscribe_tx.send(server_channel_id);
    }

    /// Receive the next event to forward to the downstream client: either a
    /// backlog/ring/live message, or a new channel advertised mid-session.
    pub async fn recv(&mut self) -> Option<DownstreamEvent> {
        self.events_rx.recv().await
    }

    /// Explicit detach, equivalent to dropping the session.
    pub fn detach(self) {}
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
