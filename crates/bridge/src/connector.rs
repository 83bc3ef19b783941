// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Upstream WebSocket connector: one per target. Owns the upstream socket
//! and is the single writer of the target's [`Ring`] and [`Recorder`].
//!
//! Reconnect policy: 2s after a clean or error close, 5s after a dial
//! failure, unbounded attempts. Mirrors the donor's `upstream/bridge.rs`
//! run-loop shape (single task, `tokio::select!` over cancellation, inbound
//! socket messages, and a command channel) with a fixed, not exponential,
//! backoff per the target state machine.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::protocol::{self, UpstreamEvent, UpstreamRequest};
use crate::recorder::{segment_key, Recorder};
use crate::ring::Ring;
use crate::segment::ChannelDescriptor;

const RECONNECT_DELAY_CLOSE: Duration = Duration::from_secs(2);
const RECONNECT_DELAY_DIAL_FAILURE: Duration = Duration::from_secs(5);

/// Shared, reader-visible table of currently-advertised channels, keyed by
/// upstream channel id. Insertion order is preserved for deterministic
/// session snapshots.
pub type ChannelTable = Arc<RwLock<IndexMap<u32, ChannelDescriptor>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// A message as dispatched to attached sessions' live forwarders.
#[derive(Debug, Clone)]
pub struct LiveMessage {
    pub channel_id: u32,
    pub t_ns: u64,
    pub payload: Arc<[u8]>,
}

/// Notification that the channel table changed, so attached sessions can
/// extend their maps without re-polling.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Added { id: u32, descriptor: ChannelDescriptor },
    Removed { id: u32 },
}

enum ConnectorCommand {
    SetTopicsWhitelist(Option<HashSet<String>>),
}

/// Handle to a running connector. Cloned cheaply (it's all shared state plus
/// a command sender); the run loop itself lives in a spawned task.
pub struct Connector {
    channels: ChannelTable,
    topic_filter: RwLock<Option<HashSet<String>>>,
    state: RwLock<ConnectorState>,
    live_tx: broadcast::Sender<LiveMessage>,
    channel_events_tx: broadcast::Sender<ChannelEvent>,
    command_tx: mpsc::UnboundedSender<ConnectorCommand>,
    cancel: CancellationToken,
    /// Mirrors the Recorder's currently open segment key so the Target
    /// Manager (a different task) can exclude the open file from a disk
    /// history scan without reaching into the recorder directly.
    current_segment_key: RwLock<String>,
}

impl Connector {
    /// Start the connector task for `url`. `recorder` and `ring` become
    /// exclusively owned (recorder) or single-writer-shared (ring) by the
    /// run loop; `initial_filter` seeds the topic whitelist. `recorder` is
    /// `None` when the target's retention flag is off: the connector then
    /// never touches disk, only the ring and live fan-out.
    ///
    /// Returns the connector handle plus a join handle for its run loop
    /// task; callers that need to wait for the segment to close cleanly on
    /// teardown should await the join handle after cancelling.
    pub fn spawn(
        url: String,
        ring: Arc<Ring>,
        recorder: Option<Recorder>,
        initial_filter: Option<HashSet<String>>,
        cancel: CancellationToken,
    ) -> (Arc<Self>, tokio::task::JoinHandle<()>) {
        let channels: ChannelTable = Arc::new(RwLock::new(IndexMap::new()));
        let (live_tx, _) = broadcast::channel(1024);
        let (channel_events_tx, _) = broadcast::channel(256);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let current_segment_key = recorder
            .as_ref()
            .map(|r| r.current_key().to_owned())
            .unwrap_or_else(|| segment_key(chrono::Utc::now()));

        let connector = Arc::new(Self {
            channels: Arc::clone(&channels),
            topic_filter: RwLock::new(initial_filter.clone()),
            state: RwLock::new(ConnectorState::Disconnected),
            live_tx: live_tx.clone(),
            channel_events_tx: channel_events_tx.clone(),
            command_tx,
            cancel: cancel.clone(),
            current_segment_key: RwLock::new(current_segment_key),
        });

        let state_handle = Arc::clone(&connector);
        let join = tokio::spawn(run_loop(
            url,
            channels,
            state_handle,
            live_tx,
            channel_events_tx,
            command_rx,
            ring,
            recorder,
            cancel,
        ));

        (connector, join)
    }

    pub async fn state(&self) -> ConnectorState {
        *self.state.read().await
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Ordered snapshot of currently-known channels, for `attach` step 1.
    pub async fn channel_snapshot(&self) -> Vec<(u32, ChannelDescriptor)> {
        self.channels.read().await.iter().map(|(id, d)| (*id, d.clone())).collect()
    }

    pub fn subscribe_messages(&self) -> broadcast::Receiver<LiveMessage> {
        self.live_tx.subscribe()
    }

    pub fn subscribe_channel_events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.channel_events_tx.subscribe()
    }

    /// Replace the topic whitelist and re-run subscription reconciliation.
    /// `None` means "accept all advertised topics".
    pub fn set_topics_whitelist(&self, filter: Option<HashSet<String>>) {
        let _ = self.command_tx.send(ConnectorCommand::SetTopicsWhitelist(filter));
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Key of the segment the Recorder currently has open, e.g.
    /// `20240101_10`. Used by the Target Manager to exclude the open file
    /// from a disk-history scan.
    pub async fn current_segment_key(&self) -> String {
        self.current_segment_key.read().await.clone()
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_loop(
    url: String,
    channels: ChannelTable,
    handle: Arc<Connector>,
    live_tx: broadcast::Sender<LiveMessage>,
    channel_events_tx: broadcast::Sender<ChannelEvent>,
    mut command_rx: mpsc::UnboundedReceiver<ConnectorCommand>,
    ring: Arc<Ring>,
    mut recorder: Option<Recorder>,
    cancel: CancellationToken,
) {
    let mut recorder_index: HashMap<u32, usize> = HashMap::new();

    loop {
        if cancel.is_cancelled() {
            break;
        }
        *handle.state.write().await = ConnectorState::Connecting;

        let dial = tokio_tungstenite::connect_async(&url).await;

        let (mut write, mut read) = match dial {
            Ok((stream, _)) => {
                tracing::debug!(url = %url, "upstream connector: socket open");
                *handle.state.write().await = ConnectorState::Open;
                stream.split()
            }
            Err(e) => {
                tracing::debug!(url = %url, err = %e, "upstream connector: dial failed");
                *handle.state.write().await = ConnectorState::Disconnected;
                if sleep_or_cancelled(RECONNECT_DELAY_DIAL_FAILURE, &cancel).await {
                    break;
                }
                continue;
            }
        };

        let mut subscriptions: HashMap<u32, u32> = HashMap::new();
        let mut sub_to_channel: HashMap<u32, u32> = HashMap::new();
        let mut next_sub_id: u32 = 1;

        reconcile_subscriptions(
            &channels,
            &handle.topic_filter,
            &mut subscriptions,
            &mut sub_to_channel,
            &mut next_sub_id,
            &mut write,
        )
        .await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    *handle.state.write().await = ConnectorState::Disconnected;
                    if let Some(r) = recorder.as_mut() { r.close(); }
                    return;
                }
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(ConnectorCommand::SetTopicsWhitelist(filter)) => {
                            *handle.topic_filter.write().await = filter;
                            reconcile_subscriptions(
                                &channels, &handle.topic_filter, &mut subscriptions,
                                &mut sub_to_channel, &mut next_sub_id, &mut write,
                            ).await;
                        }
                        None => {}
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            handle_event(
                                &text, &channels, &handle.topic_filter, &ring, &mut recorder,
                                &mut recorder_index, &live_tx, &channel_events_tx,
                                &mut subscriptions, &mut sub_to_channel, &mut next_sub_id, &mut write,
                                &handle.current_segment_key,
                            ).await;
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            tracing::debug!(url = %url, "upstream connector: socket closed");
                            break;
                        }
                        Some(Err(e)) => {
                            tracing::debug!(url = %url, err = %e, "upstream connector: socket error");
                            break;
                        }
                        _ => {}
                    }
                }
            }
        }

        *handle.state.write().await = ConnectorState::Disconnected;
        if sleep_or_cancelled(RECONNECT_DELAY_CLOSE, &cancel).await {
            break;
        }
    }

    if let Some(r) = recorder.as_mut() { r.close(); }
}

/// Sleep for `delay`, returning `true` if cancelled before it elapsed.
async fn sleep_or_cancelled(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    WsMessage,
>;

async fn send_request(write: &mut WsSink, request: &UpstreamRequest) {
    if let Ok(text) = serde_json::to_string(request) {
        if let Err(e) = write.send(WsMessage::Text(text.into())).await {
            tracing::debug!(err = %e, "upstream connector: send failed");
        }
    }
}

/// Desired-vs-actual subscription reconciliation. Runs on advertise,
/// filter change, and unadvertise.
async fn reconcile_subscriptions(
    channels: &ChannelTable,
    topic_filter: &RwLock<Option<HashSet<String>>>,
    subscriptions: &mut HashMap<u32, u32>,
    sub_to_channel: &mut HashMap<u32, u32>,
    next_sub_id: &mut u32,
    write: &mut WsSink,
) {
    let filter = topic_filter.read().await.clone();
    let snapshot: Vec<(u32, String)> =
        channels.read().await.iter().map(|(id, d)| (*id, d.topic.clone())).collect();

    for (id, topic) in &snapshot {
        let desired = filter.as_ref().is_none_or(|f| f.contains(topic));
        let actual = subscriptions.contains_key(id);
        if desired && !actual {
            let sub_id = *next_sub_id;
            *next_sub_id += 1;
            subscriptions.insert(*id, sub_id);
            sub_to_channel.insert(sub_id, *id);
            send_request(write, &UpstreamRequest::Subscribe { channel_id: *id }).await;
        } else if !desired && actual {
            if let Some(sub_id) = subscriptions.remove(id) {
                sub_to_channel.remove(&sub_id);
                send_request(write, &UpstreamRequest::Unsubscribe { subscription_id: sub_id }).await;
            }
        }
    }

    // Drop subscriptions for channels no longer present at all.
    let known: HashSet<u32> = snapshot.iter().map(|(id, _)| *id).collect();
    let stale: Vec<u32> = subscriptions.keys().filter(|id| !known.contains(id)).copied().collect();
    for id in stale {
        if let Some(sub_id) = subscriptions.remove(&id) {
            sub_to_channel.remove(&sub_id);
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_event(
    text: &str,
    channels: &ChannelTable,
    topic_filter: &RwLock<Option<HashSet<String>>>,
    ring: &Arc<Ring>,
    recorder: &mut Option<Recorder>,
    recorder_index: &mut HashMap<u32, usize>,
    live_tx: &broadcast::Sender<LiveMessage>,
    channel_events_tx: &broadcast::Sender<ChannelEvent>,
    subscriptions: &mut HashMap<u32, u32>,
    sub_to_channel: &mut HashMap<u32, u32>,
    next_sub_id: &mut u32,
    write: &mut WsSink,
    current_segment_key: &RwLock<String>,
) {
    let event: UpstreamEvent = match serde_json::from_str(text) {
        Ok(e) => e,
        Err(e) => {
            tracing::debug!(err = %e, "upstream connector: malformed event, dropping frame");
            return;
        }
    };

    match event {
        UpstreamEvent::Advertise { channels: wire_channels } => {
            for wire in wire_channels {
                let id = wire.id;
                let descriptor = wire.into_descriptor();
                channels.write().await.insert(id, descriptor.clone());
                if let Some(r) = recorder.as_mut() {
                    if !recorder_index.contains_key(&id) {
                        let index = r.register_channel(descriptor.clone());
                        recorder_index.insert(id, index);
                    }
                }
                let _ = channel_events_tx.send(ChannelEvent::Added { id, descriptor });
            }
            reconcile_subscriptions(channels, topic_filter, subscriptions, sub_to_channel, next_sub_id, write)
                .await;
        }
        UpstreamEvent::Unadvertise { ids } => {
            for id in ids {
                channels.write().await.shift_remove(&id);
                if let Some(sub_id) = subscriptions.remove(&id) {
                    sub_to_channel.remove(&sub_id);
                    send_request(write, &UpstreamRequest::Unsubscribe { subscription_id: sub_id }).await;
                }
                let _ = channel_events_tx.send(ChannelEvent::Removed { id });
            }
        }
        UpstreamEvent::Message { subscription_id, channel_id, timestamp, data } => {
            let Some(&resolved_channel) = sub_to_channel.get(&subscription_id) else {
                tracing::warn!(subscription_id, "upstream connector: unknown subscription, dropping message");
                return;
            };
            if resolved_channel != channel_id {
                tracing::warn!(subscription_id, channel_id, "upstream connector: subscription/channel mismatch, dropping message");
                return;
            }
            let descriptor = match channels.read().await.get(&channel_id).cloned() {
                Some(d) => d,
                None => {
                    tracing::warn!(channel_id, "upstream connector: unknown channel, dropping message");
                    return;
                }
            };
            let filter = topic_filter.read().await.clone();
            if let Some(f) = &filter {
                if !f.contains(&descriptor.topic) {
                    return;
                }
            }
            let payload = match protocol::decode_payload(&data) {
                Ok(p) => p,
                Err(e) => {
                    tracing::debug!(err = %e, "upstream connector: undecodable payload, dropping message");
                    return;
                }
            };

            let now_ns = now_ns();
            ring.push(&descriptor.topic, timestamp, &payload, now_ns);

            if let Some(r) = recorder.as_mut() {
                r.maybe_rotate();
                let mut guard = current_segment_key.write().await;
                if *guard != r.current_key() {
                    *guard = r.current_key().to_owned();
                }
                drop(guard);
                if let Some(&index) = recorder_index.get(&channel_id) {
                    r.record(index, timestamp, timestamp, &payload);
                }
            }

            let _ = live_tx.send(LiveMessage { channel_id, t_ns: timestamp, payload: Arc::from(payload) });
        }
    }
}

fn now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

#[cfg(test)]
#[path = "connector_tests.rs"]
mod tests;
