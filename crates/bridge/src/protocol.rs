// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire envelope for the upstream-consumed and downstream-served WebSocket
//! subprotocol. Both sides share the same JSON shape (`{op, ...fields}`);
//! binary payloads are base64-encoded inside `data` since the transport is
//! text-message WebSocket. The real upstream wire format is out of scope;
//! this is the bridge's own framing for the subprotocol it advertises as
//! `foxglove.websocket.v1`.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::segment::{ChannelDescriptor, SchemaDescriptor};

/// Subprotocol token negotiated on WebSocket upgrade, both upstream (dialed)
/// and downstream (served).
pub const SUBPROTOCOL: &str = "foxglove.websocket.v1";

/// Choose a subprotocol from the client's offered list. Mirrors the donor's
/// `handleProtocols(offered) -> chosen | false` shape.
pub fn negotiate_subprotocol(offered: &[String]) -> Option<&'static str> {
    offered.iter().any(|p| p == SUBPROTOCOL).then_some(SUBPROTOCOL)
}

/// A channel as advertised over the wire, before it is split into the
/// internal [`ChannelDescriptor`]/[`SchemaDescriptor`] pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireChannel {
    pub id: u32,
    pub topic: String,
    #[serde(rename = "encoding")]
    pub message_encoding: String,
    #[serde(default)]
    pub schema_name: Option<String>,
    #[serde(default)]
    pub schema_encoding: Option<String>,
    /// Base64-encoded schema bytes, if any.
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl WireChannel {
    /// Split into the descriptor shape the segment writer and session
    /// facade deal in, inferring a schema encoding when upstream omitted it.
    pub fn into_descriptor(self) -> ChannelDescriptor {
        let schema = self.schema_name.map(|name| {
            let encoding = self
                .schema_encoding
                .unwrap_or_else(|| crate::segment::infer_schema_encoding(&self.message_encoding).to_owned());
            let data = self.schema.as_deref().and_then(|b64| BASE64.decode(b64).ok()).unwrap_or_default();
            SchemaDescriptor { name, encoding, data }
        });
        ChannelDescriptor {
            topic: self.topic,
            message_encoding: self.message_encoding,
            schema,
            metadata: self.metadata,
        }
    }

    /// Build a wire channel from an internal descriptor, for `AddChannel`
    /// events sent to a downstream client.
    pub fn from_descriptor(id: u32, descriptor: &ChannelDescriptor) -> Self {
        let (schema_name, schema_encoding, schema) = match &descriptor.schema {
            Some(s) => (Some(s.name.clone()), Some(s.encoding.clone()), Some(BASE64.encode(&s.data))),
            None => (None, None, None),
        };
        Self {
            id,
            topic: descriptor.topic.clone(),
            message_encoding: descriptor.message_encoding.clone(),
            schema_name,
            schema_encoding,
            schema,
            metadata: descriptor.metadata.clone(),
        }
    }
}

/// Encode a message payload for the `data` field of an outgoing envelope.
pub fn encode_payload(payload: &[u8]) -> String {
    BASE64.encode(payload)
}

/// Decode a message payload from the `data` field of an incoming envelope.
pub fn decode_payload(data: &str) -> anyhow::Result<Vec<u8>> {
    BASE64.decode(data).map_err(|e| anyhow::anyhow!("invalid base64 payload: {e}"))
}

/// Events received from the upstream connection, tagged by `op`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum UpstreamEvent {
    Advertise { channels: Vec<WireChannel> },
    Unadvertise { ids: Vec<u32> },
    Message { subscription_id: u32, channel_id: u32, timestamp: u64, data: String },
}

/// Requests sent to the upstream connection, tagged by `op`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum UpstreamRequest {
    Subscribe { channel_id: u32 },
    Unsubscribe { subscription_id: u32 },
}

/// Requests sent to a downstream (served) client, tagged by `op`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DownstreamEvent {
    AddChannel { server_channel_id: u32, channel: WireChannel },
    Message { server_channel_id: u32, timestamp: u64, data: String },
}

/// Requests received from a downstream client, tagged by `op`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DownstreamRequest {
    Subscribe { server_channel_id: u32 },
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
