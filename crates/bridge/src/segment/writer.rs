// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only indexed chunked-log writer over one open segment file.
//!
//! Delegates the on-disk chunk/summary layout to the `mcap` crate (the
//! indexed-log format this bridge was built against); this module owns only
//! the semantics on top of it: explicit schema/channel id assignment,
//! per-channel monotonic sequence numbers, and idempotent close.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use mcap::{Channel, Message, Schema, Writer};

use crate::segment::format::ChannelDescriptor;

/// Identifies a schema within one open segment. Local to the file.
pub type SchemaId = u32;
/// Identifies a channel within one open segment. Local to the file.
pub type SegmentChannelId = u32;

/// One open, writable segment file.
pub struct SegmentWriter {
    inner: Writer<'static, File>,
    /// `(schema_name, schema_encoding) -> schema_id`, keyed for idempotent
    /// registration within this segment.
    schema_ids: HashMap<(String, String), SchemaId>,
    schemas: HashMap<SchemaId, Arc<Schema<'static>>>,
    next_schema_id: SchemaId,
    channels: HashMap<SegmentChannelId, Arc<Channel<'static>>>,
    next_channel_id: SegmentChannelId,
    sequences: HashMap<SegmentChannelId, u32>,
    closed: bool,
}

impl SegmentWriter {
    /// Create the segment file and write its header. The crate stamps its
    /// own `library` field (`mcap-rs-<version>`); `profile` is ours to set.
    pub fn open(path: &Path, profile: &str) -> anyhow::Result<Self> {
        let file = File::create(path)?;
        let inner = mcap::WriteOptions::new().profile(profile).create(file)?;
        Ok(Self {
            inner,
            schema_ids: HashMap::new(),
            schemas: HashMap::new(),
            next_schema_id: 1,
            channels: HashMap::new(),
            next_channel_id: 0,
            sequences: HashMap::new(),
            closed: false,
        })
    }

    /// Register a schema, returning its existing id if `(name, encoding)`
    /// was already seen in this segment (idempotent).
    pub fn register_schema(&mut self, name: &str, encoding: &str, data: &[u8]) -> SchemaId {
        let key = (name.to_owned(), encoding.to_owned());
        if let Some(id) = self.schema_ids.get(&key) {
            return *id;
        }
        let id = self.next_schema_id;
        self.next_schema_id += 1;
        self.schemas.insert(
            id,
            Arc::new(Schema {
                name: name.to_owned(),
                encoding: encoding.to_owned(),
                data: Cow::Owned(data.to_vec()),
            }),
        );
        self.schema_ids.insert(key, id);
        id
    }

    /// Register a channel. Always assigns a fresh id, even if an identical
    /// channel was already registered.
    pub fn register_channel(
        &mut self,
        schema_id: Option<SchemaId>,
        topic: &str,
        message_encoding: &str,
        metadata: &std::collections::BTreeMap<String, String>,
    ) -> anyhow::Result<SegmentChannelId> {
        let schema = schema_id.and_then(|id| self.schemas.get(&id)).cloned();
        let channel = Arc::new(Channel {
            topic: topic.to_owned(),
            schema,
            message_encoding: message_encoding.to_owned(),
            metadata: metadata.clone().into_iter().collect(),
        });
        // Registering with the underlying writer up front surfaces any
        // write error immediately rather than on the first message.
        self.inner.add_channel(&channel)?;
        let id = self.next_channel_id;
        self.next_channel_id += 1;
        self.channels.insert(id, channel);
        Ok(id)
    }

    /// Re-register a channel descriptor previously known from the channel
    /// table, used by the Recorder on rotation so the new file is
    /// self-describing without re-deriving schema ids from scratch.
    pub fn register_descriptor(
        &mut self,
        descriptor: &ChannelDescriptor,
    ) -> anyhow::Result<SegmentChannelId> {
        let schema_id = descriptor.schema.as_ref().map(|schema| {
            self.register_schema(&schema.name, &schema.encoding, &schema.data)
        });
        self.register_channel(
            schema_id,
            &descriptor.topic,
            &descriptor.message_encoding,
            &descriptor.metadata,
        )
    }

    /// Append a message into the current chunk. `sequence` is caller-supplied
    /// and expected to increase monotonically per channel; the writer itself
    /// tracks and stamps it so callers only need to have a channel id.
    pub fn add_message(
        &mut self,
        channel_id: SegmentChannelId,
        log_time_ns: u64,
        publish_time_ns: u64,
        payload: &[u8],
    ) -> anyhow::Result<()> {
        let channel = self
            .channels
            .get(&channel_id)
            .ok_or_else(|| anyhow::anyhow!("unknown segment channel {channel_id}"))?;
        let sequence = self.sequences.entry(channel_id).or_insert(0);
        *sequence += 1;
        let message = Message {
            channel: Arc::clone(channel),
            sequence: *sequence,
            log_time: log_time_ns,
            publish_time: publish_time_ns,
            data: Cow::Borrowed(payload),
        };
        self.inner.write(&message)?;
        Ok(())
    }

    /// Flush the last chunk and write the summary section. Idempotent.
    pub fn close(&mut self) -> anyhow::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.inner.finish()?;
        self.closed = true;
        Ok(())
    }
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                tracing::warn!(err = %e, "segment close on drop failed");
            }
        }
    }
}

#[cfg(test)]
#[path = "writer_tests.rs"]
mod tests;
