// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Random-access reader over a closed segment file.
//!
//! The file is memory-mapped once at `open()` and handed to `mcap`'s message
//! iterator; decoding happens lazily as the caller pulls from
//! `read_messages()`, so a reader that only wants the tail of a long segment
//! never touches the bytes before it.

use std::collections::BTreeSet;
use std::fmt;
use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

/// A segment file could not be parsed. The Target Manager treats this as
/// "skip this segment and log a warning", not a fatal error.
#[derive(Debug)]
pub enum SegmentError {
    Io(std::io::Error),
    Corrupt(String),
}

impl fmt::Display for SegmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "segment io error: {e}"),
            Self::Corrupt(msg) => write!(f, "corrupt segment: {msg}"),
        }
    }
}

impl std::error::Error for SegmentError {}

impl From<std::io::Error> for SegmentError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<mcap::McapError> for SegmentError {
    fn from(e: mcap::McapError) -> Self {
        Self::Corrupt(e.to_string())
    }
}

/// One decoded message handed back by [`SegmentReader::read_messages`].
pub struct ReadMessage {
    pub topic: String,
    pub log_time_ns: u64,
    pub publish_time_ns: u64,
    pub payload: Vec<u8>,
}

/// An opened, memory-mapped segment file.
pub struct SegmentReader {
    mapped: Mmap,
}

impl SegmentReader {
    /// Map the file and validate that it at least starts with a readable
    /// MCAP stream. Summary parsing and indexing is left to `mcap`'s own
    /// iterator, invoked lazily from `read_messages`.
    pub fn open(path: &Path) -> Result<Self, SegmentError> {
        let file = File::open(path)?;
        // SAFETY: the bridge is the sole writer of these files and only maps
        // them after the writer side has closed and finished the segment;
        // the mapped region is never concurrently truncated.
        #[allow(unsafe_code)]
        let mapped = unsafe { Mmap::map(&file)? };
        Ok(Self { mapped })
    }

    /// Stream messages with `log_time_ns >= start_time_ns`, optionally
    /// restricted to `topics`. Order is whatever `mcap` yields per channel,
    /// which is non-decreasing `log_time_ns` within that channel as written.
    pub fn read_messages(
        &self,
        start_time_ns: u64,
        topics: Option<&BTreeSet<String>>,
    ) -> Result<impl Iterator<Item = Result<ReadMessage, SegmentError>> + '_, SegmentError> {
        let stream = mcap::MessageStream::new(&self.mapped)?;
        let topics = topics.cloned();
        Ok(stream.filter_map(move |item| match item {
            Ok(message) => {
                if message.log_time < start_time_ns {
                    return None;
                }
                if let Some(topics) = &topics {
                    if !topics.contains(&message.channel.topic) {
                        return None;
                    }
                }
                Some(Ok(ReadMessage {
                    topic: message.channel.topic.clone(),
                    log_time_ns: message.log_time,
                    publish_time_ns: message.publish_time,
                    payload: message.data.into_owned(),
                }))
            }
            Err(e) => Some(Err(SegmentError::from(e))),
        }))
    }
}

#[cfg(test)]
#[path = "reader_tests.rs"]
mod tests;
