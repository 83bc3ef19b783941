// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Owns the currently open segment for one target; rotates hourly and
//! sweeps retention.
//!
//! Exactly one Recorder is assumed to ever write a given
//! `{data_dir}/{slug}/*.mcap` file. Running two bridge processes against
//! the same `data_dir` is unsupported; no file lock is taken to enforce
//! this, it is a deployment constraint.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};

use crate::segment::{ChannelDescriptor, SegmentChannelId, SegmentWriter};

pub const SEGMENT_EXT: &str = "mcap";
const PROFILE: &str = "fgbridge";

/// `YYYYMMDD_HH` key for the UTC hour containing `instant`.
pub fn segment_key(instant: DateTime<Utc>) -> String {
    format!(
        "{:04}{:02}{:02}_{:02}",
        instant.year(),
        instant.month(),
        instant.day(),
        instant.hour()
    )
}

/// Parse a `YYYYMMDD_HH` segment key back into the UTC instant at the start
/// of that hour. Used by the Target Manager to decide which segments could
/// overlap a client's replay window.
pub fn segment_start(key: &str) -> Option<DateTime<Utc>> {
    let (date, hour) = key.split_once('_')?;
    if date.len() != 8 || hour.len() != 2 {
        return None;
    }
    let year: i32 = date[0..4].parse().ok()?;
    let month: u32 = date[4..6].parse().ok()?;
    let day: u32 = date[6..8].parse().ok()?;
    let hour: u32 = hour.parse().ok()?;
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0).single()
}

fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Recorder state for one target. Owns zero-or-one open [`SegmentWriter`].
pub struct Recorder {
    dir: PathBuf,
    retention_days: u64,
    current_key: String,
    /// `None` when the writer failed to open; the recorder then degrades to
    /// in-memory-only until the next rotation retries.
    writer: Option<SegmentWriter>,
    /// Channels currently known, re-registered into the writer on rotation
    /// so each new file is self-describing without a disk read.
    known_channels: Vec<ChannelDescriptor>,
    /// Maps our stable "known channel" index to the writer-local id assigned
    /// in the *current* segment (resets across rotation).
    segment_channel_ids: BTreeMap<usize, SegmentChannelId>,
    warned_write_failure: bool,
}

impl Recorder {
    /// Open the segment for the current UTC hour under `{data_dir}/{slug}`.
    pub fn start(data_dir: &Path, slug: &str, retention_days: u64) -> Self {
        let dir = data_dir.join(slug);
        let current_key = segment_key(now_utc());
        let writer = Self::open_segment(&dir, &current_key);
        Self {
            dir,
            retention_days,
            current_key,
            writer,
            known_channels: Vec::new(),
            segment_channel_ids: BTreeMap::new(),
            warned_write_failure: false,
        }
    }

    fn open_segment(dir: &Path, key: &str) -> Option<SegmentWriter> {
        if let Err(e) = std::fs::create_dir_all(dir) {
            tracing::warn!(dir = %dir.display(), err = %e, "failed to create segment directory");
            return None;
        }
        let path = dir.join(format!("{key}.{SEGMENT_EXT}"));
        match SegmentWriter::open(&path, PROFILE) {
            Ok(w) => Some(w),
            Err(e) => {
                tracing::warn!(path = %path.display(), err = %e, "segment open failed, recording in-memory-only until next rotation");
                None
            }
        }
    }

    /// Register a newly-advertised channel with the recorder; returns the
    /// stable index used to reference it on future `record` calls.
    pub fn register_channel(&mut self, descriptor: ChannelDescriptor) -> usize {
        let index = self.known_channels.len();
        if let Some(writer) = self.writer.as_mut() {
            match writer.register_descriptor(&descriptor) {
                Ok(id) => {
                    self.segment_channel_ids.insert(index, id);
                }
                Err(e) => {
                    tracing::warn!(err = %e, topic = %descriptor.topic, "failed to register channel with segment writer");
                }
            }
        }
        self.known_channels.push(descriptor);
        index
    }

    /// Rotate to a new hourly segment if `now`'s UTC hour differs from the
    /// currently open one. Re-registers every known channel into the new
    /// file so it stays self-describing.
    pub fn maybe_rotate(&mut self) {
        let key = segment_key(now_utc());
        if key == self.current_key {
            return;
        }
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.close() {
                tracing::warn!(err = %e, "failed to close segment on rotation");
            }
        }
        self.current_key = key.clone();
        self.warned_write_failure = false;
        let mut writer = Self::open_segment(&self.dir, &key);
        self.segment_channel_ids.clear();
        if let Some(w) = writer.as_mut() {
            for (index, descriptor) in self.known_channels.iter().enumerate() {
                match w.register_descriptor(descriptor) {
                    Ok(id) => {
                        self.segment_channel_ids.insert(index, id);
                    }
                    Err(e) => {
                        tracing::warn!(err = %e, topic = %descriptor.topic, "failed to re-register channel after rotation");
                    }
                }
            }
        }
        self.writer = writer;
    }

    /// Append a message to the channel previously returned by
    /// `register_channel`. Failures are logged once per segment and do not
    /// propagate; the caller's ring write and live fan-out proceed
    /// regardless.
    pub fn record(&mut self, channel_index: usize, log_time_ns: u64, publish_time_ns: u64, payload: &[u8]) {
        let Some(writer) = self.writer.as_mut() else { return };
        let Some(&segment_channel_id) = self.segment_channel_ids.get(&channel_index) else { return };
        if let Err(e) = writer.add_message(segment_channel_id, log_time_ns, publish_time_ns, payload) {
            if !self.warned_write_failure {
                tracing::warn!(err = %e, "segment write failed, dropping message persistence for this segment");
                self.warned_write_failure = true;
            }
        }
    }

    /// Close the open segment, if any. Called on manager shutdown.
    pub fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.close() {
                tracing::warn!(err = %e, "failed to close segment on shutdown");
            }
        }
    }

    /// Directory this recorder writes into; used by the retention-sweeper
    /// task, which runs independently of the writer's mutable state.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn retention_days(&self) -> u64 {
        self.retention_days
    }

    /// Key of the currently open segment, e.g. `20240101_10`. Read by the
    /// Connector to publish a shared snapshot for the Target Manager's
    /// disk-history scan, which must exclude the still-open file.
    pub fn current_key(&self) -> &str {
        &self.current_key
    }
}

/// Delete segments under `dir` older than `retention_days`. Best-effort:
/// individual delete failures are logged and swallowed; files that don't
/// match the segment extension are left untouched.
///
/// Free function (not a `Recorder` method) because the retention sweep runs
/// on its own task, independent of the writer the Recorder owns.
pub fn sweep_retention_segments(dir: &Path, retention_days: u64) {
    let horizon = SystemTime::now()
        .checked_sub(std::time::Duration::from_secs(retention_days * 86_400))
        .unwrap_or(UNIX_EPOCH);
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(dir = %dir.display(), err = %e, "retention sweep: directory unreadable");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(SEGMENT_EXT) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else { continue };
        let Ok(modified) = metadata.modified() else { continue };
        if modified < horizon {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::debug!(path = %path.display(), err = %e, "retention sweep: delete failed");
            }
        }
    }
}

/// Run the retention sweep on an interval until `cancel` fires.
pub async fn run_retention_sweeper(
    dir: PathBuf,
    retention_days: u64,
    period: std::time::Duration,
    cancel: tokio_util::sync::CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => sweep_retention_segments(&dir, retention_days),
        }
    }
}

#[cfg(test)]
#[path = "recorder_tests.rs"]
mod tests;
