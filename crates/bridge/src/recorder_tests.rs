// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use chrono::TimeZone;

use super::*;
use crate::segment::ChannelDescriptor;

fn descriptor(topic: &str) -> ChannelDescriptor {
    ChannelDescriptor {
        topic: topic.to_owned(),
        message_encoding: "json".to_owned(),
        schema: None,
        metadata: BTreeMap::new(),
    }
}

#[test]
fn segment_key_formats_utc_hour() {
    let instant = Utc.with_ymd_and_hms(2024, 1, 1, 10, 45, 0).single().expect("valid calendar date");
    assert_eq!(segment_key(instant), "20240101_10");
}

#[test]
fn segment_start_round_trips_segment_key() {
    let instant = Utc.with_ymd_and_hms(2024, 3, 7, 23, 0, 0).single().expect("valid calendar date");
    let key = segment_key(instant);
    assert_eq!(segment_start(&key), Some(instant));
}

#[test]
fn segment_start_rejects_malformed_key() {
    assert_eq!(segment_start("not-a-key"), None);
    assert_eq!(segment_start("2024010_10"), None);
}

#[test]
fn record_writes_into_current_segment() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut recorder = Recorder::start(dir.path(), "demo", 7);
    let channel = recorder.register_channel(descriptor("/a"));
    recorder.record(channel, 1_000, 1_000, b"{}");
    recorder.close();

    let segment_dir = dir.path().join("demo");
    let files: Vec<_> = std::fs::read_dir(&segment_dir)?.filter_map(|e| e.ok()).collect();
    assert_eq!(files.len(), 1);
    Ok(())
}

#[test]
fn sweep_retention_deletes_only_stale_segments() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut recorder = Recorder::start(dir.path(), "demo", 1);
    let segment_dir = dir.path().join("demo");
    std::fs::create_dir_all(&segment_dir)?;

    let stale = segment_dir.join("20200101_00.mcap");
    std::fs::write(&stale, b"old")?;
    let old_time = SystemTime::now() - Duration::from_secs(2 * 86_400);
    filetime_touch(&stale, old_time);

    let fresh = segment_dir.join("20380101_00.mcap");
    std::fs::write(&fresh, b"new")?;

    sweep_retention_segments(recorder.dir(), recorder.retention_days());

    assert!(!stale.exists());
    assert!(fresh.exists());
    recorder.close();
    Ok(())
}

/// Minimal mtime setter so the retention test doesn't need a dedicated
/// filetime crate for one synthetic timestamp.
fn filetime_touch(path: &std::path::Path, time: SystemTime) {
    let file = std::fs::OpenOptions::new().write(true).open(path).expect("open file to touch mtime");
    file.set_modified(time).expect("set file mtime");
}
