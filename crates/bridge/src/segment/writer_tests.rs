// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::BTreeMap;

use super::*;

#[test]
fn schema_registration_is_idempotent_by_name_and_encoding() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut writer = SegmentWriter::open(&dir.path().join("a.mcap"), "fgbridge")?;
    let first = writer.register_schema("std_msgs/String", "ros1msg", b"string data");
    let second = writer.register_schema("std_msgs/String", "ros1msg", b"string data");
    assert_eq!(first, second);
    let third = writer.register_schema("std_msgs/String", "ros2msg", b"string data");
    assert_ne!(first, third);
    Ok(())
}

#[test]
fn channel_registration_always_assigns_a_fresh_id() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut writer = SegmentWriter::open(&dir.path().join("b.mcap"), "fgbridge")?;
    let schema = writer.register_schema("std_msgs/String", "ros1msg", b"string data");
    let first = writer.register_channel(Some(schema), "/chatter", "ros1", &BTreeMap::new())?;
    let second = writer.register_channel(Some(schema), "/chatter", "ros1", &BTreeMap::new())?;
    assert_ne!(first, second);
    Ok(())
}

#[test]
fn sequence_numbers_increase_monotonically_per_channel() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut writer = SegmentWriter::open(&dir.path().join("c.mcap"), "fgbridge")?;
    let channel = writer.register_channel(None, "/chatter", "json", &BTreeMap::new())?;
    writer.add_message(channel, 1, 1, b"{}")?;
    writer.add_message(channel, 2, 2, b"{}")?;
    assert_eq!(*writer.sequences.get(&channel).expect("channel has a tracked sequence"), 2);
    Ok(())
}

#[test]
fn add_message_on_unknown_channel_errors() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut writer = SegmentWriter::open(&dir.path().join("d.mcap"), "fgbridge")?;
    let err = writer.add_message(999, 1, 1, b"{}").unwrap_err();
    assert!(err.to_string().contains("unknown segment channel"));
    Ok(())
}

#[test]
fn close_is_idempotent() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut writer = SegmentWriter::open(&dir.path().join("e.mcap"), "fgbridge")?;
    writer.close()?;
    writer.close()?;
    Ok(())
}
