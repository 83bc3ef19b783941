// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::{BTreeMap, BTreeSet};

use super::*;
use crate::segment::writer::SegmentWriter;

fn write_fixture(path: &std::path::Path) -> anyhow::Result<()> {
    let mut writer = SegmentWriter::open(path, "fgbridge")?;
    let chatter = writer.register_channel(None, "/chatter", "json", &BTreeMap::new())?;
    let odom = writer.register_channel(None, "/odom", "json", &BTreeMap::new())?;
    writer.add_message(chatter, 100, 100, b"{\"n\":1}")?;
    writer.add_message(odom, 150, 150, b"{\"n\":2}")?;
    writer.add_message(chatter, 200, 200, b"{\"n\":3}")?;
    writer.close()?;
    Ok(())
}

#[test]
fn reads_messages_at_or_after_start_time() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("seg.mcap");
    write_fixture(&path)?;

    let reader = SegmentReader::open(&path)?;
    let messages: Vec<_> = reader.read_messages(150, None)?.collect::<Result<_, _>>()?;
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| m.log_time_ns >= 150));
    Ok(())
}

#[test]
fn filters_by_topic() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("seg.mcap");
    write_fixture(&path)?;

    let reader = SegmentReader::open(&path)?;
    let mut topics = BTreeSet::new();
    topics.insert("/odom".to_owned());
    let messages: Vec<_> = reader
        .read_messages(0, Some(&topics))?
        .collect::<Result<_, _>>()?;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].topic, "/odom");
    Ok(())
}

#[test]
fn open_on_missing_file_is_an_io_error() {
    let err = SegmentReader::open(std::path::Path::new("/nonexistent/seg.mcap")).unwrap_err();
    assert!(matches!(err, SegmentError::Io(_)));
}
