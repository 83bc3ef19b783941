// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Property-based tests for the quantified invariants around the ring
//! buffer, segment schema dedup, and registry reconciliation.

use std::time::Duration;

use proptest::prelude::*;

use fgbridge::registry::{DesiredTarget, TargetRegistry};
use fgbridge::ring::Ring;
use fgbridge::segment::SegmentWriter;

proptest! {
    /// After every push, every retained entry for a topic is within
    /// `max_age_ns` of the timestamp the eviction was sampled at.
    #[test]
    fn ring_never_retains_entries_older_than_max_age(
        max_age_ns in 1_000u64..1_000_000u64,
        pushes in proptest::collection::vec(0u64..10_000_000u64, 1..50),
    ) {
        let ring = Ring::new(max_age_ns);
        let mut now_ns = 0u64;
        for t_ns in pushes {
            now_ns = now_ns.max(t_ns);
            ring.push("/a", t_ns, b"payload", now_ns);
            let floor = now_ns.saturating_sub(max_age_ns);
            for entry in ring.snapshot("/a") {
                prop_assert!(entry.t_ns >= floor);
            }
        }
    }

    /// Registering the same (name, encoding) pair any number of times
    /// within one segment always returns the first-assigned id.
    #[test]
    fn schema_registration_is_idempotent_within_a_segment(
        repeats in 1usize..20,
        data in proptest::collection::vec(any::<u8>(), 0..64),
    ) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("idempotence.mcap");
        let mut writer = SegmentWriter::open(&path, "fgbridge").expect("open segment writer");

        let first_id = writer.register_schema("demo.Schema", "protobuf", &data);
        for _ in 1..repeats {
            let id = writer.register_schema("demo.Schema", "protobuf", &data);
            prop_assert_eq!(id, first_id);
        }
        writer.close().expect("close segment writer");
    }

    /// Syncing the same desired set twice leaves the running set and its
    /// topic filters unchanged; the second call is a no-op.
    #[test]
    fn registry_sync_is_idempotent(
        slugs in proptest::collection::hash_set("[a-z]{3,8}", 1..5),
    ) {
        let rt = tokio::runtime::Runtime::new().expect("build tokio runtime");
        let data_tmp = tempfile::tempdir().expect("create temp dir");
        let registry = TargetRegistry::new(
            data_tmp.path().to_owned(),
            Duration::from_secs(900),
            7,
            Duration::from_secs(3600),
        );

        let desired: Vec<DesiredTarget> = slugs
            .into_iter()
            .map(|name| DesiredTarget {
                url: format!("ws://{name}.example/feed"),
                retention: true,
                topic_filter: None,
            })
            .collect();

        rt.block_on(registry.sync(desired.clone()));
        let first = rt.block_on(registry.snapshot());

        rt.block_on(registry.sync(desired));
        let second = rt.block_on(registry.snapshot());

        prop_assert_eq!(
            first.iter().map(|s| s.slug.clone()).collect::<Vec<_>>(),
            second.iter().map(|s| s.slug.clone()).collect::<Vec<_>>()
        );
        prop_assert_eq!(
            first.iter().map(|s| s.topic_filter.clone()).collect::<Vec<_>>(),
            second.iter().map(|s| s.topic_filter.clone()).collect::<Vec<_>>()
        );
    }
}
