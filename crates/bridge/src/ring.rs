// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-topic, age-bounded in-memory replay buffer.
//!
//! One [`Ring`] is owned by a single target's Connector task, which is the
//! sole writer; sessions read via [`Ring::snapshot`] without blocking the
//! writer. Timestamps are trusted as given by upstream: the ring never
//! re-sorts a push that arrives out of order (see the Recorder's doc comment
//! for why).

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

/// One entry in a topic's ring: a timestamp and its opaque payload.
#[derive(Debug, Clone)]
pub struct RingEntry {
    pub t_ns: u64,
    pub payload: std::sync::Arc<[u8]>,
}

/// Age-bounded per-topic message ring for one target.
pub struct Ring {
    max_age_ns: u64,
    topics: RwLock<HashMap<String, VecDeque<RingEntry>>>,
}

impl Ring {
    pub fn new(max_age_ns: u64) -> Self {
        Self { max_age_ns, topics: RwLock::new(HashMap::new()) }
    }

    /// Append an entry for `topic`, then evict from the head everything older
    /// than `now_ns - max_age_ns`. `now_ns` is sampled by the caller so the
    /// eviction bound is pinned to the moment of the push, per the age-bound
    /// invariant.
    pub fn push(&self, topic: &str, t_ns: u64, payload: &[u8], now_ns: u64) {
        let mut topics = self.topics.write().unwrap_or_else(|e| e.into_inner());
        let entries = topics.entry(topic.to_owned()).or_default();
        entries.push_back(RingEntry { t_ns, payload: std::sync::Arc::from(payload) });
        let floor = now_ns.saturating_sub(self.max_age_ns);
        while let Some(front) = entries.front() {
            if front.t_ns < floor {
                entries.pop_front();
            } else {
                break;
            }
        }
    }

    /// Copy out the current entries for `topic` in insertion order. Readers
    /// never block the writer: the snapshot is a clone taken under a brief
    /// read lock.
    pub fn snapshot(&self, topic: &str) -> Vec<RingEntry> {
        let topics = self.topics.read().unwrap_or_else(|e| e.into_inner());
        topics.get(topic).map(|entries| entries.iter().cloned().collect()).unwrap_or_default()
    }

    /// Timestamp of the oldest retained entry for `topic`, if any.
    pub fn earliest(&self, topic: &str) -> Option<u64> {
        let topics = self.topics.read().unwrap_or_else(|e| e.into_inner());
        topics.get(topic).and_then(|entries| entries.front()).map(|e| e.t_ns)
    }
}

#[cfg(test)]
#[path = "ring_tests.rs"]
mod tests;
