// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Descriptor store for `{layouts_dir}/{name}.json` blobs plus the retained-
//! set index at `{layouts_dir}/index.json`. The core never parses
//! a descriptor blob's contents; it only tracks the retained-set metadata
//! (target URL, retention flag, topic filter) needed to drive
//! [`crate::registry::TargetRegistry::sync`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// One entry in the retained-set index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetainedEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default)]
    pub retention: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl RetainedEntry {
    fn new(name: String, now: DateTime<Utc>) -> Self {
        Self { name, target: None, retention: false, topics: Vec::new(), created_at: now, updated_at: now }
    }

    /// `None` when this entry should not connect at all (no target set).
    pub fn topic_filter(&self) -> Option<HashSet<String>> {
        if self.topics.is_empty() {
            None
        } else {
            Some(self.topics.iter().cloned().collect())
        }
    }
}

/// `slug = lowercase(url with non-alphanumeric runs collapsed to '-',
/// trimmed of leading/trailing '-')`.
pub fn slugify(url: &str) -> String {
    let mut slug = String::with_capacity(url.len());
    let mut prev_dash = false;
    for ch in url.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            prev_dash = false;
        } else if !prev_dash {
            slug.push('-');
            prev_dash = true;
        }
    }
    slug.trim_matches('-').to_owned()
}

/// Load the retained-set index, migrating the legacy array-of-strings form
/// in place (not persisted automatically; callers that mutate write it back).
pub fn read_index(layouts_dir: &Path) -> anyhow::Result<Vec<RetainedEntry>> {
    let path = layouts_dir.join("index.json");
    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }
    let raw: serde_json::Value = serde_json::from_str(&contents)?;
    let now = Utc::now();
    let entries = match raw {
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|item| migrate_entry(item, now))
            .collect(),
        _ => Vec::new(),
    };
    Ok(entries)
}

/// Parse one index element, migrating a bare string (legacy form) into a
/// fresh entry with `createdAt = updatedAt = now`.
fn migrate_entry(item: serde_json::Value, now: DateTime<Utc>) -> Option<RetainedEntry> {
    match item {
        serde_json::Value::String(name) => Some(RetainedEntry::new(name, now)),
        serde_json::Value::Object(_) => serde_json::from_value(item).ok(),
        _ => None,
    }
}

pub fn write_index(layouts_dir: &Path, entries: &[RetainedEntry]) -> anyhow::Result<()> {
    std::fs::create_dir_all(layouts_dir)?;
    let path = layouts_dir.join("index.json");
    let body = serde_json::to_string_pretty(entries)?;
    std::fs::write(path, body)?;
    Ok(())
}

/// Read the opaque descriptor blob for `name`. The core does not interpret
/// its contents.
pub fn read_descriptor(layouts_dir: &Path, name: &str) -> Result<String, BridgeError> {
    let path = descriptor_path(layouts_dir, name);
    std::fs::read_to_string(path).map_err(|_| BridgeError::NotFound)
}

pub fn write_descriptor(layouts_dir: &Path, name: &str, body: &str) -> Result<(), BridgeError> {
    std::fs::create_dir_all(layouts_dir).map_err(|_| BridgeError::Internal)?;
    let path = descriptor_path(layouts_dir, name);
    std::fs::write(path, body).map_err(|_| BridgeError::Internal)
}

pub fn delete_descriptor(layouts_dir: &Path, name: &str) -> Result<(), BridgeError> {
    let path = descriptor_path(layouts_dir, name);
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BridgeError::NotFound),
        Err(_) => Err(BridgeError::Internal),
    }
}

fn descriptor_path(layouts_dir: &Path, name: &str) -> PathBuf {
    layouts_dir.join(format!("{name}.json"))
}

/// Upsert the retained-set entry for `name` from the `PUT` request headers.
/// `target.trim().is_empty()` unsets the target; empty `topics` unsets
/// the filter.
pub fn upsert_entry(
    mut entries: Vec<RetainedEntry>,
    name: &str,
    target: Option<&str>,
    retention: Option<bool>,
    topics: Option<&str>,
) -> Vec<RetainedEntry> {
    let now = Utc::now();
    let existing = entries.iter_mut().find(|e| e.name == name);
    match existing {
        Some(entry) => {
            if let Some(target) = target {
                let trimmed = target.trim();
                entry.target = if trimmed.is_empty() { None } else { Some(trimmed.to_owned()) };
            }
            if let Some(retention) = retention {
                entry.retention = retention;
            }
            if let Some(topics) = topics {
                entry.topics = split_topics(topics);
            }
            entry.updated_at = now;
        }
        None => {
            let mut entry = RetainedEntry::new(name.to_owned(), now);
            if let Some(target) = target {
                let trimmed = target.trim();
                entry.target = if trimmed.is_empty() { None } else { Some(trimmed.to_owned()) };
            }
            entry.retention = retention.unwrap_or(false);
            if let Some(topics) = topics {
                entry.topics = split_topics(topics);
            }
            entries.push(entry);
        }
    }
    entries
}

fn split_topics(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned).collect()
}

pub fn remove_entry(mut entries: Vec<RetainedEntry>, name: &str) -> Vec<RetainedEntry> {
    entries.retain(|e| e.name != name);
    entries
}

/// Flip the `retention` flag for `name`. Returns `NotFound` when the
/// descriptor is absent from the index.
pub fn set_retention(
    mut entries: Vec<RetainedEntry>,
    name: &str,
    enabled: bool,
) -> Result<Vec<RetainedEntry>, BridgeError> {
    let Some(entry) = entries.iter_mut().find(|e| e.name == name) else {
        return Err(BridgeError::NotFound);
    };
    entry.retention = enabled;
    entry.updated_at = Utc::now();
    Ok(entries)
}

#[cfg(test)]
#[path = "layouts_tests.rs"]
mod tests;
