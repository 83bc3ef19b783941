// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the bridge process.
#[derive(Debug, Clone, clap::Parser)]
pub struct BridgeConfig {
    /// Host to bind on.
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8080, env = "PORT")]
    pub port: u16,

    /// Root directory for layout descriptors and the retained-set index.
    #[arg(long, env = "LAYOUTS_DIR")]
    pub layouts_dir: Option<PathBuf>,

    /// Root directory for per-target recorded segments.
    #[arg(long, env = "DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Ring buffer history window, parsed as `<int><s|m|h|d|w>`.
    #[arg(long, default_value = "15m", env = "HISTORY_LOOKBACK")]
    pub history_lookback: String,

    /// Segment retention horizon in days.
    #[arg(long, default_value_t = 7, env = "RETENTION_DAYS")]
    pub retention_days: u64,

    /// Retention sweep period in milliseconds.
    #[arg(long, default_value_t = 360_000, env = "RETENTION_SWEEP_MS")]
    pub retention_sweep_ms: u64,
}

impl BridgeConfig {
    /// Resolved layouts directory, falling back to the documented
    /// default-or-cwd convention when the preferred path is unwritable.
    pub fn layouts_dir(&self) -> PathBuf {
        self.layouts_dir.clone().unwrap_or_else(|| resolve_default("/foxglove/layouts"))
    }

    /// Resolved segment data directory, same fallback convention.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| resolve_default("/foxglove/data"))
    }

    pub fn max_ring_age(&self) -> Duration {
        parse_duration(&self.history_lookback).unwrap_or(Duration::from_secs(15 * 60))
    }

    pub fn retention_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.retention_sweep_ms)
    }
}

/// Fall back to the current working directory joined with the preferred
/// path's basename if the preferred absolute path cannot be created.
fn resolve_default(preferred: &str) -> PathBuf {
    let preferred_path = PathBuf::from(preferred);
    if preferred_path.exists() || std::fs::create_dir_all(&preferred_path).is_ok() {
        return preferred_path;
    }
    let basename = preferred_path.file_name().unwrap_or_default();
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")).join(basename)
}

/// Parse a `<int><s|m|h|d|w>` duration string (e.g. `"15m"`, `"1h"`).
///
/// Returns `None` on empty or malformed input; callers substitute a default.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (digits, unit) = s.split_at(s.len() - 1);
    let n: u64 = digits.parse().ok()?;
    let secs = match unit {
        "s" => n,
        "m" => n * 60,
        "h" => n * 3600,
        "d" => n * 86_400,
        "w" => n * 7 * 86_400,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
