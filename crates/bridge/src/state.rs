// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide shared state handed to the control surface's axum router.

use std::path::PathBuf;
use std::sync::Arc;

use crate::registry::TargetRegistry;

/// Everything a control-surface handler needs: the layouts root (for the
/// descriptor store) and the running Target Registry.
pub struct AppState {
    pub layouts_dir: PathBuf,
    pub registry: Arc<TargetRegistry>,
}

impl AppState {
    pub fn new(layouts_dir: PathBuf, registry: Arc<TargetRegistry>) -> Arc<Self> {
        Arc::new(Self { layouts_dir, registry })
    }
}
