/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Requests accepted by a running scheduler.
//!
//! | Request | Applied |
//! |---|---|
//! | `enable` / `disable` / `enable_group` / `disable_group` | queued, applied at the time-sync slot |
//! | `enable_major_frame_sync` | immediately, re-accepts the tone after a noisy episode |
//! | `enable_processing` / `disable_processing` | immediately, nesting |
//! | `reset_counters` | immediately |
//!
//! A [`CommandScript`] replays requests at fixed offsets from start-up.
//!
//! ```yaml
//! steps:
//!   - after_ms: 2000
//!     request: { op: enable, slot: 75, entry: 0 }
//!   - after_ms: 5000
//!     request: { op: disable_processing }
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, info};

use crate::commands::TableCommand;
use crate::table::GroupData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlRequest {
    Enable { slot: u16, entry: u16 },
    Disable { slot: u16, entry: u16 },
    EnableGroup { group_data: GroupData },
    DisableGroup { group_data: GroupData },
    EnableMajorFrameSync,
    EnableProcessing,
    DisableProcessing,
    ResetCounters,
}

impl ControlRequest {
    /// The deferred form of a table request; `None` for immediate ones.
    pub fn table_command(self) -> Option<TableCommand> {
        match self {
            Self::Enable { slot, entry } => Some(TableCommand::Enable { slot, entry }),
            Self::Disable { slot, entry } => Some(TableCommand::Disable { slot, entry }),
            Self::EnableGroup { group_data } => Some(TableCommand::EnableGroup(group_data)),
            Self::DisableGroup { group_data } => Some(TableCommand::DisableGroup(group_data)),
            Self::EnableMajorFrameSync
            | Self::EnableProcessing
            | Self::DisableProcessing
            | Self::ResetCounters => None,
        }
    }
}

// ── RuntimeHandle ─────────────────────────────────────────────────────────────

/// Sends [`ControlRequest`]s to a running scheduler; cheap to clone.
#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    tx: mpsc::UnboundedSender<ControlRequest>,
}

impl RuntimeHandle {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<ControlRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// # Errors
    /// The scheduler has already stopped.
    pub fn send(&self, request: ControlRequest) -> Result<()> {
        self.tx
            .send(request)
            .map_err(|_| anyhow!("Scheduler is no longer running"))
    }
}

// ── CommandScript ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptStep {
    /// Offset from the start of playback.
    pub after_ms: u64,
    pub request: ControlRequest,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CommandScript {
    #[serde(default)]
    pub steps: Vec<ScriptStep>,
}

impl CommandScript {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading command script from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open command script: {}", path.display()))?;

        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))
    }
}

/// Sends each step at its offset.  Steps are taken in file order; an offset
/// already in the past fires at once.  Returns early if the scheduler stops.
pub async fn play_script(handle: RuntimeHandle, script: CommandScript) {
    let start = Instant::now();
    for step in script.steps {
        time::sleep_until(start + Duration::from_millis(step.after_ms)).await;
        debug!(after_ms = step.after_ms, request = ?step.request, "Script step");
        if handle.send(step.request).is_err() {
            return;
        }
    }
    info!("Command script finished");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
