/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Deferred table commands.
//!
//! Commands that change enable states may be *issued* at any time but are
//! only *applied* when the scheduler reaches the time-sync slot (or skips
//! over it).  That keeps a group enable/disable from taking effect halfway
//! through a pass.
//!
//! Ground-command parsing is out of scope; producers push already-decoded
//! [`TableCommand`]s through a [`CommandSender`].

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, warn};

use crate::scheduler::CommandError;
use crate::table::{EnableState, GroupData, TableStore};

/// Collaborator invoked at the time-sync slot.
pub trait DeferredCommands {
    /// Applies every command received since the last call.
    ///
    /// # Errors
    /// Only if the command source itself is broken.  A single rejected
    /// command is not an error.
    fn process_pending(&mut self, tables: &mut TableStore) -> Result<(), CommandError>;

    fn counters(&self) -> CommandCounters {
        CommandCounters::default()
    }

    fn reset_counters(&mut self) {}
}

/// Command source that never has anything to do.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCommands;

impl DeferredCommands for NoCommands {
    fn process_pending(&mut self, _tables: &mut TableStore) -> Result<(), CommandError> {
        Ok(())
    }
}

// ── TableCommand ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum TableCommand {
    Enable { slot: u16, entry: u16 },
    Disable { slot: u16, entry: u16 },
    EnableGroup(GroupData),
    DisableGroup(GroupData),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommandCounters {
    pub command_count: u32,
    pub command_error_count: u32,
}

// ── CommandQueue ──────────────────────────────────────────────────────────────

/// Producer handle; cheap to clone.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<TableCommand>,
}

impl CommandSender {
    /// Queues `command` for the next time-sync slot.
    pub fn send(&self, command: TableCommand) -> Result<(), CommandError> {
        self.tx
            .send(command)
            .map_err(|_| CommandError::SourceFailed("command queue closed".to_string()))
    }
}

/// Channel-backed [`DeferredCommands`] implementation.
///
/// The queue is considered broken once every [`CommandSender`] is gone,
/// mirroring a command pipe that can no longer be read.
#[derive(Debug)]
pub struct CommandQueue {
    rx: mpsc::UnboundedReceiver<TableCommand>,
    counters: CommandCounters,
}

impl CommandQueue {
    pub fn new() -> (CommandSender, CommandQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            CommandSender { tx },
            CommandQueue {
                rx,
                counters: CommandCounters::default(),
            },
        )
    }

    fn apply(&mut self, command: TableCommand, tables: &mut TableStore) {
        let result = match command {
            TableCommand::Enable { slot, entry } => {
                tables.set_enable_state(slot, entry, EnableState::Enabled)
            }
            TableCommand::Disable { slot, entry } => {
                tables.set_enable_state(slot, entry, EnableState::Disabled)
            }
            TableCommand::EnableGroup(group) => tables
                .set_group_state(group, EnableState::Enabled)
                .map(|matched| debug!(matched, "ENABLE GROUP applied")),
            TableCommand::DisableGroup(group) => tables
                .set_group_state(group, EnableState::Disabled)
                .map(|matched| debug!(matched, "DISABLE GROUP applied")),
        };

        match result {
            Ok(()) => self.counters.command_count += 1,
            Err(e) => {
                self.counters.command_error_count += 1;
                warn!(?command, "Table command rejected: {}", e);
            }
        }
    }
}

impl DeferredCommands for CommandQueue {
    fn process_pending(&mut self, tables: &mut TableStore) -> Result<(), CommandError> {
        loop {
            match self.rx.try_recv() {
                Ok(command) => self.apply(command, tables),
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => {
                    return Err(CommandError::SourceFailed(
                        "all command senders dropped".to_string(),
                    ))
                }
            }
        }
    }

    fn counters(&self) -> CommandCounters {
        self.counters
    }

    fn reset_counters(&mut self) {
        self.counters = CommandCounters::default();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
