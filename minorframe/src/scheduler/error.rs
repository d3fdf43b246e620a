/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Structured error types for the slot scheduler.
//!
//! Three error enums model the three failure layers:
//!
//! * [`BusError`]: a single message could not be delivered.  Counted and
//!   reported, never propagated; the remaining entries in the slot still run.
//! * [`CommandError`]: the deferred-command collaborator itself failed.
//! * [`SchedulerError`]: the only error that leaves
//!   [`SlotScheduler::process_schedule_table()`](super::SlotScheduler::process_schedule_table).
//!   The caller must treat it as fatal for the scheduling task.
//!
//! Timing anomalies (same slot, multiple slots, skipped slots, noisy tone) and
//! runtime table corruption are **not** errors: they are expected operating
//! conditions on imperfect hardware and surface as counters and events.

use thiserror::Error;

// ── Downstream delivery ───────────────────────────────────────────────────────

/// Why the message bus refused a scheduled message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// Nobody listens for this message id.
    #[error("no subscribers for message id {message_id:#06X}")]
    NoSubscribers { message_id: u16 },

    /// A subscriber's queue is full; the message was dropped.
    #[error("receive queue full for message id {message_id:#06X}")]
    QueueFull { message_id: u16 },

    /// The buffer is shorter than its own header claims.
    #[error("message buffer of {words} words is truncated")]
    Truncated { words: usize },
}

// ── Deferred commands ─────────────────────────────────────────────────────────

/// Failure of the deferred-command collaborator as a whole.
///
/// An individual rejected command (bad slot number, no group match) is *not*
/// a `CommandError`; the collaborator counts it and moves on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The command source can no longer be read.
    #[error("command source failed: {0}")]
    SourceFailed(String),
}

// ── Top-level scheduler errors ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// Processing deferred commands at the time-sync slot failed.  Remaining
    /// slots for this wakeup were not executed.
    #[error("deferred command processing failed: {0}")]
    DeferredCommands(#[from] CommandError),
}
