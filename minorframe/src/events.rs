/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Named diagnostic events.
//!
//! The scheduling core never logs directly.  Every reportable condition is
//! an [`Event`] handed to an [`EventSink`]; what happens next (tracing,
//! filtering, forwarding to a ground link) is the sink's business.
//!
//! | Event | Severity | Binary filter in [`TracingEventSink`] |
//! |---|---|---|
//! | `SameSlot` | Debug | first one |
//! | `MultipleSlots` | Info | first one |
//! | `SkippedSlots` | Error | first one |
//! | `CorruptEntryLocation` / `CorruptEntryFields` | Error | first two |
//! | `ActivitySendFailed` | Error | first one |
//! | `NoisyMajorFrame` | Error | none |
//! | table verify error / result | Error / Debug | none |
//! | `SchedulerStopped` | Critical | none |

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, error, info};

use crate::scheduler::BusError;
use crate::table::validate::{MessageEntryFault, ScheduleEntryFault};

// ── Event ─────────────────────────────────────────────────────────────────────

/// How loudly an event should be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Error,
    Critical,
}

/// Filter key.  Both corruption events share one id so a single corrupt
/// entry produces exactly one filter "hit pair".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventId {
    SameSlot,
    MultipleSlots,
    SkippedSlots,
    Corruption,
    PacketSend,
    NoisyMajorFrame,
    ScheduleTableError,
    ScheduleTableResult,
    MessageTableError,
    MessageTableResult,
    SchedulerStopped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The slot counter did not advance since the previous wakeup.
    SameSlot { slot: u16 },

    /// More than one slot was executed in a single wakeup.
    MultipleSlots { slot: u16, count: u32 },

    /// The scheduler fell too far behind and jumped ahead.
    /// `count` is the number of slots that were never executed.
    SkippedSlots { slot: u16, count: u32 },

    CorruptEntryLocation { slot: u16, entry: u16 },

    CorruptEntryFields {
        message_index: u16,
        frequency: u16,
        activity_type: u8,
        remainder: u16,
    },

    ActivitySendFailed {
        slot: u16,
        entry: u16,
        error: BusError,
    },

    /// The tone has been distrusted; reported once per episode.
    NoisyMajorFrame { minor_frames_since_tone: u16 },

    ScheduleTableVerifyError {
        index: usize,
        fault: ScheduleEntryFault,
    },

    ScheduleTableVerified { good: u32, bad: u32, unused: u32 },

    MessageTableVerifyError {
        index: usize,
        fault: MessageEntryFault,
    },

    MessageTableVerified { good: u32, bad: u32, unused: u32 },

    /// Slot processing hit a fatal error and will not resume.
    SchedulerStopped { reason: String },
}

impl Event {
    pub fn id(&self) -> EventId {
        match self {
            Event::SameSlot { .. } => EventId::SameSlot,
            Event::MultipleSlots { .. } => EventId::MultipleSlots,
            Event::SkippedSlots { .. } => EventId::SkippedSlots,
            Event::CorruptEntryLocation { .. } | Event::CorruptEntryFields { .. } => {
                EventId::Corruption
            }
            Event::ActivitySendFailed { .. } => EventId::PacketSend,
            Event::NoisyMajorFrame { .. } => EventId::NoisyMajorFrame,
            Event::ScheduleTableVerifyError { .. } => EventId::ScheduleTableError,
            Event::ScheduleTableVerified { .. } => EventId::ScheduleTableResult,
            Event::MessageTableVerifyError { .. } => EventId::MessageTableError,
            Event::MessageTableVerified { .. } => EventId::MessageTableResult,
            Event::SchedulerStopped { .. } => EventId::SchedulerStopped,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Event::SameSlot { .. }
            | Event::ScheduleTableVerified { .. }
            | Event::MessageTableVerified { .. } => Severity::Debug,
            Event::MultipleSlots { .. } => Severity::Info,
            Event::SchedulerStopped { .. } => Severity::Critical,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::SameSlot { slot } => write!(f, "slot did not increment: slot = {}", slot),

            Event::MultipleSlots { slot, count } => write!(
                f,
                "multiple slots processed: slot = {}, count = {}",
                slot, count
            ),

            Event::SkippedSlots { slot, count } => {
                write!(f, "slots skipped: slot = {}, count = {}", slot, count)
            }

            Event::CorruptEntryLocation { slot, entry } => write!(
                f,
                "corrupt data error (1): slot = {}, entry = {}",
                slot, entry
            ),

            Event::CorruptEntryFields {
                message_index,
                frequency,
                activity_type,
                remainder,
            } => write!(
                f,
                "corrupt data error (2): msg = {}, freq = {}, type = {}, rem = {}",
                message_index, frequency, activity_type, remainder
            ),

            Event::ActivitySendFailed { slot, entry, error } => write!(
                f,
                "activity error: slot = {}, entry = {}, err = {}",
                slot, entry, error
            ),

            Event::NoisyMajorFrame {
                minor_frames_since_tone,
            } => write!(
                f,
                "major frame sync too noisy (slot {}); disabling synchronization",
                minor_frames_since_tone
            ),

            Event::ScheduleTableVerifyError { index, fault } => {
                write!(f, "schedule table verify error: idx[{}] {}", index, fault)
            }

            Event::ScheduleTableVerified { good, bad, unused } => write!(
                f,
                "schedule table verify results: good[{}] bad[{}] unused[{}]",
                good, bad, unused
            ),

            Event::MessageTableVerifyError { index, fault } => {
                write!(f, "message table verify error: idx[{}] {}", index, fault)
            }

            Event::MessageTableVerified { good, bad, unused } => write!(
                f,
                "message table verify results: good[{}] bad[{}] unused[{}]",
                good, bad, unused
            ),

            Event::SchedulerStopped { reason } => {
                write!(f, "scheduler terminating, err = {}", reason)
            }
        }
    }
}

// ── EventSink ─────────────────────────────────────────────────────────────────

/// Receiver of diagnostic events.
pub trait EventSink {
    fn send(&mut self, event: Event);
}

/// Collects every event; handy for inspection and for batch forwarding.
impl EventSink for Vec<Event> {
    fn send(&mut self, event: Event) {
        self.push(event);
    }
}

// ── TracingEventSink ──────────────────────────────────────────────────────────

/// Production sink: maps events onto `tracing` and applies binary filters.
///
/// A filtered id is reported until its limit is reached and then silently
/// counted, until [`reset_filters`](Self::reset_filters) re-opens it.
/// The binary resets the filters after every housekeeping snapshot.
#[derive(Debug, Default)]
pub struct TracingEventSink {
    reported: BTreeMap<EventId, u32>,
    suppressed: u64,
}

impl TracingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum reports per id between resets, `None` for unfiltered ids.
    pub fn filter_limit(id: EventId) -> Option<u32> {
        match id {
            EventId::SameSlot
            | EventId::MultipleSlots
            | EventId::SkippedSlots
            | EventId::PacketSend => Some(1),
            EventId::Corruption => Some(2),
            _ => None,
        }
    }

    pub fn reset_filters(&mut self) {
        self.reported.clear();
    }

    /// Events swallowed by a filter since construction.
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    /// Applies the filter; returns `true` if the event should be reported.
    fn admit(&mut self, id: EventId) -> bool {
        let Some(limit) = Self::filter_limit(id) else {
            return true;
        };
        let count = self.reported.entry(id).or_insert(0);
        if *count >= limit {
            self.suppressed += 1;
            return false;
        }
        *count += 1;
        true
    }
}

impl EventSink for TracingEventSink {
    fn send(&mut self, event: Event) {
        let id = event.id();
        if !self.admit(id) {
            return;
        }
        match event.severity() {
            Severity::Debug => debug!(event_id = ?id, "{}", event),
            Severity::Info => info!(event_id = ?id, "{}", event),
            Severity::Error | Severity::Critical => error!(event_id = ?id, "{}", event),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
