/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Pre-activation structural validation of candidate tables.
//!
//! Both validators are pure functions over a slice of entries: they never
//! touch the active tables and return the same result for the same input.
//! Every entry is classified as good, bad or unused; only the *first* bad
//! entry's fault is reported in detail.

use std::fmt;

use crate::config::SchedulerConfig;

use super::{ActivityType, EnableState, MessageEntry, ScheduleEntry, UNUSED};

// ── Result types ──────────────────────────────────────────────────────────────

/// Structural fault of one schedule entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleEntryFault {
    /// Unused entry with non-zero fields.
    Garbage,
    NoFrequency,
    BadRemainder { remainder: u16, frequency: u16 },
    BadActivity(u8),
    BadMessageIndex(u16),
    BadEnableState(u8),
}

impl fmt::Display for ScheduleEntryFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleEntryFault::Garbage => write!(f, "unused entry contains data"),
            ScheduleEntryFault::NoFrequency => write!(f, "used entry has no frequency"),
            ScheduleEntryFault::BadRemainder {
                remainder,
                frequency,
            } => write!(f, "remainder {} is not below frequency {}", remainder, frequency),
            ScheduleEntryFault::BadActivity(raw) => write!(f, "unknown activity type {}", raw),
            ScheduleEntryFault::BadMessageIndex(index) => {
                write!(f, "message index {} out of range", index)
            }
            ScheduleEntryFault::BadEnableState(raw) => write!(f, "bad enable state {}", raw),
        }
    }
}

/// Structural fault of one message entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageEntryFault {
    /// Unused message id followed by non-zero data at `word`.
    Garbage { word: usize },
    BadMessageId(u16),
    InvalidLength { message_id: u16, length: u32 },
}

impl fmt::Display for MessageEntryFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageEntryFault::Garbage { word } => {
                write!(f, "unused message contains data at word {}", word)
            }
            MessageEntryFault::BadMessageId(id) => write!(f, "mid[{:#X}] out of range", id),
            MessageEntryFault::InvalidLength { message_id, length } => {
                write!(f, "mid[{:#X}] invalid length {}", message_id, length)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirstError<F> {
    pub index: usize,
    pub fault: F,
}

/// Aggregate outcome of validating a whole table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationResult<F> {
    pub good: u32,
    pub bad: u32,
    pub unused: u32,
    pub first_error: Option<FirstError<F>>,
}

impl<F> ValidationResult<F> {
    fn new() -> Self {
        Self {
            good: 0,
            bad: 0,
            unused: 0,
            first_error: None,
        }
    }

    fn record_bad(&mut self, index: usize, fault: F) {
        self.bad += 1;
        if self.first_error.is_none() {
            self.first_error = Some(FirstError { index, fault });
        }
    }

    pub fn is_valid(&self) -> bool {
        self.first_error.is_none()
    }
}

// ── Schedule table ────────────────────────────────────────────────────────────

/// Checks a single schedule entry.  `Ok(true)` means used and good,
/// `Ok(false)` means unused.
fn check_schedule_entry(
    entry: &ScheduleEntry,
    config: &SchedulerConfig,
) -> Result<bool, ScheduleEntryFault> {
    match entry.enable_state {
        EnableState::Unused => {
            let clean = entry.frequency == UNUSED
                && entry.remainder == UNUSED
                && entry.group_data.is_empty()
                && entry.activity_type == ActivityType::None
                && entry.message_index == UNUSED;
            if clean {
                Ok(false)
            } else {
                Err(ScheduleEntryFault::Garbage)
            }
        }
        EnableState::Enabled | EnableState::Disabled => {
            if entry.frequency == UNUSED {
                Err(ScheduleEntryFault::NoFrequency)
            } else if entry.remainder >= entry.frequency {
                Err(ScheduleEntryFault::BadRemainder {
                    remainder: entry.remainder,
                    frequency: entry.frequency,
                })
            } else if entry.activity_type != ActivityType::SendMessage {
                Err(ScheduleEntryFault::BadActivity(entry.activity_type.into()))
            } else if entry.message_index == 0 || entry.message_index >= config.max_messages {
                Err(ScheduleEntryFault::BadMessageIndex(entry.message_index))
            } else {
                Ok(true)
            }
        }
        EnableState::Invalid(raw) => Err(ScheduleEntryFault::BadEnableState(raw)),
    }
}

pub fn validate_schedule_table(
    entries: &[ScheduleEntry],
    config: &SchedulerConfig,
) -> ValidationResult<ScheduleEntryFault> {
    let mut result = ValidationResult::new();
    for (index, entry) in entries.iter().enumerate() {
        match check_schedule_entry(entry, config) {
            Ok(true) => result.good += 1,
            Ok(false) => result.unused += 1,
            Err(fault) => result.record_bad(index, fault),
        }
    }
    result
}

// ── Message table ─────────────────────────────────────────────────────────────

fn check_message_entry(
    entry: &MessageEntry,
    config: &SchedulerConfig,
) -> Result<bool, MessageEntryFault> {
    let message_id = entry.message_id();

    if message_id == config.unused_msg_id() {
        // Everything after the id must be blank.
        return match entry
            .buffer()
            .iter()
            .skip(1)
            .position(|&word| word != UNUSED)
        {
            Some(offset) => Err(MessageEntryFault::Garbage { word: offset + 1 }),
            None => Ok(false),
        };
    }

    if message_id < config.min_msg_id || message_id > config.max_msg_id {
        return Err(MessageEntryFault::BadMessageId(message_id));
    }

    let length = entry.total_length_bytes();
    let min = u32::from(config.min_msg_words) * 2;
    let max = u32::from(config.max_msg_words) * 2;
    if length < min || length > max || length % 2 != 0 {
        return Err(MessageEntryFault::InvalidLength { message_id, length });
    }
    Ok(true)
}

pub fn validate_message_table(
    entries: &[MessageEntry],
    config: &SchedulerConfig,
) -> ValidationResult<MessageEntryFault> {
    let mut result = ValidationResult::new();
    for (index, entry) in entries.iter().enumerate() {
        match check_message_entry(entry, config) {
            Ok(true) => result.good += 1,
            Ok(false) => result.unused += 1,
            Err(fault) => result.record_bad(index, fault),
        }
    }
    result
}

// ── Tests ─────────────────────────────────────────────────────────────────────
