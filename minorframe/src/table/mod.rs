/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Schedule and message tables, and the store that owns the active pair.
//!
//! # Layout
//!
//! The schedule table is a flat sequence of `total_slots * entries_per_slot`
//! [`ScheduleEntry`] values in (slot, entry-within-slot) order, so the slot of
//! position `i` is `i / entries_per_slot`.  The message table holds
//! `max_messages` pre-serialised [`MessageEntry`] buffers; index 0 is never
//! referenced by a valid schedule entry.
//!
//! # Write access
//!
//! Once a table pair is active, [`TableStore`] only allows the limited writes
//! the command layer needs: toggling an entry between Enabled and Disabled,
//! either individually or by group.  Whole-table replacement goes through
//! [`TableStore::activate_schedule`] / [`TableStore::activate_messages`], which
//! run the validators first and leave the active table untouched on failure.

pub mod image;
pub mod validate;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::SchedulerConfig;
use crate::events::{Event, EventSink};

use validate::{validate_message_table, validate_schedule_table};

/// Raw value of every field of an unused entry.
pub const UNUSED: u16 = 0;

// ── EnableState ───────────────────────────────────────────────────────────────

/// Whether an entry participates in scheduling.
///
/// Stored as the raw byte so that a corrupted value survives a round trip
/// through the table image and can be reported by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(from = "u8", into = "u8")]
pub enum EnableState {
    #[default]
    Unused,
    Enabled,
    Disabled,
    Invalid(u8),
}

impl From<u8> for EnableState {
    fn from(raw: u8) -> Self {
        match raw {
            0 => EnableState::Unused,
            1 => EnableState::Enabled,
            2 => EnableState::Disabled,
            other => EnableState::Invalid(other),
        }
    }
}

impl From<EnableState> for u8 {
    fn from(state: EnableState) -> Self {
        match state {
            EnableState::Unused => 0,
            EnableState::Enabled => 1,
            EnableState::Disabled => 2,
            EnableState::Invalid(raw) => raw,
        }
    }
}

impl EnableState {
    /// `true` for the two states the command layer may toggle between.
    pub fn is_used(self) -> bool {
        matches!(self, EnableState::Enabled | EnableState::Disabled)
    }
}

// ── ActivityType ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(from = "u8", into = "u8")]
pub enum ActivityType {
    #[default]
    None,
    SendMessage,
    /// Not yet defined; always rejected.
    Reserved(u8),
}

impl From<u8> for ActivityType {
    fn from(raw: u8) -> Self {
        match raw {
            0 => ActivityType::None,
            1 => ActivityType::SendMessage,
            other => ActivityType::Reserved(other),
        }
    }
}

impl From<ActivityType> for u8 {
    fn from(kind: ActivityType) -> Self {
        match kind {
            ActivityType::None => 0,
            ActivityType::SendMessage => 1,
            ActivityType::Reserved(raw) => raw,
        }
    }
}

// ── GroupData ─────────────────────────────────────────────────────────────────

/// Group membership of a schedule entry.
///
/// ```text
///  31      24 23                         0
/// ┌──────────┬────────────────────────────┐
/// │ group no │  multi-group membership    │
/// └──────────┴────────────────────────────┘
/// ```
/// An entry matches a group command if the group numbers are equal (and
/// non-zero), or if the multi-group masks share at least one bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(transparent)]
pub struct GroupData(pub u32);

impl GroupData {
    pub const GROUP_NUMBER_MASK: u32 = 0xFF00_0000;
    pub const MULTI_GROUP_MASK: u32 = 0x00FF_FFFF;

    /// Builds a selector from a group number and a multi-group mask.
    pub fn new(group_number: u8, multi_group: u32) -> Self {
        Self((u32::from(group_number) << 24) | (multi_group & Self::MULTI_GROUP_MASK))
    }

    pub fn group_number(self) -> u8 {
        ((self.0 & Self::GROUP_NUMBER_MASK) >> 24) as u8
    }

    pub fn multi_group(self) -> u32 {
        self.0 & Self::MULTI_GROUP_MASK
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Does an entry carrying `self` belong to the selection `selector`?
    pub fn matches(self, selector: GroupData) -> bool {
        if self.is_empty() {
            return false;
        }
        let number = selector.group_number();
        (number != 0 && number == self.group_number())
            || (selector.multi_group() & self.multi_group()) != 0
    }
}

// ── ScheduleEntry ─────────────────────────────────────────────────────────────

/// One activity entry.  Fields are kept raw; structural validity is the
/// validator's concern, not the type's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct ScheduleEntry {
    pub enable_state: EnableState,
    pub activity_type: ActivityType,
    /// Period in table passes.
    pub frequency: u16,
    /// Phase offset within the period; `< frequency`.
    pub remainder: u16,
    pub message_index: u16,
    pub group_data: GroupData,
}

impl ScheduleEntry {
    pub const UNUSED: ScheduleEntry = ScheduleEntry {
        enable_state: EnableState::Unused,
        activity_type: ActivityType::None,
        frequency: UNUSED,
        remainder: UNUSED,
        message_index: UNUSED,
        group_data: GroupData(0),
    };

    /// Convenience constructor for an enabled send-message entry.
    pub fn send_message(message_index: u16, frequency: u16, remainder: u16) -> Self {
        Self {
            enable_state: EnableState::Enabled,
            activity_type: ActivityType::SendMessage,
            frequency,
            remainder,
            message_index,
            group_data: GroupData::default(),
        }
    }
}

// ── MessageEntry ──────────────────────────────────────────────────────────────

/// A pre-serialised message buffer of `max_msg_words` 16-bit words.
///
/// Word 0 carries the message id, word 2 the CCSDS length field
/// (total length in bytes minus 7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEntry {
    words: Vec<u16>,
}

impl MessageEntry {
    /// An unused entry: the unused message id followed by zeros.
    pub fn unused(config: &SchedulerConfig) -> Self {
        let mut words = vec![UNUSED; usize::from(config.max_msg_words)];
        if let Some(first) = words.first_mut() {
            *first = config.unused_msg_id();
        }
        Self { words }
    }

    /// Wraps `words`, zero-padding to the configured buffer size.
    ///
    /// Returns `None` if `words` does not fit.
    pub fn from_words(words: &[u16], config: &SchedulerConfig) -> Option<Self> {
        let size = usize::from(config.max_msg_words);
        if words.len() > size {
            return None;
        }
        let mut buffer = vec![UNUSED; size];
        buffer[..words.len()].copy_from_slice(words);
        Some(Self { words: buffer })
    }

    /// Builds a header-only command with the given id and total byte length.
    pub fn with_header(message_id: u16, total_length_bytes: u16, config: &SchedulerConfig) -> Option<Self> {
        let length_field = total_length_bytes.checked_sub(7)?;
        Self::from_words(&[message_id, 0, length_field], config)
    }

    pub fn message_id(&self) -> u16 {
        self.words.first().copied().unwrap_or(UNUSED)
    }

    /// Total message length in bytes, as encoded in the header.
    pub fn total_length_bytes(&self) -> u32 {
        u32::from(self.words.get(2).copied().unwrap_or(UNUSED)) + 7
    }

    /// The words actually put on the bus.
    pub fn as_words(&self) -> &[u16] {
        let len = (self.total_length_bytes() / 2) as usize;
        &self.words[..len.min(self.words.len())]
    }

    /// The full buffer, including trailing padding.
    pub fn buffer(&self) -> &[u16] {
        &self.words
    }
}

// ── Tables ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleTable {
    entries: Vec<ScheduleEntry>,
}

impl ScheduleTable {
    /// A table of the configured size with every entry unused.
    pub fn unused(config: &SchedulerConfig) -> Self {
        Self {
            entries: vec![ScheduleEntry::UNUSED; config.table_entries()],
        }
    }

    pub fn from_entries(entries: Vec<ScheduleEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [ScheduleEntry] {
        &mut self.entries
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTable {
    entries: Vec<MessageEntry>,
}

impl MessageTable {
    pub fn unused(config: &SchedulerConfig) -> Self {
        Self {
            entries: vec![MessageEntry::unused(config); usize::from(config.max_messages)],
        }
    }

    pub fn from_entries(entries: Vec<MessageEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[MessageEntry] {
        &self.entries
    }

    pub fn get(&self, index: u16) -> Option<&MessageEntry> {
        self.entries.get(usize::from(index))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [MessageEntry] {
        &mut self.entries
    }
}

// ── TableError ────────────────────────────────────────────────────────────────

/// Rejection of a table activation or of a limited-write command.
///
/// Never fatal: the active tables are left exactly as they were.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("{table} table has {actual} entries, expected {expected}")]
    WrongSize {
        table: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("schedule table rejected: first error at index {index}")]
    ScheduleRejected { index: usize },

    #[error("message table rejected: first error at index {index}")]
    MessageRejected { index: usize },

    #[error("invalid argument: slot={slot} (<{total_slots}), entry={entry} (<{entries_per_slot})")]
    EntryOutOfRange {
        slot: u16,
        entry: u16,
        total_slots: u16,
        entries_per_slot: u16,
    },

    #[error("entry at slot {slot}, entry {entry} has state {state:?} and cannot be toggled")]
    NotToggleable {
        slot: u16,
        entry: u16,
        state: EnableState,
    },

    #[error("target state must be Enabled or Disabled, got {0:?}")]
    InvalidTargetState(EnableState),

    #[error("no groups selected")]
    NoGroupSelected,

    #[error("neither group {group_number} nor multi-group {multi_group:#08X} found")]
    GroupNotFound { group_number: u8, multi_group: u32 },
}

// ── TableStore ────────────────────────────────────────────────────────────────

/// Table verification statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCounters {
    pub verify_success: u32,
    pub verify_failure: u32,
}

/// Owner of the active schedule and message tables.
pub struct TableStore {
    config: Arc<SchedulerConfig>,
    schedule: ScheduleTable,
    messages: MessageTable,
    modified: bool,
    counters: TableCounters,
}

impl TableStore {
    /// A store whose tables are entirely unused; nothing is dispatched until
    /// a real image is activated.
    pub fn new(config: Arc<SchedulerConfig>) -> Self {
        let schedule = ScheduleTable::unused(&config);
        let messages = MessageTable::unused(&config);
        Self {
            config,
            schedule,
            messages,
            modified: false,
            counters: TableCounters::default(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn schedule(&self) -> &ScheduleTable {
        &self.schedule
    }

    pub fn messages(&self) -> &MessageTable {
        &self.messages
    }

    pub fn counters(&self) -> TableCounters {
        self.counters
    }

    pub fn reset_counters(&mut self) {
        self.counters = TableCounters::default();
    }

    /// Flat index of `(slot, entry)`.
    pub fn index_of(&self, slot: u16, entry: u16) -> usize {
        usize::from(slot) * usize::from(self.config.entries_per_slot) + usize::from(entry)
    }

    pub fn schedule_entry(&self, slot: u16, entry: u16) -> Option<&ScheduleEntry> {
        self.schedule.entries().get(self.index_of(slot, entry))
    }

    // ── Activation ────────────────────────────────────────────────────────────

    /// Validates `candidate` and, if clean, makes it the active schedule.
    ///
    /// # Errors
    /// [`TableError::WrongSize`] or [`TableError::ScheduleRejected`]; the
    /// active schedule is unchanged in both cases.
    pub fn activate_schedule(
        &mut self,
        candidate: ScheduleTable,
        events: &mut dyn EventSink,
    ) -> Result<(), TableError> {
        let expected = self.config.table_entries();
        if candidate.len() != expected {
            return Err(TableError::WrongSize {
                table: "schedule",
                expected,
                actual: candidate.len(),
            });
        }

        let result = validate_schedule_table(candidate.entries(), &self.config);
        if let Some(first) = result.first_error {
            events.send(Event::ScheduleTableVerifyError {
                index: first.index,
                fault: first.fault,
            });
        }
        events.send(Event::ScheduleTableVerified {
            good: result.good,
            bad: result.bad,
            unused: result.unused,
        });

        match result.first_error {
            Some(first) => {
                self.counters.verify_failure += 1;
                Err(TableError::ScheduleRejected { index: first.index })
            }
            None => {
                self.counters.verify_success += 1;
                self.schedule = candidate;
                debug!(good = result.good, unused = result.unused, "Schedule table activated");
                Ok(())
            }
        }
    }

    /// Validates `candidate` and, if clean, makes it the active message table.
    pub fn activate_messages(
        &mut self,
        candidate: MessageTable,
        events: &mut dyn EventSink,
    ) -> Result<(), TableError> {
        let expected = usize::from(self.config.max_messages);
        if candidate.len() != expected {
            return Err(TableError::WrongSize {
                table: "message",
                expected,
                actual: candidate.len(),
            });
        }

        let result = validate_message_table(candidate.entries(), &self.config);
        if let Some(first) = result.first_error {
            events.send(Event::MessageTableVerifyError {
                index: first.index,
                fault: first.fault,
            });
        }
        events.send(Event::MessageTableVerified {
            good: result.good,
            bad: result.bad,
            unused: result.unused,
        });

        match result.first_error {
            Some(first) => {
                self.counters.verify_failure += 1;
                Err(TableError::MessageRejected { index: first.index })
            }
            None => {
                self.counters.verify_success += 1;
                self.messages = candidate;
                debug!(good = result.good, unused = result.unused, "Message table activated");
                Ok(())
            }
        }
    }

    // ── Limited writes ────────────────────────────────────────────────────────

    /// Toggles one entry between Enabled and Disabled.
    pub fn set_enable_state(
        &mut self,
        slot: u16,
        entry: u16,
        state: EnableState,
    ) -> Result<(), TableError> {
        if !state.is_used() {
            return Err(TableError::InvalidTargetState(state));
        }
        if slot >= self.config.total_slots || entry >= self.config.entries_per_slot {
            return Err(TableError::EntryOutOfRange {
                slot,
                entry,
                total_slots: self.config.total_slots,
                entries_per_slot: self.config.entries_per_slot,
            });
        }

        let index = self.index_of(slot, entry);
        let target = &mut self.schedule.entries_mut()[index];
        if !target.enable_state.is_used() {
            return Err(TableError::NotToggleable {
                slot,
                entry,
                state: target.enable_state,
            });
        }

        target.enable_state = state;
        self.mark_modified();
        debug!(slot, entry, ?state, "Schedule entry state changed");
        Ok(())
    }

    /// Sets every used entry matching `selector` to `state`.
    ///
    /// Returns the number of entries matched.
    pub fn set_group_state(
        &mut self,
        selector: GroupData,
        state: EnableState,
    ) -> Result<usize, TableError> {
        if !state.is_used() {
            return Err(TableError::InvalidTargetState(state));
        }
        if selector.group_number() == 0 && selector.multi_group() == 0 {
            return Err(TableError::NoGroupSelected);
        }

        let mut matched = 0;
        for entry in self.schedule.entries_mut() {
            if entry.enable_state.is_used() && entry.group_data.matches(selector) {
                entry.enable_state = state;
                matched += 1;
            }
        }

        if matched == 0 {
            return Err(TableError::GroupNotFound {
                group_number: selector.group_number(),
                multi_group: selector.multi_group(),
            });
        }

        self.mark_modified();
        debug!(matched, ?state, "Group state changed");
        Ok(matched)
    }

    /// Disables an entry found corrupt at dispatch time.
    pub(crate) fn disable_corrupt_entry(&mut self, slot: u16, entry: u16) {
        let index = self.index_of(slot, entry);
        match self.schedule.entries_mut().get_mut(index) {
            Some(target) => {
                target.enable_state = EnableState::Disabled;
                self.mark_modified();
            }
            None => warn!(slot, entry, "Corrupt entry outside the schedule table"),
        }
    }

    // ── Modified flag ─────────────────────────────────────────────────────────

    pub fn mark_modified(&mut self) {
        self.modified = true;
    }

    /// Has the active schedule changed since the last [`take_modified`](Self::take_modified)?
    pub fn table_modified(&self) -> bool {
        self.modified
    }

    /// Returns and clears the modified flag.
    pub fn take_modified(&mut self) -> bool {
        std::mem::take(&mut self.modified)
    }

    /// Overwrites raw entries without validation.  Test hook for simulating
    /// in-memory corruption.
    #[cfg(test)]
    pub(crate) fn poke_schedule_entry(&mut self, slot: u16, entry: u16, value: ScheduleEntry) {
        let index = self.index_of(slot, entry);
        self.schedule.entries_mut()[index] = value;
    }

    #[cfg(test)]
    pub(crate) fn poke_message(&mut self, index: u16, value: MessageEntry) {
        self.messages.entries_mut()[usize::from(index)] = value;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
