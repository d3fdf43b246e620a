/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Per-slot entry dispatch.
//!
//! [`EntryDispatcher::process_next_slot`] runs every Enabled entry of the slot
//! at `next_slot_number`, applies deferred commands when that slot is the
//! time-sync slot, then advances the slot counter.  Each entry is re-checked
//! for runtime corruption before anything is sent; a corrupt entry is
//! disabled and reported, never dispatched.

use std::sync::Arc;

use serde::Serialize;

use crate::bus::MessageBus;
use crate::commands::DeferredCommands;
use crate::config::SchedulerConfig;
use crate::events::{Event, EventSink};
use crate::table::{ActivityType, EnableState, TableStore};
use crate::timing::TimingState;

use super::SchedulerError;

/// Activity statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchCounters {
    pub activity_success_count: u32,
    pub activity_failure_count: u32,
    pub bad_table_data_count: u32,
}

pub struct EntryDispatcher<B> {
    config: Arc<SchedulerConfig>,
    bus: B,
    counters: DispatchCounters,
}

impl<B: MessageBus> EntryDispatcher<B> {
    pub fn new(config: Arc<SchedulerConfig>, bus: B) -> Self {
        Self {
            config,
            bus,
            counters: DispatchCounters::default(),
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn counters(&self) -> DispatchCounters {
        self.counters
    }

    pub fn reset_counters(&mut self) {
        self.counters = DispatchCounters::default();
    }

    /// Executes the slot at `timing.next_slot_number` and advances it.
    ///
    /// The slot counter advances even when deferred command processing
    /// fails; the failure is returned afterwards.
    pub fn process_next_slot(
        &mut self,
        timing: &mut TimingState,
        tables: &mut TableStore,
        commands: &mut dyn DeferredCommands,
        events: &mut dyn EventSink,
    ) -> Result<(), SchedulerError> {
        let slot = timing.next_slot_number;

        for entry in 0..self.config.entries_per_slot {
            let enabled = tables
                .schedule_entry(slot, entry)
                .is_some_and(|e| e.enable_state == EnableState::Enabled);
            if enabled {
                self.process_entry(timing, tables, events, slot, entry);
            }
        }

        let result = if slot == self.config.time_sync_slot() {
            commands.process_pending(tables).map_err(SchedulerError::from)
        } else {
            Ok(())
        };

        timing.next_slot_number += 1;
        if timing.next_slot_number == self.config.total_slots {
            timing.next_slot_number = 0;
            timing.table_pass_count = timing.table_pass_count.wrapping_add(1);
        }

        result
    }

    /// Dispatches one entry if it is due on the current pass.
    pub fn process_entry(
        &mut self,
        timing: &TimingState,
        tables: &mut TableStore,
        events: &mut dyn EventSink,
        slot: u16,
        entry_number: u16,
    ) {
        let Some(&entry) = tables.schedule_entry(slot, entry_number) else {
            return;
        };

        let corrupt = entry.message_index >= self.config.max_messages
            || tables.messages().get(entry.message_index).is_none()
            || entry.frequency == 0
            || entry.activity_type != ActivityType::SendMessage
            || entry.remainder >= entry.frequency;

        if corrupt {
            self.counters.bad_table_data_count += 1;
            events.send(Event::CorruptEntryLocation {
                slot,
                entry: entry_number,
            });
            events.send(Event::CorruptEntryFields {
                message_index: entry.message_index,
                frequency: entry.frequency,
                activity_type: entry.activity_type.into(),
                remainder: entry.remainder,
            });
            tables.disable_corrupt_entry(slot, entry_number);
            return;
        }

        if timing.table_pass_count % u32::from(entry.frequency) != u32::from(entry.remainder) {
            return;
        }

        let Some(message) = tables.messages().get(entry.message_index) else {
            return;
        };
        match self.bus.send(message.as_words()) {
            Ok(()) => self.counters.activity_success_count += 1,
            Err(error) => {
                self.counters.activity_failure_count += 1;
                events.send(Event::ActivitySendFailed {
                    slot,
                    entry: entry_number,
                    error,
                });
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
